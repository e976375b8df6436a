//! Seed scenario: a degraded carrier adapter is skipped in favor of the
//! next one in preference order, and publishes health transitions onto
//! the event bus.

mod support;

use std::sync::Arc;
use std::time::Duration;

use call_orchestrator::config::ProviderConfig;
use call_orchestrator::event_bus::EventBus;
use call_orchestrator::provider::{ProviderAdapter, ProviderRegistry};

use support::{test_orchestrator, FakeProviderAdapter};

fn provider_config(threshold: u32, cooldown: Duration, failover_enabled: bool) -> ProviderConfig {
    let mut cfg = call_orchestrator::config::Config::default().provider;
    cfg.health_error_threshold = threshold;
    cfg.cooldown = cooldown;
    cfg.failover_enabled = failover_enabled;
    cfg
}

#[tokio::test]
async fn degraded_primary_is_skipped_for_the_next_preference() {
    let twilio = FakeProviderAdapter::always_succeeds("twilio");
    let connect = FakeProviderAdapter::always_succeeds("connect");
    let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![twilio.clone(), connect.clone()];
    let registry = Arc::new(ProviderRegistry::new(adapters, provider_config(1, Duration::from_secs(60), true)));

    registry.record_error("twilio");
    assert_eq!(registry.select_adapter().unwrap().name(), "connect");

    let (orchestrator, _persistence, _bus) = test_orchestrator(registry).await;
    let call_id = orchestrator
        .originate("+15551234567".into(), "+15550001111".into(), None, None, None, "example.test".into(), None)
        .await
        .unwrap();
    assert!(!call_id.as_str().is_empty());
    assert_eq!(twilio.attempts(), 0, "degraded adapter must never be attempted");
    assert_eq!(connect.attempts(), 1);
}

#[tokio::test]
async fn health_degradation_and_recovery_publish_onto_stream_health() {
    let twilio = FakeProviderAdapter::always_succeeds("twilio");
    let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![twilio];
    let bus = Arc::new(EventBus::new());
    let registry = ProviderRegistry::new(adapters, provider_config(1, Duration::from_millis(20), true)).with_event_bus(bus.clone());

    let mut rx = bus.subscribe("stream.health");
    registry.record_error("twilio");
    let degraded = rx.recv().await.unwrap();
    assert_eq!(degraded.r#type, "provider.degraded");

    tokio::time::sleep(Duration::from_millis(40)).await;
    let recovered_adapter = registry.select_adapter().unwrap();
    assert_eq!(recovered_adapter.name(), "twilio");
    let recovered = rx.recv().await.unwrap();
    assert_eq!(recovered.r#type, "provider.recovered");
}

#[tokio::test]
async fn all_degraded_with_failover_disabled_is_admission_rejected() {
    let twilio = FakeProviderAdapter::always_succeeds("twilio");
    let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![twilio];
    let registry = ProviderRegistry::new(adapters, provider_config(1, Duration::from_secs(60), false));
    registry.record_error("twilio");

    let err = registry.select_adapter().unwrap_err();
    assert_eq!(err.code(), "admission_rejected");
}
