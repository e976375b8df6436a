//! Seed scenario: a carrier retrying the same webhook delivery must not
//! double-apply it, and a stale out-of-order webhook must not roll the
//! call state backwards.

mod support;

use call_orchestrator::persistence::Persistence;
use call_orchestrator::provider::ProviderAdapter;

use support::{carrier_event, settle, test_orchestrator, FakeProviderAdapter};

async fn today_ignored_duplicate_count(persistence: &Persistence) -> i64 {
    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    persistence
        .metrics_for_date(&date)
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.kind == "webhook" && s.outcome == "ignored_duplicate")
        .map(|s| s.count)
        .sum()
}

#[tokio::test]
async fn a_retried_webhook_delivery_is_applied_only_once() {
    let adapter = FakeProviderAdapter::always_succeeds("twilio");
    let adapters: Vec<std::sync::Arc<dyn ProviderAdapter>> = vec![adapter];
    let registry = support::registry_of(adapters, call_orchestrator::config::Config::default().provider);
    let (orchestrator, persistence, _bus) = test_orchestrator(registry).await;

    let call_id = orchestrator
        .originate("+15551234567".into(), "+15550001111".into(), None, None, None, "example.test".into(), None)
        .await
        .unwrap();

    let before = today_ignored_duplicate_count(&persistence).await;

    let payload = serde_json::json!({"answered_by": "human"});
    orchestrator.handle_carrier_event(carrier_event("twilio", "answered", &call_id, payload.clone())).await.unwrap();
    settle().await;
    orchestrator.handle_carrier_event(carrier_event("twilio", "answered", &call_id, payload)).await.unwrap();
    settle().await;

    let transitions = persistence.list_transitions(&call_id).await.unwrap();
    let answered_count = transitions.iter().filter(|t| t.state == "answered").count();
    assert_eq!(answered_count, 1, "the duplicate delivery must not append a second transition");

    let after = today_ignored_duplicate_count(&persistence).await;
    assert_eq!(after, before + 1);
}

#[tokio::test]
async fn a_stale_out_of_order_webhook_does_not_roll_the_state_backwards() {
    let adapter = FakeProviderAdapter::always_succeeds("twilio");
    let adapters: Vec<std::sync::Arc<dyn ProviderAdapter>> = vec![adapter];
    let registry = support::registry_of(adapters, call_orchestrator::config::Config::default().provider);
    let (orchestrator, persistence, _bus) = test_orchestrator(registry).await;

    let call_id = orchestrator
        .originate("+15551234567".into(), "+15550001111".into(), None, None, None, "example.test".into(), None)
        .await
        .unwrap();

    orchestrator
        .handle_carrier_event(carrier_event("twilio", "answered", &call_id, serde_json::json!({"answered_by": "human"})))
        .await
        .unwrap();
    settle().await;

    // A stale "ringing" redelivered after the call already answered -
    // distinct payload from anything already seen, so it passes dedupe,
    // but the monotonicity guard must still reject it.
    orchestrator.handle_carrier_event(carrier_event("twilio", "ringing", &call_id, serde_json::json!({"retry": true}))).await.unwrap();
    settle().await;

    let call = persistence.get_call(&call_id).await.unwrap().unwrap();
    assert_eq!(call.status, "answered");

    let transitions = persistence.list_transitions(&call_id).await.unwrap();
    assert!(transitions.iter().all(|t| t.state != "ringing"), "no ringing transition should exist once the call already answered");
}
