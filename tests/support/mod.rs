//! Fakes and composition-root helpers shared by the integration suite.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use call_orchestrator::config::Config;
use call_orchestrator::delivery::{DeliveryAdapter, DeliveryEngine};
use call_orchestrator::digit_capture::DigitCaptureEngine;
use call_orchestrator::error::{OrchestratorError, Result};
use call_orchestrator::event_bus::EventBus;
use call_orchestrator::ids::CallId;
use call_orchestrator::orchestrator::Orchestrator;
use call_orchestrator::persistence::{Message, Persistence};
use call_orchestrator::provider::{CarrierEvent, OriginateRequest, ProviderAdapter, ProviderRegistry, WebhookValidationResult};
use call_orchestrator::stream_pump::StreamPump;
use call_orchestrator::types::{Channel, MachinePolicy};

/// A carrier adapter whose `originate` outcome is scripted call-by-call:
/// the Nth call to `originate` consumes the Nth entry of `plan`, cycling
/// the last entry once exhausted.
pub struct FakeProviderAdapter {
    name: &'static str,
    plan: Vec<FakeOriginateOutcome>,
    calls: AtomicU32,
}

#[derive(Clone)]
pub enum FakeOriginateOutcome {
    Succeed,
    TransientFailure,
    PermanentFailure,
}

impl FakeProviderAdapter {
    pub fn new(name: &'static str, plan: Vec<FakeOriginateOutcome>) -> Arc<Self> {
        Arc::new(Self { name, plan, calls: AtomicU32::new(0) })
    }

    pub fn always_succeeds(name: &'static str) -> Arc<Self> {
        Self::new(name, vec![FakeOriginateOutcome::Succeed])
    }

    pub fn attempts(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for FakeProviderAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn originate(&self, _req: &OriginateRequest) -> Result<CallId> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let outcome = self.plan.get(idx).or_else(|| self.plan.last()).unwrap_or(&FakeOriginateOutcome::Succeed);
        match outcome {
            FakeOriginateOutcome::Succeed => Ok(CallId::new()),
            FakeOriginateOutcome::TransientFailure => Err(OrchestratorError::provider_transient("simulated 503")),
            FakeOriginateOutcome::PermanentFailure => Err(OrchestratorError::provider_permanent("simulated 400")),
        }
    }

    async fn build_answer_document(&self, _call_id: &CallId, _host: &str) -> Result<String> {
        Ok("<Response/>".to_string())
    }

    fn validate_webhook(&self, _signature: Option<&str>, _body: &[u8]) -> WebhookValidationResult {
        WebhookValidationResult::Ok
    }

    async fn terminate(&self, _call_id: &CallId) -> Result<()> {
        Ok(())
    }

    async fn send_dtmf_response(&self, _call_id: &CallId, _plan_prompt: &str) -> Result<String> {
        Ok("<Response/>".to_string())
    }

    async fn emit_tts(&self, _call_id: &CallId, _text_or_audio_url: &str) -> Result<()> {
        Ok(())
    }
}

/// A delivery adapter whose `send` outcome is scripted per-recipient.
pub struct FakeDeliveryAdapter {
    channel: Channel,
    fail_recipients: Vec<String>,
    sent: std::sync::Mutex<Vec<String>>,
}

impl FakeDeliveryAdapter {
    pub fn new(channel: Channel) -> Arc<Self> {
        Arc::new(Self { channel, fail_recipients: Vec::new(), sent: std::sync::Mutex::new(Vec::new()) })
    }

    pub fn failing(channel: Channel, fail_recipients: Vec<String>) -> Arc<Self> {
        Arc::new(Self { channel, fail_recipients, sent: std::sync::Mutex::new(Vec::new()) })
    }

    pub fn sent_recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryAdapter for FakeDeliveryAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &Message) -> Result<String> {
        if self.fail_recipients.contains(&message.recipient) {
            return Err(OrchestratorError::provider_permanent("simulated hard bounce"));
        }
        self.sent.lock().unwrap().push(message.recipient.clone());
        Ok(format!("fake-{}", message.message_id))
    }
}

/// Spin up an in-memory-SQLite orchestrator wired exactly like the
/// composition root, with a caller-supplied provider registry so each
/// test can script carrier behavior.
pub async fn test_orchestrator(providers: Arc<ProviderRegistry>) -> (Orchestrator, Persistence, Arc<EventBus>) {
    let persistence = Persistence::connect("sqlite::memory:").await.unwrap();
    persistence.run_migrations().await.unwrap();

    let config = Config::default();
    let event_bus = Arc::new(EventBus::new().with_persistence(persistence.clone()));
    let digit_capture = Arc::new(DigitCaptureEngine::new(config.digit_capture.inter_digit_timeout, config.digit_capture.overall_timeout));
    let stream_pump = Arc::new(StreamPump::new(event_bus.clone(), config.stream_pump.clone()));

    let orchestrator = Orchestrator::new(
        persistence.clone(),
        providers,
        event_bus.clone(),
        digit_capture,
        stream_pump,
        config.general.clone(),
        MachinePolicy::Hangup,
    );
    (orchestrator, persistence, event_bus)
}

pub fn registry_of(adapters: Vec<Arc<dyn ProviderAdapter>>, config: call_orchestrator::config::ProviderConfig) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::new(adapters, config))
}

pub fn test_delivery_engine(persistence: Persistence, adapters: Vec<Arc<dyn DeliveryAdapter>>) -> DeliveryEngine {
    DeliveryEngine::new(persistence, adapters, Config::default().delivery)
}

pub fn carrier_event(provider: &str, event_type: &str, call_id: &CallId, payload: serde_json::Value) -> CarrierEvent {
    CarrierEvent { provider: provider.to_string(), event_type: event_type.to_string(), call_id: call_id.clone(), payload }
}

/// Give a call's per-call task a tick to drain its inbox. Commands are
/// routed through an mpsc channel into a spawned task, so assertions on
/// persisted state must wait for it to actually run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
