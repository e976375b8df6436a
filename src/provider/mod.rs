//! # Provider Adapter Registry (spec §4.2)
//!
//! One capability trait (`ProviderAdapter`) replaces the "duck typing on
//! provider name" pattern spec §9 flags for redesign; each carrier is a
//! variant implementing it. Structural precedent: the teacher's
//! `CallHandler` trait plus `CallCenterCallHandler` implementation wired
//! through `async_trait`.

pub mod connect;
pub mod health;
pub mod twilio;
pub mod vonage;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{ProviderConfig, WebhookValidationMode};
use crate::error::{OrchestratorError, Result};
use crate::event_bus::EventBus;
use crate::ids::CallId;

pub use health::ProviderHealth;

/// A request to place an outbound call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginateRequest {
    pub phone_number: String,
    pub from_number: String,
    pub prompt: Option<String>,
    pub first_message: Option<String>,
    pub webhook_host: String,
}

/// Result of validating an inbound webhook signature (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookValidationResult {
    Ok,
    Warn,
    Fail,
}

/// Normalized carrier event, after the adapter strips vendor-specific
/// vocabulary (spec §6 "Carrier webhooks").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierEvent {
    pub provider: String,
    pub event_type: String,
    pub call_id: CallId,
    pub payload: Value,
}

/// Capability set every carrier adapter must implement (spec §4.2).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn originate(&self, req: &OriginateRequest) -> Result<CallId>;

    /// Build the answer-time media-control document (XML-like for most
    /// carriers) returned in response to the carrier's answer webhook.
    async fn build_answer_document(&self, call_id: &CallId, host: &str) -> Result<String>;

    fn validate_webhook(&self, signature: Option<&str>, body: &[u8]) -> WebhookValidationResult;

    async fn terminate(&self, call_id: &CallId) -> Result<()>;

    async fn send_dtmf_response(&self, call_id: &CallId, plan_prompt: &str) -> Result<String>;

    async fn emit_tts(&self, call_id: &CallId, text_or_audio_url: &str) -> Result<()>;
}

/// Classification of an originate failure used to decide retryability
/// (spec §4.3 "Outbound originate retries").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginateFailureKind {
    Retryable,
    Permanent,
}

pub fn classify_originate_error(err: &OrchestratorError) -> OriginateFailureKind {
    match err.kind {
        crate::error::ErrorKind::ProviderTransient | crate::error::ErrorKind::Timeout => {
            OriginateFailureKind::Retryable
        }
        _ => OriginateFailureKind::Permanent,
    }
}

/// Routes originate requests to a non-degraded adapter by preference
/// order, tracks health per adapter, and normalizes webhook validation
/// mode (spec §4.2: strict/warn/off).
pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    by_name: HashMap<&'static str, usize>,
    health: DashMap<&'static str, Arc<ProviderHealth>>,
    config: ProviderConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl ProviderRegistry {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>, config: ProviderConfig) -> Self {
        let mut by_name = HashMap::new();
        let health = DashMap::new();
        for (idx, adapter) in adapters.iter().enumerate() {
            by_name.insert(adapter.name(), idx);
            health.insert(adapter.name(), Arc::new(ProviderHealth::new()));
        }
        Self { adapters, by_name, health, config, event_bus: None }
    }

    /// Attach the shared event bus so health transitions publish onto
    /// `stream.health` (spec §4.7 topic list, §8 seed scenario 2).
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn publish_health(&self, event_type: &str, provider: &str) {
        if let Some(bus) = &self.event_bus {
            bus.publish("stream.health", event_type, None, serde_json::json!({"provider": provider}));
        }
    }

    /// Seed in-memory health from persisted snapshots on startup (spec
    /// §3 ProviderHealth: "in-memory with periodic persistence").
    pub fn load_health_snapshot(&self, rows: &[crate::persistence::ProviderHealthRow]) {
        for row in rows {
            if let Some((&name, _)) = self.by_name.get_key_value(row.provider_name.as_str()) {
                self.health.insert(name, Arc::new(ProviderHealth::from_row(row)));
            }
        }
    }

    pub fn health_snapshots(&self) -> Vec<crate::persistence::ProviderHealthRow> {
        self.health.iter().map(|e| e.value().to_row(e.key())).collect()
    }

    fn adapter_for(&self, name: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.by_name.get(name).map(|idx| &self.adapters[*idx])
    }

    fn health_for(&self, name: &str) -> Option<Arc<ProviderHealth>> {
        self.health.get(name).map(|e| e.value().clone())
    }

    fn refresh_recoveries(&self) {
        let mut recovered = Vec::new();
        for entry in self.health.iter() {
            if entry.value().recover_if_cooled_down() {
                info!(provider = entry.key(), "provider.recovered");
                recovered.push(*entry.key());
            }
        }
        for name in recovered {
            self.publish_health("provider.recovered", name);
        }
    }

    /// Pick the adapter to originate with: first non-degraded adapter in
    /// preference order; if all are degraded and failover is enabled,
    /// the least-recently-failed one; if failover is disabled, reject
    /// with `admission_rejected` (spec §4.2, §8 boundary case).
    pub fn select_adapter(&self) -> Result<Arc<dyn ProviderAdapter>> {
        self.refresh_recoveries();

        for name in &self.config.preference_order {
            if let (Some(adapter), Some(health)) = (self.adapter_for(name), self.health_for(name)) {
                if !health.is_degraded() {
                    return Ok(adapter.clone());
                }
            }
        }

        if !self.config.failover_enabled {
            return Err(OrchestratorError::admission_rejected(
                "all provider adapters degraded and failover is disabled",
            ));
        }

        let least_recently_failed = self
            .config
            .preference_order
            .iter()
            .filter_map(|name| {
                let health = self.health_for(name)?;
                let adapter = self.adapter_for(name)?;
                Some((health.last_error_at(), adapter.clone()))
            })
            .min_by_key(|(ts, _)| ts.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN));

        least_recently_failed
            .map(|(_, adapter)| adapter)
            .ok_or_else(|| OrchestratorError::admission_rejected("no provider adapters configured"))
    }

    pub fn record_success(&self, name: &str) {
        if let Some(h) = self.health_for(name) {
            h.record_success();
        }
    }

    pub fn record_error(&self, name: &str) {
        if let Some(h) = self.health_for(name) {
            let was_degraded = h.is_degraded();
            h.record_error(self.config.health_window, self.config.health_error_threshold, self.config.cooldown);
            if !was_degraded && h.is_degraded() {
                warn!(provider = name, "provider.degraded");
                self.publish_health("provider.degraded", name);
            }
        }
    }

    pub fn validate_webhook(&self, name: &str, signature: Option<&str>, body: &[u8]) -> WebhookValidationResult {
        let result = self
            .adapter_for(name)
            .map(|a| a.validate_webhook(signature, body))
            .unwrap_or(WebhookValidationResult::Fail);

        match (self.config.webhook_validation, result) {
            (WebhookValidationMode::Off, _) => WebhookValidationResult::Ok,
            (WebhookValidationMode::Warn, WebhookValidationResult::Fail) => WebhookValidationResult::Warn,
            (_, other) => other,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.config.adapter_call_timeout
    }
}
