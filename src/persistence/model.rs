//! Row types returned by the persistence layer (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{BulkJobId, CallId, DigitEventId, MessageId, NotificationId};
use crate::types::{AnsweredBy, CallDirection, CallState, Channel, MessageStatus, NotificationKind, NotificationStatus, Priority, SuppressionReason};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub call_id: CallId,
    pub phone_number: String,
    pub direction: CallDirection,
    pub prompt: Option<String>,
    pub first_message: Option<String>,
    pub owner_subject: Option<String>,
    pub status: String,
    pub carrier_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub ring_ms: Option<i64>,
    pub answer_delay_ms: Option<i64>,
    pub summary: Option<String>,
    pub analysis: Option<String>,
    pub digit_summary: Option<String>,
    pub digit_count: i64,
    pub last_otp: Option<String>,
    pub last_otp_masked: Option<String>,
    pub error_code: Option<String>,
    pub answered_by: Option<AnsweredBy>,
    pub seq: i64,
    pub idempotency_key: Option<String>,
    pub provider_name: Option<String>,
    pub originate_attempts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStateTransition {
    pub call_id: CallId,
    pub seq: i64,
    pub state: String,
    pub data: Option<Value>,
    pub ts: DateTime<Utc>,
}

/// A durable copy of one `EventBus::publish` call, keyed by
/// `(topic, sequence)`, backing replay past the bus's in-memory ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEventRow {
    pub topic: String,
    pub sequence: i64,
    pub event_type: String,
    pub call_id: Option<String>,
    pub data: Value,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub call_id: CallId,
    pub seq: i64,
    pub speaker: String,
    pub message: String,
    pub interaction_count: i64,
    pub personality: Option<String>,
    pub confidence: Option<f32>,
    pub is_final: bool,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitEvent {
    pub id: DigitEventId,
    pub call_id: CallId,
    pub source: String,
    pub profile: String,
    /// Raw digits; `None` once read back through a compliance=safe API -
    /// storage still encrypts this column, see `digit_capture::crypto`.
    pub digits: Option<String>,
    pub len: i64,
    pub accepted: bool,
    pub reason: Option<String>,
    pub metadata: Option<Value>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub call_id: CallId,
    pub kind: NotificationKind,
    pub subscriber_id: String,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    /// When this notification next becomes eligible for delivery.
    /// `None` means immediately eligible (the common case on creation).
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivery_ms: Option<i64>,
    pub provider_message_id: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub channel: Channel,
    pub recipient: String,
    pub sender: String,
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub template_id: Option<String>,
    pub variables: Option<Value>,
    pub status: MessageStatus,
    pub retry_count: i64,
    pub scheduled_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub bulk_job_id: Option<BulkJobId>,
    pub tenant_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub request_hash: String,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BulkJob {
    pub job_id: String,
    pub channel: String,
    pub template_id: Option<String>,
    pub tenant_id: Option<String>,
    pub total: i64,
    pub queued: i64,
    pub sending: i64,
    pub sent: i64,
    pub retrying: i64,
    pub failed: i64,
    pub suppressed: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkJob {
    /// A job is complete once nothing is left in-flight (spec §4.8).
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.queued + self.sending + self.retrying == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub address: String,
    pub reason: SuppressionReason,
    pub source: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub result_id: String,
    pub result_kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealthRow {
    pub provider_name: String,
    pub error_count_window: i64,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub degraded: bool,
}
