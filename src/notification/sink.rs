//! Subscriber registry and delivery channels for the notification
//! fan-out (spec §4.6: "subscriber = (subscriber_id, delivery_channel,
//! priority_filter)").

use async_trait::async_trait;
use serde_json::json;

use crate::error::Result;
use crate::persistence::Notification;
use crate::types::Priority;

/// A registered recipient of lifecycle notifications.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: String,
    pub channel: String,
    pub endpoint: String,
    /// Only notifications at or above this priority are delivered to
    /// this subscriber; lower-priority ones are filtered, not retried.
    pub priority_filter: Priority,
}

/// A delivery channel a subscriber can be routed through. One
/// implementation per `channel` name, looked up by the fanout worker.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn deliver(&self, subscriber: &Subscriber, notification: &Notification) -> Result<()>;
}

/// Posts the notification as a JSON body to the subscriber's webhook
/// endpoint. The only sink this crate ships; other channels (e.g. a
/// Slack or PagerDuty integration) implement the same trait.
pub struct WebhookSink {
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for WebhookSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn channel(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, subscriber: &Subscriber, notification: &Notification) -> Result<()> {
        let body = json!({
            "id": notification.id.as_str(),
            "call_id": notification.call_id.as_str(),
            "kind": notification.kind.as_str(),
            "priority": notification.priority.as_str(),
            "created_at": notification.created_at,
            "payload": notification.payload,
        });
        let response = self.client.post(&subscriber.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(crate::error::OrchestratorError::provider_transient(format!(
                "subscriber webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
