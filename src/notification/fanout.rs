//! `NotificationFanout` worker: drains `select_pending_notifications`
//! on a fixed poll interval and delivers each to its subscriber's
//! channel, with jittered exponential backoff and a hard retry cap
//! (spec §4.6).

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::orchestrator::RetryPolicy;
use crate::persistence::{Notification, Persistence};
use crate::types::NotificationStatus;

use super::sink::{NotificationSink, Subscriber};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const BATCH_SIZE: i64 = 25;
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct NotificationFanout {
    persistence: Persistence,
    subscribers: HashMap<String, Subscriber>,
    sinks: HashMap<String, Box<dyn NotificationSink>>,
    policy: RetryPolicy,
}

impl NotificationFanout {
    pub fn new(persistence: Persistence, subscribers: Vec<Subscriber>, sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        let subscribers = subscribers.into_iter().map(|s| (s.id.clone(), s)).collect();
        let sinks = sinks.into_iter().map(|s| (s.channel().to_string(), s)).collect();
        Self { persistence, subscribers, sinks, policy: RetryPolicy::notification() }
    }

    /// Run the poll loop forever. Intended to be `tokio::spawn`ed once
    /// from the composition root.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "notification fanout tick failed");
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let pending = self.persistence.select_pending_notifications(BATCH_SIZE).await?;
        for notification in pending {
            if let Err(e) = self.attempt(notification).await {
                error!(error = %e, "notification delivery attempt errored");
            }
        }
        Ok(())
    }

    async fn attempt(&self, mut notification: Notification) -> Result<()> {
        let Some(subscriber) = self.subscribers.get(&notification.subscriber_id) else {
            warn!(subscriber_id = %notification.subscriber_id, "notification targets unknown subscriber");
            notification.status = NotificationStatus::Failed;
            self.persistence.upsert_notification(&notification).await?;
            self.persistence.increment_metric(&today(), "notification", "unknown_subscriber").await?;
            return Ok(());
        };

        if notification.priority < subscriber.priority_filter {
            debug!(subscriber_id = %subscriber.id, "notification filtered by subscriber priority");
            notification.status = NotificationStatus::Sent;
            notification.sent_at = Some(Utc::now());
            self.persistence.upsert_notification(&notification).await?;
            self.persistence.increment_metric(&today(), "notification", "filtered").await?;
            return Ok(());
        }

        let Some(sink) = self.sinks.get(&subscriber.channel) else {
            warn!(channel = %subscriber.channel, "no sink registered for subscriber channel");
            notification.status = NotificationStatus::Failed;
            self.persistence.upsert_notification(&notification).await?;
            self.persistence.increment_metric(&today(), "notification", "unroutable").await?;
            return Ok(());
        };

        let started = std::time::Instant::now();
        let attempt_number = notification.retry_count as u32 + 1;
        let outcome = tokio::time::timeout(ATTEMPT_TIMEOUT, sink.deliver(subscriber, &notification)).await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("delivery attempt timed out".to_string()),
        };

        let Some(failure_reason) = failure else {
            notification.status = NotificationStatus::Sent;
            notification.sent_at = Some(Utc::now());
            notification.delivery_ms = Some(started.elapsed().as_millis() as i64);
            self.persistence.upsert_notification(&notification).await?;
            self.persistence.increment_metric(&today(), "notification", "sent").await?;
            return Ok(());
        };

        notification.retry_count = attempt_number as i64;
        if self.policy.exhausted(attempt_number) {
            notification.status = NotificationStatus::Failed;
            self.persistence.upsert_notification(&notification).await?;
            self.persistence.increment_metric(&today(), "notification", "failed").await?;
            warn!(notification_id = %notification.id, error = %failure_reason, "notification delivery exhausted retries");
        } else {
            let delay = self.policy.delay_for_attempt(attempt_number);
            notification.status = NotificationStatus::Retrying;
            notification.next_attempt_at = Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
            self.persistence.upsert_notification(&notification).await?;
            self.persistence.increment_metric(&today(), "notification", "retrying").await?;
        }
        Ok(())
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
