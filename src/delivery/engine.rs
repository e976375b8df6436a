//! Multi-channel delivery engine: enqueue validation/idempotency and the
//! worker loop that drains due messages through their channel's adapter
//! (spec §4.8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, warn};

use crate::config::DeliveryConfig;
use crate::error::{OrchestratorError, Result};
use crate::ids::{BulkJobId, MessageId};
use crate::orchestrator::RetryPolicy;
use crate::persistence::{BulkJob, Message, Persistence};
use crate::types::{Channel, MessageStatus};

use super::adapter::DeliveryAdapter;
use super::hash::request_hash;
use super::rate_limit::RateLimiter;
use super::template;

/// One caller-supplied message to send. Shared by single and bulk enqueue.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub channel: Channel,
    pub recipient: String,
    pub sender: String,
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub template_id: Option<String>,
    pub variables: Option<Value>,
    pub tenant_id: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

pub struct DeliveryEngine {
    persistence: Persistence,
    adapters: HashMap<Channel, Arc<dyn DeliveryAdapter>>,
    rate_limiter: RateLimiter,
    policy: RetryPolicy,
    config: DeliveryConfig,
}

impl DeliveryEngine {
    pub fn new(persistence: Persistence, adapters: Vec<Arc<dyn DeliveryAdapter>>, config: DeliveryConfig) -> Self {
        let adapters = adapters.into_iter().map(|a| (a.channel(), a)).collect();
        let policy = RetryPolicy::delivery(config.max_retries);
        Self { persistence, adapters, rate_limiter: RateLimiter::new(), policy, config }
    }

    /// Validate, dedupe, and persist one message in `queued` (or
    /// `suppressed`) state (spec §4.8 enqueue). The bool is `true` when
    /// this call matched an existing idempotency key and returned the
    /// prior message unchanged rather than enqueueing a new one (spec §8
    /// "enqueue(x) then enqueue(x) ... deduped=true on the second").
    pub async fn enqueue(&self, req: SendRequest, idempotency_key: Option<String>) -> Result<(Message, bool)> {
        self.enqueue_with_job(req, idempotency_key, None).await
    }

    async fn enqueue_with_job(
        &self,
        req: SendRequest,
        idempotency_key: Option<String>,
        bulk_job_id: Option<BulkJobId>,
    ) -> Result<(Message, bool)> {
        if req.recipient.trim().is_empty() {
            return Err(OrchestratorError::validation("recipient is required"));
        }

        let hash = request_hash(
            &req.recipient,
            &req.sender,
            req.subject.as_deref(),
            req.template_id.as_deref(),
            req.variables.as_ref(),
            req.html_body.as_deref(),
            req.text_body.as_deref(),
            req.scheduled_at.map(|t| t.to_rfc3339()).as_deref(),
        );

        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.persistence.find_idempotency_record(key).await? {
                if existing.request_hash != hash {
                    return Err(OrchestratorError::idempotency_conflict(
                        "idempotency key reused with a different request body",
                    ));
                }
                let id = MessageId::from_string(existing.result_id);
                let message = self
                    .persistence
                    .get_message(&id)
                    .await?
                    .ok_or_else(|| OrchestratorError::internal("idempotency record points at a missing message"))?;
                return Ok((message, true));
            }
        }

        let mut required = template::extract_placeholders(req.html_body.as_deref().unwrap_or(""));
        for name in template::extract_placeholders(req.text_body.as_deref().unwrap_or("")) {
            if !required.contains(&name) {
                required.push(name);
            }
        }
        let variables = req.variables.clone().unwrap_or_else(|| Value::Object(Default::default()));
        let missing = template::missing_variables(&required, &variables);
        if !missing.is_empty() {
            return Err(OrchestratorError::validation(format!("missing template variables: {}", missing.join(", "))));
        }

        let now = Utc::now();
        let suppressed = self.persistence.get_suppression(&req.recipient).await?.is_some();
        let message = Message {
            message_id: MessageId::new(),
            channel: req.channel,
            recipient: req.recipient,
            sender: req.sender,
            subject: req.subject,
            html_body: req.html_body,
            text_body: req.text_body,
            template_id: req.template_id,
            variables: req.variables,
            status: if suppressed { MessageStatus::Suppressed } else { MessageStatus::Queued },
            retry_count: 0,
            scheduled_at: req.scheduled_at.unwrap_or(now),
            next_attempt_at: req.scheduled_at.unwrap_or(now),
            bulk_job_id,
            tenant_id: req.tenant_id,
            idempotency_key: idempotency_key.clone(),
            request_hash: hash,
            provider_message_id: None,
            created_at: now,
            updated_at: now,
        };
        self.persistence.insert_message(&message).await?;

        if let Some(key) = idempotency_key {
            self.persistence
                .insert_idempotency_record(&crate::persistence::IdempotencyRecord {
                    key,
                    request_hash: message.request_hash.clone(),
                    result_id: message.message_id.as_str().to_string(),
                    result_kind: "message".to_string(),
                    created_at: now,
                })
                .await?;
        }

        Ok((message, false))
    }

    /// Create a bulk job plus one message per request, sharing the job's
    /// idempotency key at the job level (spec §4.8: "bulk send is
    /// idempotent at the job level, not per-recipient"). The bool mirrors
    /// [`DeliveryEngine::enqueue`]'s dedupe flag.
    pub async fn enqueue_bulk(
        &self,
        channel: Channel,
        template_id: Option<String>,
        tenant_id: Option<String>,
        requests: Vec<SendRequest>,
        idempotency_key: Option<String>,
    ) -> Result<(BulkJob, bool)> {
        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.persistence.find_idempotency_record(key).await? {
                let job = self
                    .persistence
                    .get_bulk_job(&existing.result_id)
                    .await?
                    .ok_or_else(|| OrchestratorError::internal("idempotency record points at a missing bulk job"))?;
                return Ok((job, true));
            }
        }

        let job = BulkJob {
            job_id: BulkJobId::new().as_str().to_string(),
            channel: channel.to_string(),
            template_id: template_id.clone(),
            tenant_id: tenant_id.clone(),
            total: requests.len() as i64,
            queued: requests.len() as i64,
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        self.persistence.create_bulk_job(&job).await?;

        for req in requests {
            self.enqueue_with_job(req, None, Some(BulkJobId::from_string(job.job_id.clone()))).await?;
        }

        if let Some(key) = idempotency_key {
            self.persistence
                .insert_idempotency_record(&crate::persistence::IdempotencyRecord {
                    key,
                    request_hash: request_hash(&job.job_id, "", None, None, None, None, None, None),
                    result_id: job.job_id.clone(),
                    result_kind: "bulk_job".to_string(),
                    created_at: Utc::now(),
                })
                .await?;
        }

        Ok((job, false))
    }

    /// Run the worker loop forever. Intended to be `tokio::spawn`ed once
    /// from the composition root.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.queue_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "delivery engine tick failed");
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let due = self.persistence.select_due_messages(self.config.batch_size as i64).await?;
        for message in due {
            if let Err(e) = self.process(message).await {
                error!(error = %e, "delivery attempt errored");
            }
        }
        Ok(())
    }

    async fn process(&self, mut message: Message) -> Result<()> {
        if self.persistence.get_suppression(&message.recipient).await?.is_some() {
            self.fail_bucket(&mut message, MessageStatus::Suppressed, "suppressed").await?;
            return Ok(());
        }

        if let Err(retry_after) = self.check_rate_limits(&message) {
            message.next_attempt_at = Utc::now() + chrono::Duration::from_std(retry_after).unwrap_or_default();
            self.persistence
                .update_message_status(&message.message_id, message.status, message.retry_count, message.next_attempt_at, None)
                .await?;
            self.metric("throttled", message.channel).await;
            return Ok(());
        }

        if message.channel == Channel::Email {
            if let Some(cap) = self.config.warmup_max_per_day {
                let sent_today = self.sent_count_today(Channel::Email).await?;
                if sent_today >= cap as i64 {
                    message.next_attempt_at = Utc::now() + chrono::Duration::minutes(5);
                    self.persistence
                        .update_message_status(&message.message_id, message.status, message.retry_count, message.next_attempt_at, None)
                        .await?;
                    self.metric("warmup_deferred", message.channel).await;
                    return Ok(());
                }
            }
        }

        self.persistence
            .update_message_status(&message.message_id, MessageStatus::Sending, message.retry_count, message.next_attempt_at, None)
            .await?;

        let Some(adapter) = self.adapters.get(&message.channel) else {
            self.fail_bucket(&mut message, MessageStatus::Failed, "no adapter registered for channel").await?;
            return Ok(());
        };

        let was_retry = message.retry_count > 0;
        let started = Instant::now();
        match adapter.send(&message).await {
            Ok(provider_message_id) => {
                message.status = MessageStatus::Sent;
                message.provider_message_id = Some(provider_message_id.clone());
                self.persistence
                    .update_message_status(&message.message_id, MessageStatus::Sent, message.retry_count, message.next_attempt_at, Some(&provider_message_id))
                    .await?;
                self.move_bulk_bucket(&message, was_retry, "sent").await?;
                self.metric("sent", message.channel).await;
                let _ = started.elapsed();
            }
            Err(e) => {
                message.retry_count += 1;
                if e.kind.is_retryable() && !self.policy.exhausted(message.retry_count as u32) {
                    let delay = self.policy.delay_for_attempt(message.retry_count as u32);
                    message.next_attempt_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                    self.persistence
                        .update_message_status(&message.message_id, MessageStatus::Retry, message.retry_count, message.next_attempt_at, None)
                        .await?;
                    self.move_bulk_bucket(&message, was_retry, "retrying").await?;
                    self.metric("retry", message.channel).await;
                    warn!(message_id = %message.message_id, error = %e, "delivery attempt failed, retrying");
                } else {
                    self.persistence
                        .update_message_status(&message.message_id, MessageStatus::Failed, message.retry_count, message.next_attempt_at, None)
                        .await?;
                    self.persistence
                        .insert_dead_letter(&message.message_id, message.channel, &e.to_string())
                        .await?;
                    self.move_bulk_bucket(&message, was_retry, "failed").await?;
                    self.metric("failed", message.channel).await;
                    warn!(message_id = %message.message_id, error = %e, "delivery exhausted retries, wrote to DLQ");
                }
            }
        }
        Ok(())
    }

    async fn fail_bucket(&self, message: &mut Message, status: MessageStatus, metric: &'static str) -> Result<()> {
        let was_retry = message.retry_count > 0;
        message.status = status;
        self.persistence
            .update_message_status(&message.message_id, status, message.retry_count, message.next_attempt_at, None)
            .await?;
        let to = if status == MessageStatus::Suppressed { "suppressed" } else { "failed" };
        self.move_bulk_bucket(message, was_retry, to).await?;
        self.metric(metric, message.channel).await;
        Ok(())
    }

    async fn move_bulk_bucket(&self, message: &Message, was_retry: bool, to: &str) -> Result<()> {
        if let Some(job_id) = &message.bulk_job_id {
            let from = if was_retry { "retrying" } else { "queued" };
            self.persistence.move_bulk_job_counter(job_id.as_str(), from, to).await?;
        }
        Ok(())
    }

    fn check_rate_limits(&self, message: &Message) -> std::result::Result<(), std::time::Duration> {
        self.rate_limiter.check(&format!("provider:{}", message.channel), self.config.rate_limit_provider_per_min)?;
        let tenant_key = message.tenant_id.as_deref().unwrap_or("default");
        self.rate_limiter.check(&format!("tenant:{tenant_key}"), self.config.rate_limit_tenant_per_min)?;
        if let Some(domain) = recipient_domain(&message.recipient) {
            self.rate_limiter.check(&format!("domain:{domain}"), self.config.rate_limit_domain_per_min)?;
        }
        Ok(())
    }

    async fn sent_count_today(&self, channel: Channel) -> Result<i64> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let samples = self.persistence.metrics_for_date(&date).await?;
        Ok(samples
            .iter()
            .filter(|s| s.kind == format!("delivery_{channel}") && s.outcome == "sent")
            .map(|s| s.count)
            .sum())
    }

    async fn metric(&self, outcome: &str, channel: Channel) {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        if let Err(e) = self.persistence.increment_metric(&date, &format!("delivery_{channel}"), outcome).await {
            error!(error = %e, "failed to record delivery metric");
        }
    }
}

fn recipient_domain(recipient: &str) -> Option<&str> {
    recipient.split_once('@').map(|(_, domain)| domain)
}
