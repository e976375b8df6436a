//! The call orchestrator: owns the call state machine, reconciles
//! carrier webhooks, schedules originate retries, and drives transitions
//! through the per-call cooperative task (spec §4.3, §5).
//!
//! Structural precedent throughout: the teacher's `CallCenterEngine`
//! (`DashMap` of per-entity state, `Arc<RwLock<..>>`/`Arc<Mutex<..>>` for
//! shared subsystems, a `Clone` wrapper around an `Arc<Inner>`).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::config::GeneralConfig;
use crate::digit_capture::{CaptureOutcome, CollectionPlan, DigitCaptureEngine};
use crate::error::{OrchestratorError, Result};
use crate::event_bus::EventBus;
use crate::ids::CallId;
use crate::persistence::{Call, Notification, Persistence};
use crate::provider::{CarrierEvent, OriginateRequest, ProviderRegistry};
use crate::stream_pump::StreamPump;
use crate::types::{AnsweredBy, CallDirection, CallState, FailureReason, MachinePolicy, NotificationKind, NotificationStatus, Priority};

use super::command::{CallCommand, CallRuntime, INBOX_CAPACITY};
use super::retry::RetryPolicy;
use super::webhook;

struct Inner {
    persistence: Persistence,
    providers: Arc<ProviderRegistry>,
    event_bus: Arc<EventBus>,
    digit_capture: Arc<DigitCaptureEngine>,
    stream_pump: Arc<StreamPump>,
    active: DashMap<CallId, mpsc::Sender<CallCommand>>,
    general: GeneralConfig,
    machine_policy: MachinePolicy,
}

/// The call orchestration kernel. Cheap to clone (wraps an `Arc`), same
/// shape as the teacher's `CallCenterEngine`.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        persistence: Persistence,
        providers: Arc<ProviderRegistry>,
        event_bus: Arc<EventBus>,
        digit_capture: Arc<DigitCaptureEngine>,
        stream_pump: Arc<StreamPump>,
        general: GeneralConfig,
        machine_policy: MachinePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                persistence,
                providers,
                event_bus,
                digit_capture,
                stream_pump,
                active: DashMap::new(),
                general,
                machine_policy,
            }),
        }
    }

    pub fn active_call_count(&self) -> usize {
        self.inner.active.len()
    }

    /// Originate an outbound call (spec §4.3 transitions table, idempotent
    /// on `idempotency_key`). Blocks through the originate retry loop
    /// before returning so callers get a definitive accept/reject; once
    /// `DIALING` is reached, further progress arrives via carrier webhooks
    /// routed to the per-call task.
    pub async fn originate(
        &self,
        phone_number: String,
        from_number: String,
        prompt: Option<String>,
        first_message: Option<String>,
        owner_subject: Option<String>,
        webhook_host: String,
        idempotency_key: Option<String>,
    ) -> Result<CallId> {
        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.inner.persistence.get_call_by_idempotency_key(key).await? {
                return Ok(existing.call_id);
            }
        }

        if self.active_call_count() >= self.inner.general.max_concurrent_calls {
            return Err(OrchestratorError::admission_rejected("max concurrent calls reached"));
        }

        let call_id = CallId::new();
        let now = Utc::now();
        let call = Call {
            call_id: call_id.clone(),
            phone_number: phone_number.clone(),
            direction: CallDirection::Outbound,
            prompt: prompt.clone(),
            first_message: first_message.clone(),
            owner_subject,
            status: CallState::Created.to_string(),
            carrier_status: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            ring_ms: None,
            answer_delay_ms: None,
            summary: None,
            analysis: None,
            digit_summary: None,
            digit_count: 0,
            last_otp: None,
            last_otp_masked: None,
            error_code: None,
            answered_by: None,
            seq: 0,
            idempotency_key,
            provider_name: None,
            originate_attempts: 0,
        };
        self.inner.persistence.upsert_call(&call).await?;
        self.inner.persistence.append_call_transition(&call_id, &CallState::Created, None).await?;
        self.publish(&call_id, "created", json!({"phone_number": phone_number}));

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inner.active.insert(call_id.clone(), tx);
        let mut initial_runtime = CallRuntime::new();
        initial_runtime.dialing_started_at = Some(now);
        let runtime = Arc::new(Mutex::new(initial_runtime));
        tokio::spawn(run_call_task(self.clone(), call_id.clone(), rx, runtime));

        let req = OriginateRequest {
            phone_number,
            from_number,
            prompt,
            first_message,
            webhook_host,
        };
        self.try_originate(&call_id, &req).await?;

        Ok(call_id)
    }

    /// Attempt originate with the centralized `RetryPolicy` (spec §4.3
    /// "Outbound originate retries"): non-retryable failures surface
    /// immediately, retryable ones back off and try the next adapter the
    /// health-aware registry selects.
    async fn try_originate(&self, call_id: &CallId, req: &OriginateRequest) -> Result<()> {
        let policy = RetryPolicy::originate();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let adapter = self.inner.providers.select_adapter()?;
            match tokio::time::timeout(self.inner.providers.timeout(), adapter.originate(req)).await {
                Ok(Ok(_provider_call_id)) => {
                    self.inner.providers.record_success(adapter.name());
                    self.inner.persistence.append_call_transition(call_id, &CallState::Dialing, None).await?;
                    self.publish(call_id, "dialing", json!({"provider": adapter.name(), "attempt": attempt}));
                    return Ok(());
                }
                Ok(Err(e)) => {
                    self.inner.providers.record_error(adapter.name());
                    if crate::provider::classify_originate_error(&e) == crate::provider::OriginateFailureKind::Retryable
                        && !policy.exhausted(attempt)
                    {
                        warn!(call_id = %call_id, attempt, error = %e, "originate retrying");
                        tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return self.fail_originate(call_id, FailureReason::Permanent).await;
                }
                Err(_timeout) => {
                    self.inner.providers.record_error(adapter.name());
                    if !policy.exhausted(attempt) {
                        tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return self.fail_originate(call_id, FailureReason::Permanent).await;
                }
            }
        }
    }

    async fn fail_originate(&self, call_id: &CallId, reason: FailureReason) -> Result<()> {
        self.inner
            .persistence
            .append_call_transition(call_id, &CallState::Failed { reason }, None)
            .await?;
        self.publish(call_id, "call_failed", json!({"reason": reason.to_string()}));
        self.enqueue_call_notification(call_id, NotificationKind::CallFailed, Priority::High, None).await?;
        Err(OrchestratorError::provider_permanent(format!("originate exhausted: {reason}")))
    }

    /// Route a normalized carrier event to the owning call's task (spec
    /// §4.3 webhook reconciliation).
    pub async fn handle_carrier_event(&self, event: CarrierEvent) -> Result<()> {
        let sender = self
            .inner
            .active
            .get(&event.call_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| OrchestratorError::not_found("no active call for carrier event"))?;
        sender
            .send(CallCommand::Carrier(event))
            .await
            .map_err(|_| OrchestratorError::internal("call task inbox closed"))
    }

    pub async fn install_digit_plan(&self, call_id: &CallId, plan: CollectionPlan) -> Result<()> {
        let sender = self
            .inner
            .active
            .get(call_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| OrchestratorError::not_found("no active call"))?;
        sender
            .send(CallCommand::InstallPlan(Box::new(plan)))
            .await
            .map_err(|_| OrchestratorError::internal("call task inbox closed"))
    }

    pub async fn feed_digits(&self, call_id: &CallId, source: &str, digits: String, saw_terminator: bool) -> Result<()> {
        let sender = self
            .inner
            .active
            .get(call_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| OrchestratorError::not_found("no active call"))?;
        sender
            .send(CallCommand::DigitInput { source: source.to_string(), digits, saw_terminator })
            .await
            .map_err(|_| OrchestratorError::internal("call task inbox closed"))
    }

    pub async fn end_call(&self, call_id: &CallId) -> Result<()> {
        let sender = self
            .inner
            .active
            .get(call_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| OrchestratorError::not_found("no active call"))?;
        sender
            .send(CallCommand::EndRequested)
            .await
            .map_err(|_| OrchestratorError::internal("call task inbox closed"))
    }

    /// Feed one inbound media frame to the call's stream pump (spec
    /// §4.5). A no-op (returns `not_found`) before the call reaches
    /// `STREAMING`, since the pump isn't spawned until then.
    pub async fn feed_media_frame(&self, call_id: &CallId, sequence: u64, payload: Vec<u8>) -> Result<()> {
        self.inner.stream_pump.feed_inbound(call_id, sequence, payload).await
    }

    /// Register a carrier-initiated inbound call awaiting an operator's
    /// answer/decline decision (spec §4.9 `POST /inbound/{id}/{answer|decline}`).
    /// Creates the `Call` row and spawns its owning task the same way
    /// `originate` does, but skips the originate retry loop since the
    /// carrier already placed the call.
    pub async fn register_inbound(&self, phone_number: String, provider_name: String, carrier_call_id: CallId) -> Result<CallId> {
        if self.active_call_count() >= self.inner.general.max_concurrent_calls {
            return Err(OrchestratorError::admission_rejected("max concurrent calls reached"));
        }
        let now = Utc::now();
        let call = Call {
            call_id: carrier_call_id.clone(),
            phone_number: phone_number.clone(),
            direction: CallDirection::Inbound,
            prompt: None,
            first_message: None,
            owner_subject: None,
            status: CallState::Ringing.to_string(),
            carrier_status: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            ring_ms: None,
            answer_delay_ms: None,
            summary: None,
            analysis: None,
            digit_summary: None,
            digit_count: 0,
            last_otp: None,
            last_otp_masked: None,
            error_code: None,
            answered_by: None,
            seq: 0,
            idempotency_key: None,
            provider_name: Some(provider_name),
            originate_attempts: 0,
        };
        self.inner.persistence.upsert_call(&call).await?;
        self.inner.persistence.append_call_transition(&carrier_call_id, &CallState::Created, None).await?;
        self.inner.persistence.append_call_transition(&carrier_call_id, &CallState::Ringing, None).await?;
        self.publish(&carrier_call_id, "created", json!({"phone_number": phone_number, "direction": "in"}));

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inner.active.insert(carrier_call_id.clone(), tx);
        let mut initial_runtime = CallRuntime::new();
        initial_runtime.state = CallState::Ringing;
        initial_runtime.ringing_started_at = Some(now);
        let runtime = Arc::new(Mutex::new(initial_runtime));
        tokio::spawn(run_call_task(self.clone(), carrier_call_id.clone(), rx, runtime));

        Ok(carrier_call_id)
    }

    /// Operator accepts a ringing inbound call (spec §4.9). Routed
    /// through the normal carrier-event path so it gets the same
    /// dedupe/monotonicity treatment as a carrier-delivered `answered`.
    pub async fn answer_inbound(&self, call_id: &CallId) -> Result<()> {
        self.handle_carrier_event(CarrierEvent {
            provider: "operator".to_string(),
            event_type: "answered".to_string(),
            call_id: call_id.clone(),
            payload: json!({"answered_by": "human"}),
        })
        .await
    }

    /// Operator declines a ringing inbound call (spec §4.9).
    pub async fn decline_inbound(&self, call_id: &CallId) -> Result<()> {
        self.handle_carrier_event(CarrierEvent {
            provider: "operator".to_string(),
            event_type: "declined".to_string(),
            call_id: call_id.clone(),
            payload: json!({}),
        })
        .await
    }

    /// Restart the realtime media pump for a call stuck mid-stream
    /// (spec §4.9 `stream/retry`). Idempotent: a no-op if the pump is
    /// already running.
    pub async fn retry_stream(&self, call_id: &CallId) -> Result<()> {
        self.inner.stream_pump.stop_call(call_id);
        self.inner.stream_pump.spawn_call(call_id.clone());
        self.publish(call_id, "stream_retried", json!({}));
        Ok(())
    }

    /// Drop back out of the realtime pump, flushing any queued outbound
    /// audio (spec §4.9 `stream/fallback`) - used when the media path is
    /// unrecoverable but the call itself should continue via DTMF only.
    pub async fn fallback_stream(&self, call_id: &CallId) -> Result<()> {
        self.inner.stream_pump.flush(call_id).await?;
        self.inner.stream_pump.stop_call(call_id);
        self.publish(call_id, "stream_fallback", json!({}));
        Ok(())
    }

    pub async fn enqueue_utterance(&self, call_id: &CallId, chunks: Vec<crate::stream_pump::AudioChunk>) -> Result<()> {
        self.inner.stream_pump.enqueue_utterance(call_id, chunks).await
    }

    pub async fn ack_media_mark(&self, call_id: &CallId, name: String) -> Result<()> {
        self.inner.stream_pump.ack_mark(call_id, name).await
    }

    pub async fn inject_script(&self, call_id: &CallId, prompt: String) -> Result<()> {
        let sender = self
            .inner
            .active
            .get(call_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| OrchestratorError::not_found("no active call"))?;
        sender
            .send(CallCommand::InjectScript(prompt))
            .await
            .map_err(|_| OrchestratorError::internal("call task inbox closed"))
    }

    fn publish(&self, call_id: &CallId, event_type: &str, data: Value) {
        self.inner.event_bus.publish(&format!("call.{call_id}"), event_type, Some(call_id.to_string()), data);
    }

    async fn enqueue_call_notification(
        &self,
        call_id: &CallId,
        kind: NotificationKind,
        priority: Priority,
        payload: Option<Value>,
    ) -> Result<()> {
        let notification = Notification {
            id: crate::ids::NotificationId::new(),
            call_id: call_id.clone(),
            kind,
            subscriber_id: "default".to_string(),
            priority,
            status: NotificationStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            next_attempt_at: None,
            sent_at: None,
            delivery_ms: None,
            provider_message_id: None,
            payload,
        };
        self.inner.persistence.upsert_notification(&notification).await
    }

    /// Apply one reconciled transition: dedupe + monotonicity guard, then
    /// append through `persistence::append_call_transition` so the "every
    /// mutation is transactional" invariant cannot be bypassed (spec
    /// §4.1, §4.3).
    async fn apply_transition(&self, call_id: &CallId, runtime: &mut CallRuntime, new_state: CallState, data: Option<Value>) -> Result<bool> {
        if !webhook::may_apply(&runtime.state, &new_state) {
            warn!(call_id = %call_id, from = %runtime.state, to = %new_state, "rejected backwards transition");
            return Ok(false);
        }
        self.inner.persistence.append_call_transition(call_id, &new_state, data.clone()).await?;
        self.publish(call_id, new_state.tag(), data.unwrap_or(json!({})));

        if new_state == CallState::Streaming {
            self.inner.stream_pump.spawn_call(call_id.clone());
        } else if new_state.is_terminal() {
            self.inner.stream_pump.stop_call(call_id);
        }

        if let CallState::Failed { reason } = &new_state {
            if let Some(mut call) = self.inner.persistence.get_call(call_id).await? {
                call.error_code = Some(reason.to_string());
                call.ended_at = call.ended_at.or(Some(Utc::now()));
                self.inner.persistence.upsert_call(&call).await?;
            }
        }

        runtime.state = new_state;
        Ok(true)
    }

    async fn handle_command(&self, call_id: &CallId, runtime: &mut CallRuntime, cmd: CallCommand) {
        if let Err(e) = self.handle_command_inner(call_id, runtime, cmd).await {
            error!(call_id = %call_id, error = %e, "error handling call command");
        }
    }

    async fn handle_command_inner(&self, call_id: &CallId, runtime: &mut CallRuntime, cmd: CallCommand) -> Result<()> {
        match cmd {
            CallCommand::Carrier(event) => self.handle_carrier_event_inner(call_id, runtime, event).await,
            CallCommand::InstallPlan(plan) => self.handle_install_plan(call_id, runtime, *plan).await,
            CallCommand::DigitInput { source, digits, saw_terminator } => {
                self.handle_digit_input(call_id, runtime, &source, &digits, saw_terminator).await
            }
            CallCommand::InjectScript(prompt) => {
                info!(call_id = %call_id, "runtime prompt injected");
                self.publish(call_id, "script_injected", json!({"prompt": prompt}));
                Ok(())
            }
            CallCommand::SttFailure => {
                runtime.consecutive_stt_failures += 1;
                if runtime.consecutive_stt_failures >= self.inner.general.slo_stt_failures {
                    self.publish(call_id, "call.slo_violation", json!({"kind": "stt_failures", "count": runtime.consecutive_stt_failures}));
                }
                Ok(())
            }
            CallCommand::FirstMediaReceived => self.handle_first_media(call_id, runtime).await,
            CallCommand::EndRequested => {
                self.apply_transition(call_id, runtime, CallState::Closing, None).await?;
                Ok(())
            }
            CallCommand::Cancel => Ok(()),
        }
    }

    async fn handle_carrier_event_inner(&self, call_id: &CallId, runtime: &mut CallRuntime, event: CarrierEvent) -> Result<()> {
        let dedupe_key = match event.event_type.as_str() {
            "digits" | "gather" => webhook::gather_dedupe_key(&event.payload.to_string()),
            other => webhook::event_dedupe_key(other, &event.payload.to_string()),
        };
        if !self.inner.persistence.record_webhook_if_new(call_id, &dedupe_key, webhook::DEDUPE_WINDOW).await? {
            self.inner.persistence.increment_metric(&today(), "webhook", "ignored_duplicate").await?;
            return Ok(());
        }

        match event.event_type.as_str() {
            "ringing" => {
                runtime.ringing_started_at = Some(Utc::now());
                self.apply_transition(call_id, runtime, CallState::Ringing, None).await?;
            }
            "answered" => self.handle_answered(call_id, runtime, &event.payload).await?,
            "stream.frame" => self.handle_first_media(call_id, runtime).await?,
            "digits" | "gather" => {
                let digits = event.payload.get("digits").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let saw_terminator = event.payload.get("terminator").and_then(|v| v.as_bool()).unwrap_or(true);
                self.handle_digit_input(call_id, runtime, &event.event_type, &digits, saw_terminator).await?;
            }
            "ended" => self.handle_ended(call_id, runtime).await?,
            "declined" => {
                self.apply_transition(call_id, runtime, CallState::Failed { reason: FailureReason::Permanent }, None).await?;
                self.enqueue_call_notification(call_id, NotificationKind::CallFailed, Priority::Normal, None).await?;
            }
            "media_error" => {
                runtime.consecutive_stt_failures += 1;
            }
            other => {
                warn!(call_id = %call_id, event_type = other, "unhandled carrier event type");
            }
        }
        Ok(())
    }

    async fn handle_answered(&self, call_id: &CallId, runtime: &mut CallRuntime, payload: &Value) -> Result<()> {
        let answered_by = match payload.get("answered_by").and_then(|v| v.as_str()) {
            Some("machine") => AnsweredBy::Machine,
            Some("human") => AnsweredBy::Human,
            _ => AnsweredBy::Unknown,
        };

        if answered_by == AnsweredBy::Machine && self.inner.machine_policy == MachinePolicy::Hangup {
            self.apply_transition(call_id, runtime, CallState::Failed { reason: FailureReason::AnsweringMachine }, None).await?;
            self.enqueue_call_notification(call_id, NotificationKind::CallFailed, Priority::Normal, None).await?;
            return Ok(());
        }

        let now = Utc::now();
        runtime.answered_at = Some(now);
        let answer_delay_ms = runtime.ringing_started_at.map(|t| (now - t).num_milliseconds()).unwrap_or(0);
        if answer_delay_ms as u64 > self.inner.general.slo_answer_delay_ms {
            self.publish(call_id, "call.slo_violation", json!({"kind": "answer_delay", "ms": answer_delay_ms}));
        }

        if let Some(mut call) = self.inner.persistence.get_call(call_id).await? {
            call.answered_by = Some(answered_by);
            call.answer_delay_ms = Some(answer_delay_ms);
            call.ring_ms = Some(answer_delay_ms);
            call.started_at = Some(now);
            self.inner.persistence.upsert_call(&call).await?;
        }

        let first_media_deadline = now + chrono::Duration::seconds(8);
        runtime.first_media_deadline = Some(first_media_deadline);
        self.apply_transition(call_id, runtime, CallState::Answered, Some(json!({"answered_by": answered_by.to_string()}))).await?;
        Ok(())
    }

    async fn handle_first_media(&self, call_id: &CallId, runtime: &mut CallRuntime) -> Result<()> {
        if runtime.state != CallState::Answered {
            return Ok(());
        }
        runtime.first_media_deadline = None;
        self.apply_transition(call_id, runtime, CallState::Streaming, None).await?;
        Ok(())
    }

    /// Called by the per-call task's timer arm when `first_media_deadline`
    /// elapses without a `stream.frame` event (spec §4.3 "ANSWERED |
    /// timeout | FAILED(no_media)").
    async fn handle_first_media_timeout(&self, call_id: &CallId, runtime: &mut CallRuntime) {
        if runtime.state != CallState::Answered {
            return;
        }
        runtime.first_media_deadline = None;
        if let Err(e) = self.apply_transition(call_id, runtime, CallState::Failed { reason: FailureReason::NoMedia }, None).await {
            error!(call_id = %call_id, error = %e, "failed to record no_media failure");
        }
        let _ = self.enqueue_call_notification(call_id, NotificationKind::CallFailed, Priority::High, None).await;
    }

    async fn handle_install_plan(&self, call_id: &CallId, runtime: &mut CallRuntime, plan: CollectionPlan) -> Result<()> {
        runtime.digit_step = 0;
        let Some(expectation) = plan.expectation_for_step(0) else {
            return Ok(());
        };
        runtime.digit_plan = Some(plan);
        self.inner.digit_capture.install(call_id.clone(), expectation);
        let snapshot = self.inner.digit_capture.snapshot(call_id);
        if let Some(snap) = snapshot {
            self.inner.persistence.save_expectation_snapshot(call_id, &snap).await?;
        }
        self.apply_transition(call_id, runtime, CallState::DigitCapturing { step: 0 }, None).await?;
        Ok(())
    }

    async fn handle_digit_input(&self, call_id: &CallId, runtime: &mut CallRuntime, source: &str, digits: &str, saw_terminator: bool) -> Result<()> {
        let outcome =
            self.inner.digit_capture.feed(call_id, source, digits, saw_terminator, runtime.digit_plan.as_ref(), runtime.digit_step);

        match &outcome {
            CaptureOutcome::AcceptedNextStep { .. } | CaptureOutcome::AcceptedComplete { .. } => {
                self.record_digit_event(call_id, source, digits, true, None).await?;
            }
            CaptureOutcome::Rejected { reason, .. } => {
                let reason = *reason;
                self.record_digit_event(call_id, source, digits, false, Some(reason.as_str())).await?;
            }
            CaptureOutcome::Fallback { .. } | CaptureOutcome::NoActiveExpectation | CaptureOutcome::DuplicateIgnored => {}
        }

        match outcome {
            CaptureOutcome::AcceptedComplete { digits, end_call, .. } => {
                self.inner.digit_capture.clear(call_id);
                self.inner.persistence.clear_expectation_snapshot(call_id).await?;
                runtime.digit_plan = None;
                runtime.digit_step = 0;
                self.maybe_record_otp(call_id, runtime, &digits).await?;
                if end_call {
                    self.apply_transition(call_id, runtime, CallState::Closing, None).await?;
                } else {
                    self.apply_transition(call_id, runtime, CallState::Streaming, None).await?;
                }
            }
            CaptureOutcome::AcceptedNextStep { digits, next } => {
                self.maybe_record_otp(call_id, runtime, &digits).await?;
                runtime.digit_step += 1;
                self.inner.digit_capture.install(call_id.clone(), *next);
                let step = runtime.digit_step as u32;
                self.apply_transition(call_id, runtime, CallState::DigitCapturing { step }, None).await?;
            }
            CaptureOutcome::Fallback { .. } => {
                self.inner.digit_capture.clear(call_id);
                self.inner.persistence.clear_expectation_snapshot(call_id).await?;
                runtime.digit_plan = None;
                runtime.digit_step = 0;
                self.apply_transition(call_id, runtime, CallState::Failed { reason: FailureReason::DigitTimeout }, None).await?;
                self.enqueue_call_notification(call_id, NotificationKind::CallFailed, Priority::High, None).await?;
            }
            CaptureOutcome::Rejected { .. } | CaptureOutcome::NoActiveExpectation | CaptureOutcome::DuplicateIgnored => {}
        }
        Ok(())
    }

    async fn maybe_record_otp(&self, call_id: &CallId, _runtime: &mut CallRuntime, digits: &str) -> Result<()> {
        let masked = crate::types::mask_otp(digits);
        if let Some(mut call) = self.inner.persistence.get_call(call_id).await? {
            call.last_otp_masked = Some(masked);
            call.last_otp = match self.inner.general.compliance_mode {
                crate::config::ComplianceMode::Safe => self
                    .inner
                    .general
                    .dtmf_encryption_key
                    .as_deref()
                    .map(|key| crate::digit_capture::crypto::encrypt(key, digits)),
                crate::config::ComplianceMode::DevInsecure => Some(digits.to_string()),
            };
            call.digit_count += 1;
            self.inner.persistence.upsert_call(&call).await?;
        }
        Ok(())
    }

    async fn record_digit_event(&self, call_id: &CallId, source: &str, digits: &str, accepted: bool, reason: Option<&str>) -> Result<()> {
        let profile = self
            .inner
            .digit_capture
            .active_expectation(call_id)
            .map(|e| e.profile.as_str().to_string())
            .unwrap_or_else(|| "generic".to_string());
        let event = crate::persistence::DigitEvent {
            id: crate::ids::DigitEventId::new(),
            call_id: call_id.clone(),
            source: source.to_string(),
            profile,
            digits: Some(digits.to_string()),
            len: digits.len() as i64,
            accepted,
            reason: reason.map(|r| r.to_string()),
            metadata: None,
            ts: Utc::now(),
        };
        self.inner.persistence.add_digit_event(&event).await
    }

    async fn handle_ended(&self, call_id: &CallId, runtime: &mut CallRuntime) -> Result<()> {
        let duration_ms = runtime.dialing_started_at.map(|t| (Utc::now() - t).num_milliseconds());
        self.apply_transition(call_id, runtime, CallState::Ended, None).await?;

        if let Some(mut call) = self.inner.persistence.get_call(call_id).await? {
            call.ended_at = Some(Utc::now());
            call.duration_ms = duration_ms.or(call.duration_ms);
            self.inner.persistence.upsert_call(&call).await?;
        }

        self.enqueue_call_notification(call_id, NotificationKind::CallCompleted, Priority::Normal, None).await?;
        self.inner.persistence.increment_metric(&today(), "call", "completed").await?;
        Ok(())
    }

    fn remove_active(&self, call_id: &CallId) {
        self.inner.active.remove(call_id);
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// The per-call cooperative task loop (spec §5). Owns `CallRuntime`
/// exclusively; all mutation happens here, never from another task.
async fn run_call_task(
    orchestrator: Orchestrator,
    call_id: CallId,
    mut rx: mpsc::Receiver<CallCommand>,
    runtime: Arc<Mutex<CallRuntime>>,
) {
    loop {
        let deadline = {
            let guard = runtime.lock().await;
            guard.first_media_deadline
        };

        let timer = async {
            match deadline {
                Some(dl) => {
                    let remaining = (dl - Utc::now()).to_std().unwrap_or(StdDuration::from_millis(0));
                    tokio::time::sleep(remaining).await;
                }
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            maybe_cmd = rx.recv() => {
                match maybe_cmd {
                    Some(cmd) => {
                        let mut guard = runtime.lock().await;
                        orchestrator.handle_command(&call_id, &mut guard, cmd).await;
                        if guard.state.is_terminal() {
                            drop(guard);
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = timer => {
                let mut guard = runtime.lock().await;
                orchestrator.handle_first_media_timeout(&call_id, &mut guard).await;
                if guard.state.is_terminal() {
                    drop(guard);
                    break;
                }
            }
        }
    }
    rx.close();
    while rx.recv().await.is_some() {}
    orchestrator.remove_active(&call_id);
}
