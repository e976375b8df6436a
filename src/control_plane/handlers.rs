//! Route handlers for the privileged control-plane surface (spec §4.9).
//! Each handler validates its body, delegates to the orchestrator,
//! persistence, or delivery engine, and wraps the result in the
//! `{ok:true,...}` / `{ok:false,error:{..}}` envelope (spec §6).

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::delivery::SendRequest;
use crate::error::{OrchestratorError, Result};
use crate::ids::CallId;
use crate::types::Channel;

use super::error_response::{error_json, ok_json};
use super::state::AppState;

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn respond<T: Into<Value>>(result: Result<T>) -> Response {
    match result {
        Ok(v) => ok_json(v.into()),
        Err(e) => error_json(&e),
    }
}

// ---- calls ----------------------------------------------------------------

#[derive(Deserialize)]
pub struct OriginateBody {
    pub phone_number: String,
    pub from_number: String,
    pub prompt: Option<String>,
    pub first_message: Option<String>,
    pub owner_subject: Option<String>,
    pub webhook_host: String,
}

pub async fn originate_call(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<OriginateBody>) -> Response {
    let key = idempotency_key(&headers);
    let result = state
        .orchestrator
        .originate(
            body.phone_number,
            body.from_number,
            body.prompt,
            body.first_message,
            body.owner_subject,
            body.webhook_host,
            key,
        )
        .await
        .map(|call_id| json!({"call_id": call_id.as_str()}));
    respond(result)
}

pub async fn get_call(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let call_id = CallId::from_string(id);
    let result = state.persistence.get_call(&call_id).await.and_then(|maybe| {
        maybe.map(|c| serde_json::to_value(c).unwrap_or(Value::Null)).ok_or_else(|| OrchestratorError::not_found("call not found"))
    });
    respond(result)
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub since: Option<i64>,
}

pub async fn get_call_events(State(state): State<AppState>, Path(id): Path<String>, Query(q): Query<EventsQuery>) -> Response {
    let call_id = CallId::from_string(id);
    let result = state
        .persistence
        .list_transitions_since(&call_id, q.since.unwrap_or(0))
        .await
        .map(|transitions| json!({"events": transitions}));
    respond(result)
}

#[derive(Deserialize)]
pub struct ListCallsQuery {
    pub cursor: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub q: Option<String>,
}

pub async fn list_calls(State(state): State<AppState>, Query(q): Query<ListCallsQuery>) -> Response {
    let result = state
        .persistence
        .list_recent_calls(q.cursor, q.limit.unwrap_or(20).min(200), q.status.as_deref(), q.q.as_deref())
        .await
        .map(|calls| json!({"calls": calls}));
    respond(result)
}

#[derive(Deserialize)]
pub struct ScriptBody {
    pub prompt: String,
}

pub async fn inject_script(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<ScriptBody>) -> Response {
    let call_id = CallId::from_string(id);
    let result = state.orchestrator.inject_script(&call_id, body.prompt).await.map(|_| json!({}));
    respond(result)
}

pub async fn end_call(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let call_id = CallId::from_string(id);
    let result = state.orchestrator.end_call(&call_id).await.map(|_| json!({}));
    respond(result)
}

pub async fn stream_retry(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let call_id = CallId::from_string(id);
    let result = state.orchestrator.retry_stream(&call_id).await.map(|_| json!({}));
    respond(result)
}

pub async fn stream_fallback(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let call_id = CallId::from_string(id);
    let result = state.orchestrator.fallback_stream(&call_id).await.map(|_| json!({}));
    respond(result)
}

// ---- inbound ----------------------------------------------------------------

pub async fn answer_inbound(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let call_id = CallId::from_string(id);
    let result = state.orchestrator.answer_inbound(&call_id).await.map(|_| json!({}));
    respond(result)
}

pub async fn decline_inbound(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let call_id = CallId::from_string(id);
    let result = state.orchestrator.decline_inbound(&call_id).await.map(|_| json!({}));
    respond(result)
}

// ---- delivery ----------------------------------------------------------------

#[derive(Deserialize)]
pub struct SendBody {
    pub to: String,
    pub from: String,
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub template_id: Option<String>,
    pub variables: Option<Value>,
    pub tenant_id: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl SendBody {
    fn into_request(self, channel: Channel) -> SendRequest {
        SendRequest {
            channel,
            recipient: self.to,
            sender: self.from,
            subject: self.subject,
            html_body: self.html_body,
            text_body: self.text_body,
            template_id: self.template_id,
            variables: self.variables,
            tenant_id: self.tenant_id,
            scheduled_at: self.scheduled_at,
        }
    }
}

pub async fn send_sms(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<SendBody>) -> Response {
    let key = idempotency_key(&headers);
    let result = state
        .delivery
        .enqueue(body.into_request(Channel::Sms), key)
        .await
        .map(|(m, deduped)| json!({"message_id": m.message_id.as_str(), "status": m.status.as_str(), "deduped": deduped}));
    respond(result)
}

pub async fn send_email(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<SendBody>) -> Response {
    let key = idempotency_key(&headers);
    let result = state
        .delivery
        .enqueue(body.into_request(Channel::Email), key)
        .await
        .map(|(m, deduped)| json!({"message_id": m.message_id.as_str(), "status": m.status.as_str(), "deduped": deduped}));
    respond(result)
}

#[derive(Deserialize)]
pub struct BulkBody {
    pub template_id: Option<String>,
    pub tenant_id: Option<String>,
    pub messages: Vec<SendBody>,
}

pub async fn send_sms_bulk(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<BulkBody>) -> Response {
    let key = idempotency_key(&headers);
    let requests = body.messages.into_iter().map(|m| m.into_request(Channel::Sms)).collect();
    let result = state
        .delivery
        .enqueue_bulk(Channel::Sms, body.template_id, body.tenant_id, requests, key)
        .await
        .map(|(job, deduped)| json!({"job_id": job.job_id, "total": job.total, "deduped": deduped}));
    respond(result)
}

pub async fn send_email_bulk(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<BulkBody>) -> Response {
    let key = idempotency_key(&headers);
    let requests = body.messages.into_iter().map(|m| m.into_request(Channel::Email)).collect();
    let result = state
        .delivery
        .enqueue_bulk(Channel::Email, body.template_id, body.tenant_id, requests, key)
        .await
        .map(|(job, deduped)| json!({"job_id": job.job_id, "total": job.total, "deduped": deduped}));
    respond(result)
}
