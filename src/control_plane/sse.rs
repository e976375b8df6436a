//! `GET /webapp/sse?topic&token&since=N` SSE gateway (spec §4.7, §6):
//! replays buffered events with `seq>since` then switches to the live
//! `EventBus` broadcast stream for the topic, interleaved with a 15s
//! heartbeat. Authenticated by a plain token query param rather than the
//! HMAC scheme, since browser `EventSource` clients can't set custom
//! request headers.

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::error_response::error_json;
use super::state::AppState;
use crate::error::OrchestratorError;
use crate::event_bus::HEARTBEAT_INTERVAL;

#[derive(Deserialize)]
pub struct SseQuery {
    pub token: String,
    pub since: Option<u64>,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String {
    "inbound".to_string()
}

pub async fn sse_gateway(State(state): State<AppState>, Query(q): Query<SseQuery>) -> Response {
    if q.token != state.control_plane.api_secret {
        return error_json(&OrchestratorError::auth("invalid token")).into_response();
    }

    let (tx, rx) = mpsc::channel::<Result<SseEvent, Infallible>>(64);
    let bus = state.event_bus.clone();
    let topic = q.topic.clone();
    let since = q.since.unwrap_or(0);

    tokio::spawn(async move {
        for event in bus.replay_since_durable(&topic, since).await {
            if tx.send(Ok(to_sse(&event))).await.is_err() {
                return;
            }
        }

        let mut live = bus.subscribe(&topic);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                received = live.recv() => {
                    match received {
                        Ok(event) => {
                            if tx.send(Ok(to_sse(&event))).await.is_err() {
                                return;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
                _ = heartbeat.tick() => {
                    let payload = serde_json::json!({"ts": chrono::Utc::now()});
                    let hb = SseEvent::default().event("heartbeat").data(payload.to_string());
                    if tx.send(Ok(hb)).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).into_response()
}

fn to_sse(event: &crate::event_bus::Event) -> SseEvent {
    let payload = serde_json::json!({
        "sequence": event.sequence,
        "type": event.r#type,
        "call_sid": event.call_id,
        "data": event.data,
        "ts": event.ts,
    });
    SseEvent::default().event(event.r#type.clone()).data(payload.to_string())
}
