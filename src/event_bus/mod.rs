//! # Event Bus + SSE Gateway (spec §4.7)
//!
//! Replaces the "event emitters with implicit listeners" pattern spec §9
//! flags for redesign: one explicit, typed bus. Topics: `call.<call_id>`,
//! `inbound`, `stream.health`, `transcript.*`. Each topic has a monotonic
//! sequence; subscribers may request `since=N` to replay persisted events
//! before switching to the live `tokio::sync::broadcast` stream - the
//! single-writer-per-topic, lock-free-reader model of spec §5.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(45);

/// One published event (spec §6 SSE format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub r#type: String,
    pub call_id: Option<String>,
    pub data: Value,
    pub ts: DateTime<Utc>,
}

struct Topic {
    next_seq: std::sync::atomic::AtomicU64,
    sender: broadcast::Sender<Event>,
    /// Bounded in-memory replay ring; older history is expected to come
    /// from the persisted `call_state_transitions` / `notifications`
    /// tables via the caller, not from the bus itself.
    recent: parking_lot::Mutex<std::collections::VecDeque<Event>>,
}

const REPLAY_RING_CAPACITY: usize = 512;

impl Topic {
    fn new() -> Self {
        let (sender, _rx) = broadcast::channel(1024);
        Self {
            next_seq: std::sync::atomic::AtomicU64::new(1),
            sender,
            recent: parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(REPLAY_RING_CAPACITY)),
        }
    }
}

/// Single-writer-per-topic publish/subscribe bus (spec §4.7, §5).
pub struct EventBus {
    topics: DashMap<String, Topic>,
    persistence: Option<crate::persistence::Persistence>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { topics: DashMap::new(), persistence: None }
    }

    /// Durably log every published event so the SSE gateway can replay
    /// past the in-memory ring (spec §4.7).
    pub fn with_persistence(mut self, persistence: crate::persistence::Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    fn topic_entry(&self, topic: &str) -> dashmap::mapref::one::Ref<'_, String, Topic> {
        self.topics.entry(topic.to_string()).or_insert_with(Topic::new);
        self.topics.get(topic).expect("just inserted")
    }

    /// Publish an event onto `topic`, assigning the next monotonic
    /// sequence number for that topic.
    pub fn publish(&self, topic: &str, event_type: &str, call_id: Option<String>, data: Value) -> Event {
        let entry = self.topic_entry(topic);
        let sequence = entry.next_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let event = Event { sequence, r#type: event_type.to_string(), call_id, data, ts: Utc::now() };

        {
            let mut recent = entry.recent.lock();
            if recent.len() == REPLAY_RING_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        // No subscribers is not an error: the broadcast channel drops the
        // event, which is fine since persistence already holds it.
        let _ = entry.sender.send(event.clone());
        debug!(topic, sequence, "event published");

        if let Some(persistence) = self.persistence.clone() {
            let row = crate::persistence::BusEventRow {
                topic: topic.to_string(),
                sequence: event.sequence as i64,
                event_type: event.r#type.clone(),
                call_id: event.call_id.clone(),
                data: event.data.clone(),
                ts: event.ts,
            };
            tokio::spawn(async move {
                if let Err(e) = persistence.record_bus_event(&row).await {
                    tracing::warn!(error = %e, "failed to durably log bus event");
                }
            });
        }

        event
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event> {
        self.topic_entry(topic).sender.subscribe()
    }

    /// Replay buffered events on `topic` with `seq > since`, in order.
    /// Only covers the in-memory ring; see [`EventBus::replay_since_durable`]
    /// for the persistence-backed version the SSE gateway uses.
    pub fn replay_since(&self, topic: &str, since: u64) -> Vec<Event> {
        let entry = self.topic_entry(topic);
        entry.recent.lock().iter().filter(|e| e.sequence > since).cloned().collect()
    }

    /// Replay events on `topic` with `seq > since`, falling back to the
    /// persistence layer for any gap older than the in-memory ring covers
    /// (spec §4.7, §8 "returns exactly the events with K<seq≤M").
    pub async fn replay_since_durable(&self, topic: &str, since: u64) -> Vec<Event> {
        let ring = self.replay_since(topic, since);
        let Some(persistence) = &self.persistence else {
            return ring;
        };

        let ring_floor = ring.first().map(|e| e.sequence);
        if ring_floor.map(|floor| floor == since + 1).unwrap_or(false) {
            // Ring already starts immediately after `since`; nothing older to fetch.
            return ring;
        }

        let before = ring_floor.map(|f| f as i64);
        let older = match persistence.list_bus_events_since(topic, since as i64, before).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, topic, "failed to read durable event backlog");
                return ring;
            }
        };

        let mut merged: Vec<Event> = older
            .into_iter()
            .map(|r| Event { sequence: r.sequence as u64, r#type: r.event_type, call_id: r.call_id, data: r.data, ts: r.ts })
            .collect();
        merged.extend(ring);
        merged
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_returns_only_events_after_cursor() {
        let bus = EventBus::new();
        bus.publish("call.c1", "ringing", Some("c1".into()), serde_json::json!({}));
        let second = bus.publish("call.c1", "answered", Some("c1".into()), serde_json::json!({}));
        bus.publish("call.c1", "streaming", Some("c1".into()), serde_json::json!({}));

        let replayed = bus.replay_since("call.c1", second.sequence - 1);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].r#type, "answered");
    }

    #[tokio::test]
    async fn subscribers_receive_live_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("inbound");
        bus.publish("inbound", "ringing", None, serde_json::json!({"n": 1}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.r#type, "ringing");
    }
}
