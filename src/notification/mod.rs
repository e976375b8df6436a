//! # Notification Fan-out (spec §4.6)
//!
//! At-least-once lifecycle event delivery: `Orchestrator` enqueues rows
//! via `persistence::upsert_notification`; this module drains them on a
//! timer and routes each to its subscriber's channel, retrying with
//! backoff up to a hard cap.

mod fanout;
mod sink;

pub use fanout::NotificationFanout;
pub use sink::{NotificationSink, Subscriber, WebhookSink};
