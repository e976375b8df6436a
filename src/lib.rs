//! # Call Orchestration Kernel
//!
//! This crate bridges telephony carriers, a streaming speech layer, and an
//! LLM while exposing a privileged control surface for operators to
//! originate calls, monitor live transcripts, capture DTMF/OTP input, and
//! send multi-channel follow-ups (SMS, email).
//!
//! ## Module Organization
//!
//! - [`ids`] — opaque identifier newtypes shared across the crate.
//! - [`error`] — the crate-wide error taxonomy and HTTP status mapping.
//! - [`config`] — environment-driven configuration tree.
//! - [`persistence`] — append-oriented store for calls, transcripts, and messages.
//! - [`provider`] — uniform adapter interface over carriers, with health tracking.
//! - [`orchestrator`] — the call state machine; the hardest subsystem.
//! - [`digit_capture`] — DTMF/spoken-digit collection, validation, and plans.
//! - [`stream_pump`] — bidirectional carrier media <-> STT/TTS frame pump.
//! - [`notification`] — at-least-once lifecycle event fan-out.
//! - [`event_bus`] — monotonic per-topic event bus with SSE replay.
//! - [`delivery`] — durable SMS/email delivery engine.
//! - [`control_plane`] — HMAC-signed admin RPC surface.
//!
//! ## Example
//!
//! ```no_run
//! use call_orchestrator::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let config = Config::from_env()?;
//! let persistence = Persistence::connect(&config.database.url).await?;
//! persistence.run_migrations().await?;
//! println!("orchestration kernel ready");
//! # Ok(())
//! # }
//! ```

pub mod ids;
pub mod error;
pub mod types;
pub mod config;
pub mod persistence;
pub mod provider;
pub mod orchestrator;
pub mod digit_capture;
pub mod stream_pump;
pub mod notification;
pub mod event_bus;
pub mod delivery;
pub mod control_plane;

/// Convenience re-exports for application code and tests.
pub mod prelude {
    pub use crate::ids::{CallId, MessageId, BulkJobId, SubscriberId, NotificationId};
    pub use crate::error::{OrchestratorError, ErrorKind, Result};
    pub use crate::types::{CallDirection, FailureReason, Priority, Channel, MessageStatus};
    pub use crate::config::Config;
    pub use crate::persistence::Persistence;
    pub use crate::provider::{ProviderAdapter, ProviderRegistry, ProviderHealth};
    pub use crate::orchestrator::{Orchestrator, CallState};
    pub use crate::digit_capture::{DigitCaptureEngine, Profile, Expectation};
    pub use crate::stream_pump::{StreamPump, AudioChunk};
    pub use crate::notification::NotificationFanout;
    pub use crate::event_bus::EventBus;
    pub use crate::delivery::DeliveryEngine;
}
