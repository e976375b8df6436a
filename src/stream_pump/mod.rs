//! # Realtime Stream Pump (spec §4.5)
//!
//! Bidirectional carrier media <-> STT/TTS frame pump: reorders inbound
//! frames within a sequence window, paces outbound TTS audio one chunk
//! per tick with mark-ack confirmation, detects barge-in via sustained
//! RMS level, and emits a periodic `audiotick` so subscribers can track
//! playback progress without polling.

mod audio;
mod pump;
mod reorder;

pub use pump::{AudioChunk, StreamPump};
