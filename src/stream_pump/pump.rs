//! Per-call realtime media pump (spec §4.5): one cooperative task per
//! streaming call, same shape as the orchestrator's per-call task -
//! bounded inbox, exclusively-owned mutable state, no cross-task
//! locking. Grounded on `media-core`'s `MediaSession` (per-session
//! mutable state, `mpsc` event channels, `Instant`-based timers).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::StreamPumpConfig;
use crate::error::{OrchestratorError, Result};
use crate::event_bus::EventBus;
use crate::ids::CallId;

use super::audio;
use super::reorder::ReorderBuffer;

const INBOX_CAPACITY: usize = 256;

/// One chunk of synthesized speech audio, optionally carrying a named
/// mark the carrier echoes back once it finishes playing this chunk.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub payload: Vec<u8>,
    pub mark: Option<String>,
}

#[derive(Debug)]
enum StreamCommand {
    Inbound { sequence: u64, payload: Vec<u8> },
    MarkAck { name: String },
    Enqueue { chunks: Vec<AudioChunk> },
    Flush,
}

struct PumpRuntime {
    reorder: ReorderBuffer<Vec<u8>>,
    outbound: VecDeque<AudioChunk>,
    utterance_total: usize,
    utterance_sent: usize,
    speaking: bool,
    last_level: f32,
    hold_since: Option<Instant>,
    barge_in_fired: bool,
    frame_index: u64,
}

impl PumpRuntime {
    fn new(reorder_window: usize) -> Self {
        Self {
            reorder: ReorderBuffer::new(0, reorder_window),
            outbound: VecDeque::new(),
            utterance_total: 0,
            utterance_sent: 0,
            speaking: false,
            last_level: 0.0,
            hold_since: None,
            barge_in_fired: false,
            frame_index: 0,
        }
    }
}

/// Owns one [`mpsc`] sender per live streaming call. Mirrors the
/// orchestrator's `active: DashMap<CallId, Sender<CallCommand>>`
/// pattern: the map holds only a handle, never the call's state.
pub struct StreamPump {
    event_bus: Arc<EventBus>,
    config: StreamPumpConfig,
    active: DashMap<CallId, mpsc::Sender<StreamCommand>>,
}

fn topic_for(call_id: &CallId) -> String {
    format!("call.{call_id}")
}

impl StreamPump {
    pub fn new(event_bus: Arc<EventBus>, config: StreamPumpConfig) -> Self {
        Self { event_bus, config, active: DashMap::new() }
    }

    /// Start pumping media for `call_id`. Called once the call reaches
    /// `STREAMING`; a no-op if already spawned.
    pub fn spawn_call(&self, call_id: CallId) {
        if self.active.contains_key(&call_id) {
            return;
        }
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.active.insert(call_id.clone(), tx);
        let event_bus = self.event_bus.clone();
        let config = self.config.clone();
        tokio::spawn(run_pump_task(call_id, event_bus, config, rx));
    }

    pub fn is_active(&self, call_id: &CallId) -> bool {
        self.active.contains_key(call_id)
    }

    /// Stop pumping for `call_id` (spec §4.5 "honours cancellation
    /// within one tick"). The task drains its inbox and exits on the
    /// next tick after the channel closes.
    pub fn stop_call(&self, call_id: &CallId) {
        self.active.remove(call_id);
    }

    /// Feed one inbound frame of raw mu-law audio, tagged with its
    /// carrier-assigned sequence number.
    pub async fn feed_inbound(&self, call_id: &CallId, sequence: u64, payload: Vec<u8>) -> Result<()> {
        self.send(call_id, StreamCommand::Inbound { sequence, payload }).await
    }

    /// Queue a synthesized utterance for outbound playback.
    pub async fn enqueue_utterance(&self, call_id: &CallId, chunks: Vec<AudioChunk>) -> Result<()> {
        self.send(call_id, StreamCommand::Enqueue { chunks }).await
    }

    /// Record that the carrier finished playing a previously sent mark.
    pub async fn ack_mark(&self, call_id: &CallId, name: String) -> Result<()> {
        self.send(call_id, StreamCommand::MarkAck { name }).await
    }

    /// Immediately flush any queued outbound audio (e.g. the
    /// orchestrator ending the call early).
    pub async fn flush(&self, call_id: &CallId) -> Result<()> {
        self.send(call_id, StreamCommand::Flush).await
    }

    async fn send(&self, call_id: &CallId, cmd: StreamCommand) -> Result<()> {
        let sender = self
            .active
            .get(call_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| OrchestratorError::not_found(format!("no active stream pump for call {call_id}")))?;
        sender
            .send(cmd)
            .await
            .map_err(|_| OrchestratorError::internal("stream pump task not listening"))
    }
}

async fn run_pump_task(
    call_id: CallId,
    event_bus: Arc<EventBus>,
    config: StreamPumpConfig,
    mut rx: mpsc::Receiver<StreamCommand>,
) {
    let mut runtime = PumpRuntime::new(config.reorder_window);
    let mut ticker = tokio::time::interval(config.audio_tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_cmd = rx.recv() => {
                match maybe_cmd {
                    Some(cmd) => handle_command(&call_id, &event_bus, &config, &mut runtime, cmd),
                    None => break,
                }
            }
            _ = ticker.tick() => {
                on_tick(&call_id, &event_bus, &mut runtime);
            }
        }
    }

    debug!(call_id = %call_id, "stream pump task exiting");
}

fn handle_command(
    call_id: &CallId,
    event_bus: &Arc<EventBus>,
    config: &StreamPumpConfig,
    runtime: &mut PumpRuntime,
    cmd: StreamCommand,
) {
    match cmd {
        StreamCommand::Inbound { sequence, payload } => {
            for (_, frame) in runtime.reorder.push(sequence, payload) {
                process_inbound_frame(call_id, event_bus, config, runtime, &frame);
            }
        }
        StreamCommand::MarkAck { name } => {
            event_bus.publish(&topic_for(call_id), "audiosent", Some(call_id.to_string()), json!({"mark": name}));
        }
        StreamCommand::Enqueue { chunks } => {
            runtime.utterance_total += chunks.len();
            runtime.outbound.extend(chunks);
            runtime.speaking = true;
            runtime.barge_in_fired = false;
        }
        StreamCommand::Flush => flush_outbound(call_id, event_bus, runtime, "flush_requested"),
    }
}

fn process_inbound_frame(
    call_id: &CallId,
    event_bus: &Arc<EventBus>,
    config: &StreamPumpConfig,
    runtime: &mut PumpRuntime,
    frame: &[u8],
) {
    let level = audio::rms_level(frame);
    runtime.last_level = level;

    if level >= config.user_level_threshold {
        let since = *runtime.hold_since.get_or_insert_with(Instant::now);
        if !runtime.barge_in_fired && runtime.speaking && since.elapsed() >= config.user_hold_ms {
            runtime.barge_in_fired = true;
            flush_outbound(call_id, event_bus, runtime, "barge_in");
        }
    } else {
        runtime.hold_since = None;
    }
}

fn flush_outbound(call_id: &CallId, event_bus: &Arc<EventBus>, runtime: &mut PumpRuntime, reason: &str) {
    let dropped = runtime.outbound.len();
    runtime.outbound.clear();
    runtime.speaking = false;
    runtime.utterance_total = 0;
    runtime.utterance_sent = 0;
    if dropped > 0 {
        event_bus.publish(
            &topic_for(call_id),
            "call.barge_in",
            Some(call_id.to_string()),
            json!({"reason": reason, "frames_dropped": dropped}),
        );
    }
}

fn on_tick(call_id: &CallId, event_bus: &Arc<EventBus>, runtime: &mut PumpRuntime) {
    if runtime.speaking {
        if let Some(chunk) = runtime.outbound.pop_front() {
            runtime.utterance_sent += 1;
            if let Some(mark) = chunk.mark {
                event_bus.publish(&topic_for(call_id), "mark_sent", Some(call_id.to_string()), json!({"mark": mark}));
            }
            if runtime.outbound.is_empty() {
                runtime.speaking = false;
            }
        }
    }

    runtime.frame_index += 1;
    let progress = if runtime.utterance_total > 0 {
        runtime.utterance_sent as f32 / runtime.utterance_total as f32
    } else {
        0.0
    };
    event_bus.publish(
        &topic_for(call_id),
        "audiotick",
        Some(call_id.to_string()),
        json!({
            "level": runtime.last_level,
            "progress": progress,
            "frameIndex": runtime.frame_index,
            "frames": runtime.utterance_total,
        }),
    );
}
