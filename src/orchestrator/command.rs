//! Per-call cooperative task: the command inbox and in-memory runtime
//! state a call's owning task holds exclusively (spec §5 "one
//! cooperative task owning a call's in-memory state, bounded inbox").
//! Structural precedent: the teacher's `active_calls:
//! Arc<DashMap<SessionId, CallInfo>>`, generalized here to hold a command
//! sender per call instead of the call state itself - the state lives
//! inside the task, not shared.

use chrono::{DateTime, Utc};

use crate::digit_capture::CollectionPlan;
use crate::provider::CarrierEvent;
use crate::types::CallState;

/// Bounded inbox capacity per call (spec §5).
pub const INBOX_CAPACITY: usize = 128;

#[derive(Debug)]
pub enum CallCommand {
    Carrier(CarrierEvent),
    InstallPlan(Box<CollectionPlan>),
    DigitInput { source: String, digits: String, saw_terminator: bool },
    InjectScript(String),
    SttFailure,
    FirstMediaReceived,
    EndRequested,
    /// Raised on `ENDED`; drains the inbox and flushes timers (spec §5).
    Cancel,
}

/// Mutable state a call's owning task holds exclusively; never shared
/// across tasks (spec §5 "no two tasks mutate a call's in-memory state
/// concurrently").
pub struct CallRuntime {
    pub state: CallState,
    pub originate_attempts: u32,
    pub dialing_started_at: Option<DateTime<Utc>>,
    pub ringing_started_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub first_media_deadline: Option<DateTime<Utc>>,
    pub consecutive_stt_failures: u32,
    pub digit_plan: Option<CollectionPlan>,
    pub digit_step: usize,
}

impl CallRuntime {
    pub fn new() -> Self {
        Self {
            state: CallState::Created,
            originate_attempts: 0,
            dialing_started_at: None,
            ringing_started_at: None,
            answered_at: None,
            first_media_deadline: None,
            consecutive_stt_failures: 0,
            digit_plan: None,
            digit_step: 0,
        }
    }

}

impl Default for CallRuntime {
    fn default() -> Self {
        Self::new()
    }
}
