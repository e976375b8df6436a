//! Shared closed-variant types used by both `persistence` and `orchestrator`.
//!
//! Centralizing these here avoids the "stringly-typed status column"
//! anti-pattern flagged in spec §9: persistence stores `to_string()` of
//! these enums, never a bare `&str` a caller typed by hand.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The call state machine (spec §4.3). `DigitCapturing` is a nested
/// sub-state of `Streaming`, tracked via its `step` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    Created,
    Dialing,
    Ringing,
    Answered,
    Streaming,
    DigitCapturing { step: u32 },
    Closing,
    Ended,
    Failed { reason: FailureReason },
}

impl CallState {
    /// Total order over states used by the webhook monotonicity guard
    /// (spec §4.3: "apply an event only if its implied state is not
    /// earlier than the current state"). `Failed` is terminal but is not
    /// ordered against the happy path — callers must special-case it.
    pub fn rank(&self) -> u8 {
        match self {
            CallState::Created => 0,
            CallState::Dialing => 1,
            CallState::Ringing => 2,
            CallState::Answered => 3,
            CallState::Streaming => 4,
            CallState::DigitCapturing { .. } => 5,
            CallState::Closing => 6,
            CallState::Ended => 7,
            CallState::Failed { .. } => 255,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed { .. })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            CallState::Created => "created",
            CallState::Dialing => "dialing",
            CallState::Ringing => "ringing",
            CallState::Answered => "answered",
            CallState::Streaming => "streaming",
            CallState::DigitCapturing { .. } => "digit_capturing",
            CallState::Closing => "closing",
            CallState::Ended => "ended",
            CallState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Failed { reason } => write!(f, "failed:{reason}"),
            other => write!(f, "{}", other.tag()),
        }
    }
}

/// Why a call failed. Carried as the `reason` payload of `CallState::Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    NoMedia,
    DigitTimeout,
    AnsweringMachine,
    Permanent,
    AdmissionRejected,
    Internal,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::NoMedia => "no_media",
            FailureReason::DigitTimeout => "digit_timeout",
            FailureReason::AnsweringMachine => "answering_machine",
            FailureReason::Permanent => "permanent",
            FailureReason::AdmissionRejected => "admission_rejected",
            FailureReason::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FailureReason {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "no_media" => FailureReason::NoMedia,
            "digit_timeout" => FailureReason::DigitTimeout,
            "answering_machine" => FailureReason::AnsweringMachine,
            "permanent" => FailureReason::Permanent,
            "admission_rejected" => FailureReason::AdmissionRejected,
            _ => FailureReason::Internal,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if *self == CallDirection::Inbound { "in" } else { "out" })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnsweredBy {
    Human,
    Machine,
    Unknown,
}

impl fmt::Display for AnsweredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnsweredBy::Human => "human",
            AnsweredBy::Machine => "machine",
            AnsweredBy::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Policy for handling answering-machine detection (spec §9 open question).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachinePolicy {
    Hangup,
    Continue,
    VoicemailDrop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "low" => Priority::Low,
            "normal" => Priority::Normal,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Retrying,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sending => "sending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Retrying => "retrying",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => NotificationStatus::Pending,
            "sending" => NotificationStatus::Sending,
            "sent" => NotificationStatus::Sent,
            "failed" => NotificationStatus::Failed,
            "retrying" => NotificationStatus::Retrying,
            _ => return Err(()),
        })
    }
}

/// Lifecycle kind of a notification; drives the tie-break ordering in
/// spec §4.1 (`call_failed` > `call_completed` > `call_transcript`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    CallFailed,
    CallCompleted,
    CallTranscript,
    Other(String),
}

impl NotificationKind {
    pub fn severity(&self) -> u8 {
        match self {
            NotificationKind::CallFailed => 2,
            NotificationKind::CallCompleted => 1,
            NotificationKind::CallTranscript => 0,
            NotificationKind::Other(_) => 0,
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            NotificationKind::CallFailed => "call_failed".to_string(),
            NotificationKind::CallCompleted => "call_completed".to_string(),
            NotificationKind::CallTranscript => "call_transcript".to_string(),
            NotificationKind::Other(s) => s.clone(),
        }
    }
}

impl From<&str> for NotificationKind {
    fn from(s: &str) -> Self {
        match s {
            "call_failed" => NotificationKind::CallFailed,
            "call_completed" => NotificationKind::CallCompleted,
            "call_transcript" => NotificationKind::CallTranscript,
            other => NotificationKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Sms,
    Email,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if *self == Channel::Sms { "sms" } else { "email" })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Queued,
    Sending,
    Sent,
    Retry,
    Failed,
    Delivered,
    Bounced,
    Complained,
    Suppressed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Retry => "retry",
            MessageStatus::Failed => "failed",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Bounced => "bounced",
            MessageStatus::Complained => "complained",
            MessageStatus::Suppressed => "suppressed",
        }
    }

    /// A message is terminal once it leaves the queued/sending/retry
    /// lifecycle (spec §3 invariant: "a Message has exactly one terminal
    /// status"). `delivered`/`bounced`/`complained` are post-sent events
    /// layered on top of `sent`, not reopenings.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Sent
                | MessageStatus::Failed
                | MessageStatus::Delivered
                | MessageStatus::Bounced
                | MessageStatus::Complained
                | MessageStatus::Suppressed
        )
    }
}

impl FromStr for MessageStatus {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queued" => MessageStatus::Queued,
            "sending" => MessageStatus::Sending,
            "sent" => MessageStatus::Sent,
            "retry" => MessageStatus::Retry,
            "failed" => MessageStatus::Failed,
            "delivered" => MessageStatus::Delivered,
            "bounced" => MessageStatus::Bounced,
            "complained" => MessageStatus::Complained,
            "suppressed" => MessageStatus::Suppressed,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuppressionReason {
    Bounce,
    Complaint,
    Manual,
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuppressionReason::Bounce => "bounce",
            SuppressionReason::Complaint => "complaint",
            SuppressionReason::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Masking scheme for `last_otp_masked` (spec §9 open question, resolved
/// in DESIGN.md): keep the first and last character, mask the middle with
/// `*`, minimum mask length of 1.
pub fn mask_otp(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() <= 2 {
        return "*".repeat(chars.len().max(1));
    }
    let first = chars[0];
    let last = *chars.last().unwrap();
    let middle_len = chars.len() - 2;
    format!("{first}{}{last}", "*".repeat(middle_len.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_is_monotonic_along_happy_path() {
        assert!(CallState::Created.rank() < CallState::Dialing.rank());
        assert!(CallState::Dialing.rank() < CallState::Ringing.rank());
        assert!(CallState::Ringing.rank() < CallState::Answered.rank());
        assert!(CallState::Answered.rank() < CallState::Streaming.rank());
        assert!(CallState::Streaming.rank() < CallState::DigitCapturing { step: 0 }.rank());
        assert!(CallState::DigitCapturing { step: 0 }.rank() < CallState::Closing.rank());
        assert!(CallState::Closing.rank() < CallState::Ended.rank());
    }

    #[test]
    fn mask_keeps_first_and_last() {
        assert_eq!(mask_otp("412356"), "4****6");
        assert_eq!(mask_otp("12"), "**");
        assert_eq!(mask_otp("1"), "*");
    }
}
