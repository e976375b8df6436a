//! # Digit Capture Engine (spec §4.4)
//!
//! Accepts digits from carrier DTMF-gather and inline spoken-digit
//! recognition, normalizes, validates against a [`Profile`], manages
//! multi-step [`CollectionPlan`]s, and signals success/failure back to the
//! orchestrator. `Expectation` lives in-memory in a
//! `DashMap<CallId, Expectation>` (spec invariant: at most one active per
//! call), persisted as the latest `call_state` row on every change -
//! the teacher's dual in-memory-`DashMap` + async-database pattern
//! (`active_calls: DashMap`, `DatabaseManager`) generalized here.

pub mod crypto;
pub mod plan;
pub mod speech;

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::ids::{CallId, PlanId};

pub use plan::CollectionPlan;

/// Validation ruleset for a digit input (spec §4.4 "Profiles").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    Generic,
    Verification,
    Card,
    Cvv,
    Banking,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Generic => "generic",
            Profile::Verification => "verification",
            Profile::Card => "card",
            Profile::Cvv => "cvv",
            Profile::Banking => "banking",
        }
    }

    /// Profile-specific checksum/parity validator, applied after length
    /// and terminator checks pass (spec §4.4 "Acceptance rule").
    fn validate_checksum(&self, digits: &str) -> std::result::Result<(), &'static str> {
        match self {
            Profile::Card => {
                if luhn_checksum_valid(digits) {
                    Ok(())
                } else {
                    Err("invalid_checksum")
                }
            }
            Profile::Cvv => {
                if digits.len() == 3 || digits.len() == 4 {
                    Ok(())
                } else {
                    Err("wrong_length")
                }
            }
            _ => Ok(()),
        }
    }
}

fn luhn_checksum_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    let mut double = false;
    for ch in digits.chars().rev() {
        let Some(mut d) = ch.to_digit(10) else { return false };
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    sum % 10 == 0
}

/// Why a digit buffer was accepted or rejected (spec §4.4 "Acceptance
/// rule").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptanceReason {
    Ok,
    WrongLength,
    InvalidChecksum,
    BadCharacter,
}

impl AcceptanceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptanceReason::Ok => "ok",
            AcceptanceReason::WrongLength => "wrong_length",
            AcceptanceReason::InvalidChecksum => "invalid_checksum",
            AcceptanceReason::BadCharacter => "bad_character",
        }
    }
}

/// The currently-expected input on a call (spec §3 Expectation entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expectation {
    pub profile: Profile,
    pub min_len: usize,
    pub max_len: usize,
    pub terminator: Option<char>,
    pub retries: u32,
    pub max_retries: u32,
    pub end_call_on_success: bool,
    pub prompt: String,
    pub reprompt: Vec<String>,
    pub failure_message: String,
    pub plan_id: Option<PlanId>,
    pub plan_step_index: Option<usize>,
    pub created_at: DateTime<Utc>,

    #[serde(skip)]
    buffer: String,
    #[serde(skip)]
    last_digit_at: Option<DateTime<Utc>>,
}

impl Expectation {
    pub fn new(profile: Profile, min_len: usize, max_len: usize, prompt: impl Into<String>) -> Self {
        Self {
            profile,
            min_len,
            max_len,
            terminator: Some('#'),
            retries: 0,
            max_retries: 3,
            end_call_on_success: false,
            prompt: prompt.into(),
            reprompt: default_reprompts(profile),
            failure_message: "Sorry, I couldn't get that. Let's move on.".to_string(),
            plan_id: None,
            plan_step_index: None,
            created_at: Utc::now(),
            buffer: String::new(),
            last_digit_at: None,
        }
    }

    fn has_terminator_signal(&self, saw_terminator: bool) -> bool {
        self.terminator.is_none() || saw_terminator
    }

    /// Evaluate the acceptance rule against the full buffer (spec §4.4).
    fn evaluate(&self, digits: &str) -> std::result::Result<(), AcceptanceReason> {
        if digits.chars().any(|c| !c.is_ascii_digit()) {
            return Err(AcceptanceReason::BadCharacter);
        }
        if digits.len() < self.min_len || digits.len() > self.max_len {
            return Err(AcceptanceReason::WrongLength);
        }
        self.profile.validate_checksum(digits).map_err(|reason| match reason {
            "wrong_length" => AcceptanceReason::WrongLength,
            _ => AcceptanceReason::InvalidChecksum,
        })
    }

    pub fn next_reprompt(&self) -> &str {
        let idx = (self.retries as usize).min(self.reprompt.len().saturating_sub(1));
        self.reprompt.get(idx).map(|s| s.as_str()).unwrap_or("Let's try once more.")
    }
}

fn default_reprompts(profile: Profile) -> Vec<String> {
    match profile {
        Profile::Verification => vec![
            "Please enter the 6-digit code, ending with #.".to_string(),
            "Let's try once more - slowly, please enter the code ending with #.".to_string(),
            "One more try. Enter the code now.".to_string(),
        ],
        Profile::Card => vec![
            "Please enter your card number, ending with #.".to_string(),
            "Let's try once more - slowly, enter your card number.".to_string(),
            "One more try. Enter your card number now.".to_string(),
        ],
        _ => vec![
            "Please enter the digits, ending with #.".to_string(),
            "Let's try once more - slowly, please.".to_string(),
            "One more try.".to_string(),
        ],
    }
}

/// Outcome of feeding a digit source into the engine.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// Accepted and plan has more steps; the caller should install
    /// `next` as the new active Expectation.
    AcceptedNextStep { digits: String, next: Box<Expectation> },
    /// Accepted and this was the plan's last step (or no plan).
    AcceptedComplete { digits: String, end_call: bool, completion_message: Option<String> },
    /// Rejected; caller should play `reprompt` if retries remain.
    Rejected { reason: AcceptanceReason, reprompt: Option<String> },
    /// Exhausted retries or timed out; caller transitions to `FAILED(digit_timeout)`.
    Fallback { failure_message: String },
    /// No active expectation for this call - nothing to do.
    NoActiveExpectation,
    /// This event was a duplicate of one already processed inside the
    /// dual-sourcing dedupe window (spec §4.4 "Dual sourcing").
    DuplicateIgnored,
}

struct DedupeEntry {
    digits: String,
    seen_at: DateTime<Utc>,
}

/// Owns every call's active [`Expectation`] and the dual-sourcing dedupe
/// window. One engine instance is shared across all per-call tasks.
pub struct DigitCaptureEngine {
    active: DashMap<CallId, Expectation>,
    dedupe: DashMap<CallId, DedupeEntry>,
    dedupe_window: Duration,
    inter_digit_timeout: Duration,
    overall_timeout: Duration,
}

impl DigitCaptureEngine {
    pub fn new(inter_digit_timeout: Duration, overall_timeout: Duration) -> Self {
        Self {
            active: DashMap::new(),
            dedupe: DashMap::new(),
            dedupe_window: Duration::from_secs(2),
            inter_digit_timeout,
            overall_timeout,
        }
    }

    pub fn install(&self, call_id: CallId, expectation: Expectation) {
        self.active.insert(call_id, expectation);
    }

    pub fn clear(&self, call_id: &CallId) {
        self.active.remove(call_id);
    }

    pub fn active_expectation(&self, call_id: &CallId) -> Option<Expectation> {
        self.active.get(call_id).map(|e| e.clone())
    }

    /// Feed a complete digit buffer from either source (spec §4.4 "Dual
    /// sourcing": carrier gather webhook or spoken-digit normalization -
    /// both paths funnel through here). `source` is `"dtmf"`, `"gather"`,
    /// or `"spoken"`. `plan`/`step_index` identify the owning
    /// [`CollectionPlan`] and the currently active step within it, if
    /// any, so a non-final step acceptance can advance instead of
    /// completing (spec §4.4 "Multi-step plan").
    pub fn feed(
        &self,
        call_id: &CallId,
        source: &str,
        digits: &str,
        saw_terminator: bool,
        plan: Option<&CollectionPlan>,
        step_index: usize,
    ) -> CaptureOutcome {
        if self.is_duplicate(call_id, digits) {
            debug!(call_id = %call_id, source, "ignored_duplicate digit event");
            return CaptureOutcome::DuplicateIgnored;
        }

        let Some(mut entry) = self.active.get_mut(call_id) else {
            return CaptureOutcome::NoActiveExpectation;
        };

        if !entry.has_terminator_signal(saw_terminator) {
            // Still accumulating; caller keeps buffering until terminator
            // or overall timeout fires.
            return CaptureOutcome::Rejected { reason: AcceptanceReason::WrongLength, reprompt: None };
        }

        match entry.evaluate(digits) {
            Ok(()) => {
                entry.retries = 0;
                match plan {
                    Some(plan) if !plan.is_last_step(step_index) => {
                        let next = plan.expectation_for_step(step_index + 1).expect("step_index+1 is within the plan");
                        CaptureOutcome::AcceptedNextStep { digits: digits.to_string(), next: Box::new(next) }
                    }
                    Some(plan) => CaptureOutcome::AcceptedComplete {
                        digits: digits.to_string(),
                        end_call: entry.end_call_on_success,
                        completion_message: Some(plan.completion_message.clone()),
                    },
                    None => CaptureOutcome::AcceptedComplete {
                        digits: digits.to_string(),
                        end_call: entry.end_call_on_success,
                        completion_message: None,
                    },
                }
            }
            Err(reason) => {
                entry.retries += 1;
                if entry.retries >= entry.max_retries {
                    CaptureOutcome::Fallback { failure_message: entry.failure_message.clone() }
                } else {
                    let reprompt = entry.next_reprompt().to_string();
                    warn!(call_id = %call_id, reason = reason.as_str(), "digit buffer rejected");
                    CaptureOutcome::Rejected { reason, reprompt: Some(reprompt) }
                }
            }
        }
    }

    fn is_duplicate(&self, call_id: &CallId, digits: &str) -> bool {
        let now = Utc::now();
        if let Some(existing) = self.dedupe.get(call_id) {
            let elapsed = now - existing.seen_at;
            if existing.digits == digits && elapsed < chrono::Duration::from_std(self.dedupe_window).unwrap() {
                return true;
            }
        }
        self.dedupe.insert(call_id.clone(), DedupeEntry { digits: digits.to_string(), seen_at: now });
        false
    }

    pub fn inter_digit_timeout(&self) -> Duration {
        self.inter_digit_timeout
    }

    pub fn overall_timeout(&self) -> Duration {
        self.overall_timeout
    }

    /// Serialize the active Expectation for persistence as the latest
    /// `call_state` row (spec §4.1).
    pub fn snapshot(&self, call_id: &CallId) -> Option<Value> {
        self.active.get(call_id).and_then(|e| serde_json::to_value(&*e).ok())
    }
}

/// Normalize spoken-digit text into a digit string, e.g. `"one two triple
/// three"` -> `"12333"` (spec §4.4 "Dual sourcing").
pub fn normalize_spoken_digits(text: &str) -> Result<String> {
    speech::normalize(text).map_err(OrchestratorError::validation)
}

impl Clone for Expectation {
    fn clone(&self) -> Self {
        Self {
            profile: self.profile,
            min_len: self.min_len,
            max_len: self.max_len,
            terminator: self.terminator,
            retries: self.retries,
            max_retries: self.max_retries,
            end_call_on_success: self.end_call_on_success,
            prompt: self.prompt.clone(),
            reprompt: self.reprompt.clone(),
            failure_message: self.failure_message.clone(),
            plan_id: self.plan_id.clone(),
            plan_step_index: self.plan_step_index,
            created_at: self.created_at,
            buffer: self.buffer.clone(),
            last_digit_at: self.last_digit_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn engine() -> DigitCaptureEngine {
        DigitCaptureEngine::new(StdDuration::from_secs(5), StdDuration::from_secs(30))
    }

    #[test]
    fn accepts_exact_min_len_with_terminator() {
        let e = engine();
        let call = CallId::new();
        e.install(call.clone(), Expectation::new(Profile::Verification, 6, 6, "enter code"));
        let outcome = e.feed(&call, "dtmf", "412356", true, None, 0);
        assert!(matches!(outcome, CaptureOutcome::AcceptedComplete { .. }));
    }

    #[test]
    fn rejects_min_len_minus_one() {
        let e = engine();
        let call = CallId::new();
        e.install(call.clone(), Expectation::new(Profile::Verification, 6, 6, "enter code"));
        let outcome = e.feed(&call, "dtmf", "41235", true, None, 0);
        match outcome {
            CaptureOutcome::Rejected { reason, .. } => assert_eq!(reason, AcceptanceReason::WrongLength),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_digit_character() {
        let e = engine();
        let call = CallId::new();
        e.install(call.clone(), Expectation::new(Profile::Verification, 6, 6, "enter code"));
        let outcome = e.feed(&call, "dtmf", "41235X", true, None, 0);
        match outcome {
            CaptureOutcome::Rejected { reason, .. } => assert_eq!(reason, AcceptanceReason::BadCharacter),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn luhn_validates_card_numbers() {
        let e = engine();
        let call = CallId::new();
        e.install(call.clone(), Expectation::new(Profile::Card, 16, 16, "enter card"));
        // A well-known Luhn-valid test number.
        let outcome = e.feed(&call, "dtmf", "4111111111111111", true, None, 0);
        assert!(matches!(outcome, CaptureOutcome::AcceptedComplete { .. }));
    }

    #[test]
    fn dedupe_suppresses_second_occurrence_within_window() {
        let e = engine();
        let call = CallId::new();
        e.install(call.clone(), Expectation::new(Profile::Generic, 4, 4, "enter pin"));
        let first = e.feed(&call, "dtmf", "4123", true, None, 0);
        assert!(matches!(first, CaptureOutcome::AcceptedComplete { .. }));
        // Re-install since the first acceptance would normally clear it;
        // the point here is exercising the dedupe path directly.
        e.install(call.clone(), Expectation::new(Profile::Generic, 4, 4, "enter pin"));
        let second = e.feed(&call, "dtmf", "4123", true, None, 0);
        assert!(matches!(second, CaptureOutcome::DuplicateIgnored));
    }

    #[test]
    fn fallback_after_max_retries() {
        let e = engine();
        let call = CallId::new();
        let mut exp = Expectation::new(Profile::Generic, 4, 4, "enter pin");
        exp.max_retries = 2;
        e.install(call.clone(), exp);
        e.feed(&call, "dtmf", "12", true, None, 0);
        let outcome = e.feed(&call, "dtmf", "1X", true, None, 0);
        assert!(matches!(outcome, CaptureOutcome::Fallback { .. }));
    }

    #[test]
    fn multi_step_plan_advances_then_completes() {
        let e = engine();
        let call = CallId::new();
        let plan = plan::CollectionPlan::new(
            "card_capture",
            vec![
                plan::PlanStep { profile: Profile::Card, min_len: 16, max_len: 16, step_prompt: "card number".into() },
                plan::PlanStep { profile: Profile::Cvv, min_len: 3, max_len: 4, step_prompt: "cvv".into() },
            ],
            "Thanks, all set.",
        );
        e.install(call.clone(), plan.expectation_for_step(0).unwrap());

        let outcome = e.feed(&call, "dtmf", "4111111111111111", true, Some(&plan), 0);
        let next = match outcome {
            CaptureOutcome::AcceptedNextStep { digits, next } => {
                assert_eq!(digits, "4111111111111111");
                next
            }
            other => panic!("expected AcceptedNextStep, got {other:?}"),
        };
        assert_eq!(next.plan_step_index, Some(1));
        e.install(call.clone(), *next);

        let outcome = e.feed(&call, "dtmf", "123", true, Some(&plan), 1);
        match outcome {
            CaptureOutcome::AcceptedComplete { digits, completion_message, .. } => {
                assert_eq!(digits, "123");
                assert_eq!(completion_message.as_deref(), Some("Thanks, all set."));
            }
            other => panic!("expected AcceptedComplete, got {other:?}"),
        }
    }
}
