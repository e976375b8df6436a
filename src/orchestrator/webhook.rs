//! Webhook reconciliation: dedupe + monotonicity guard (spec §4.3).
//!
//! Carrier events arrive out-of-order and may duplicate. Deduplication
//! happens first (2s window, keyed by `(call_id, event_type,
//! carrier_event_seq_or_hash)`, or `(call_id, digits_payload)` for
//! gather webhooks); then an event is applied only if its implied state
//! is not earlier than the current state in the total order defined by
//! `CallState::rank()`.

use chrono::Duration;

use crate::types::CallState;

pub const DEDUPE_WINDOW: Duration = Duration::seconds(2);

/// Whether `incoming` may be applied on top of `current` (spec §4.3
/// monotonicity guard). `Failed` is terminal and always rejects further
/// application once reached, matching the "terminal state accepts no
/// further transitions except post_terminal_event" invariant (spec §3).
pub fn may_apply(current: &CallState, incoming: &CallState) -> bool {
    if current.is_terminal() {
        return false;
    }
    incoming.rank() >= current.rank()
}

/// Build the dedupe key for a carrier event (spec §4.3: "Deduplicate
/// (call_id, event_type, carrier_event_seq_or_hash) inside a 2s window").
pub fn event_dedupe_key(event_type: &str, carrier_event_seq_or_hash: &str) -> String {
    format!("{event_type}:{carrier_event_seq_or_hash}")
}

/// Dedupe key for a DTMF-gather webhook (spec §4.3: "Gather-webhook
/// dedupe key is (call_id, digits_payload)").
pub fn gather_dedupe_key(digits_payload: &str) -> String {
    format!("gather:{digits_payload}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureReason;

    #[test]
    fn rejects_backwards_transition() {
        assert!(!may_apply(&CallState::Answered, &CallState::Dialing));
    }

    #[test]
    fn allows_forward_transition() {
        assert!(may_apply(&CallState::Dialing, &CallState::Ringing));
    }

    #[test]
    fn terminal_state_rejects_everything() {
        assert!(!may_apply(&CallState::Ended, &CallState::Ended));
        assert!(!may_apply(&CallState::Failed { reason: FailureReason::NoMedia }, &CallState::Ended));
    }

    #[test]
    fn allows_same_state_reapplication() {
        // Idempotent replays of the same event keep rank equal; not
        // "earlier", so the guard still permits it.
        assert!(may_apply(&CallState::Ringing, &CallState::Ringing));
    }
}
