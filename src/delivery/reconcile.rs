//! Provider webhook reconciliation: normalize vendor delivery events and
//! apply them forward-only (spec §4.8: "a message only ever advances
//! `sent -> {delivered, bounced, complained}`; never reopens a terminal
//! failure/suppression").
//!
//! `MessageStatus::is_terminal()` can't gate this by itself - it already
//! treats `sent` as terminal for the worker loop's purposes, but `sent`
//! is exactly the state this module needs to advance past. Ranks below
//! give the reconciler its own forward-only order.

use tracing::warn;

use crate::error::Result;
use crate::persistence::Persistence;
use crate::types::MessageStatus;

/// Normalized outcome a vendor webhook maps onto, independent of
/// Twilio/SendGrid/SES's own status vocabularies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEvent {
    Delivered,
    Bounced,
    /// SendGrid's own `complained` maps straight here; providers that
    /// only expose `unsubscribed` (no distinct complaint signal) are
    /// treated the same way - both mean "stop sending to this address".
    Complained,
    Failed,
}

impl ProviderEvent {
    fn target_status(self) -> MessageStatus {
        match self {
            ProviderEvent::Delivered => MessageStatus::Delivered,
            ProviderEvent::Bounced => MessageStatus::Bounced,
            ProviderEvent::Complained => MessageStatus::Complained,
            ProviderEvent::Failed => MessageStatus::Failed,
        }
    }
}

fn rank(status: MessageStatus) -> u8 {
    match status {
        MessageStatus::Queued | MessageStatus::Sending | MessageStatus::Retry => 0,
        MessageStatus::Sent => 1,
        MessageStatus::Delivered | MessageStatus::Bounced | MessageStatus::Complained => 2,
        MessageStatus::Failed | MessageStatus::Suppressed => 3,
    }
}

/// Apply a normalized provider event to the message identified by its
/// vendor message id. No-ops (without error) if the message isn't
/// found, the event's rank doesn't strictly exceed the current one, or
/// the message is already at a terminal rank above `sent`.
pub async fn reconcile_provider_event(
    persistence: &Persistence,
    provider_message_id: &str,
    event: ProviderEvent,
) -> Result<()> {
    let Some(message) = persistence.find_message_by_provider_id(provider_message_id).await? else {
        warn!(provider_message_id, "provider event for unknown message");
        return Ok(());
    };

    let target = event.target_status();
    if rank(target) <= rank(message.status) {
        return Ok(());
    }

    persistence
        .update_message_status(&message.message_id, target, message.retry_count, message.next_attempt_at, None)
        .await?;

    if matches!(event, ProviderEvent::Bounced | ProviderEvent::Complained) {
        let reason = if event == ProviderEvent::Bounced { "bounce" } else { "complaint" };
        persistence.set_suppression(&message.recipient, reason, "provider_webhook").await?;
    }

    // `sent` already moved the bulk counter out of `queued`/`retrying` at
    // send time; only bounce/complaint/failure need a further move, since
    // those count against the job's `failed` bucket.
    if matches!(target, MessageStatus::Bounced | MessageStatus::Complained | MessageStatus::Failed) {
        if let Some(job_id) = &message.bulk_job_id {
            persistence.move_bulk_job_counter(job_id.as_str(), "sent", "failed").await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivered_outranks_sent_but_not_bounced() {
        assert!(rank(MessageStatus::Delivered) > rank(MessageStatus::Sent));
        assert_eq!(rank(MessageStatus::Bounced), rank(MessageStatus::Delivered));
        assert!(rank(MessageStatus::Failed) > rank(MessageStatus::Delivered));
    }
}
