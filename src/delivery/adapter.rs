//! Delivery adapter capability trait (spec §4.8), same shape as
//! `provider::ProviderAdapter`: the engine depends on this interface,
//! never on a concrete vendor.

use async_trait::async_trait;

use crate::error::Result;
use crate::persistence::Message;
use crate::types::Channel;

#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// Send `message` and return the vendor's message id on success.
    /// Transient failures (429/5xx/network) must be classified
    /// `provider_transient`; anything else `provider_permanent` so the
    /// worker loop's retry-vs-DLQ decision (spec §4.8 step 5) is correct.
    async fn send(&self, message: &Message) -> Result<String>;
}

pub(super) fn classify_http_status(status: u16, vendor: &str) -> crate::error::OrchestratorError {
    if status == 429 || (500..600).contains(&status) {
        crate::error::OrchestratorError::provider_transient(format!("{vendor} returned {status}"))
    } else {
        crate::error::OrchestratorError::provider_permanent(format!("{vendor} returned {status}"))
    }
}
