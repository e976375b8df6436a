//! Twilio Messages API adapter for the SMS channel (spec §4.8).

use async_trait::async_trait;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::persistence::Message;
use crate::types::Channel;

use super::adapter::{classify_http_status, DeliveryAdapter};
use super::template;

pub struct TwilioSmsAdapter {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    api_base: String,
}

impl TwilioSmsAdapter {
    pub fn new(account_sid: String, auth_token: String) -> Self {
        Self { client: reqwest::Client::new(), account_sid, auth_token, api_base: "https://api.twilio.com".to_string() }
    }

    #[cfg(test)]
    pub fn with_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }
}

#[async_trait]
impl DeliveryAdapter for TwilioSmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, message: &Message) -> Result<String> {
        let body = match (&message.text_body, &message.variables) {
            (Some(text), Some(vars)) => template::render(text, vars),
            (Some(text), None) => text.clone(),
            (None, _) => String::new(),
        };

        debug!(to = %message.recipient, "twilio sms send");
        let url = format!("{}/2010-04-01/Accounts/{}/Messages.json", self.api_base, self.account_sid);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", message.recipient.as_str()), ("From", message.sender.as_str()), ("Body", body.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(classify_http_status(resp.status().as_u16(), "twilio"));
        }
        let parsed: serde_json::Value = resp.json().await.map_err(|e| OrchestratorError::provider_permanent(e.to_string()))?;
        parsed
            .get("sid")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::provider_permanent("twilio response missing sid"))
    }
}
