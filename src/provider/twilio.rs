//! Twilio-like adapter (spec §4.2). A thin simulator over an HTTP client:
//! talks to a configured base URL using the vendor's documented shapes,
//! but none of the vendor-specific vocabulary leaks past this file.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::ids::CallId;

use super::{CarrierEvent, OriginateRequest, ProviderAdapter, WebhookValidationResult};

pub struct TwilioAdapter {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    api_base: String,
}

impl TwilioAdapter {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid,
            auth_token,
            from_number,
            api_base: "https://api.twilio.com".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }
}

#[async_trait]
impl ProviderAdapter for TwilioAdapter {
    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn originate(&self, req: &OriginateRequest) -> Result<CallId> {
        debug!(to = %req.phone_number, "twilio originate");
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base, self.account_sid
        );
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", req.phone_number.as_str()),
                ("From", self.from_number.as_str()),
                ("Url", req.webhook_host.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(classify_http_status(resp.status().as_u16()));
        }
        let body: serde_json::Value = resp.json().await.map_err(|e| OrchestratorError::provider_permanent(e.to_string()))?;
        let sid = body
            .get("sid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::provider_permanent("twilio response missing sid"))?;
        Ok(CallId::from_string(sid))
    }

    async fn build_answer_document(&self, call_id: &CallId, host: &str) -> Result<String> {
        Ok(format!(
            "<Response><Connect><Stream url=\"wss://{host}/media/{}\"/></Connect></Response>",
            call_id.as_str()
        ))
    }

    fn validate_webhook(&self, signature: Option<&str>, body: &[u8]) -> WebhookValidationResult {
        let Some(sig) = signature else { return WebhookValidationResult::Fail };
        let mut mac = match Hmac::<Sha256>::new_from_slice(self.auth_token.as_bytes()) {
            Ok(m) => m,
            Err(_) => return WebhookValidationResult::Fail,
        };
        mac.update(body);
        let expected = hex::encode(mac.finalize().into_bytes());
        if expected.eq_ignore_ascii_case(sig) {
            WebhookValidationResult::Ok
        } else {
            WebhookValidationResult::Fail
        }
    }

    async fn terminate(&self, call_id: &CallId) -> Result<()> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_id.as_str()
        );
        self.client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await?;
        Ok(())
    }

    async fn send_dtmf_response(&self, call_id: &CallId, plan_prompt: &str) -> Result<String> {
        Ok(format!(
            "<Response><Say>{plan_prompt}</Say><Gather call=\"{}\"/></Response>",
            call_id.as_str()
        ))
    }

    async fn emit_tts(&self, _call_id: &CallId, text_or_audio_url: &str) -> Result<()> {
        debug!(content = %text_or_audio_url, "twilio emit_tts");
        Ok(())
    }
}

fn classify_http_status(status: u16) -> OrchestratorError {
    if status == 429 || (500..600).contains(&status) {
        OrchestratorError::provider_transient(format!("twilio returned {status}"))
    } else {
        OrchestratorError::provider_permanent(format!("twilio returned {status}"))
    }
}

/// Parse an inbound Twilio-style webhook body into the provider-neutral
/// envelope (spec §6).
pub fn normalize_webhook(call_id: CallId, event_type: &str, payload: serde_json::Value) -> CarrierEvent {
    CarrierEvent {
        provider: "twilio".to_string(),
        event_type: event_type.to_string(),
        call_id,
        payload,
    }
}
