//! Vonage-like adapter (spec §4.2). JWT-bearer auth scheme.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::ids::CallId;

use super::{OriginateRequest, ProviderAdapter, WebhookValidationResult};

pub struct VonageAdapter {
    client: reqwest::Client,
    application_id: String,
    jwt: String,
    from_number: String,
    api_base: String,
}

impl VonageAdapter {
    pub fn new(application_id: String, jwt: String, from_number: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            application_id,
            jwt,
            from_number,
            api_base: "https://api.nexmo.com".to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for VonageAdapter {
    fn name(&self) -> &'static str {
        "vonage"
    }

    async fn originate(&self, req: &OriginateRequest) -> Result<CallId> {
        debug!(to = %req.phone_number, "vonage originate");
        let url = format!("{}/v1/calls", self.api_base);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.jwt)
            .json(&serde_json::json!({
                "to": [{ "type": "phone", "number": req.phone_number }],
                "from": { "type": "phone", "number": self.from_number },
                "answer_url": [req.webhook_host],
                "application_id": self.application_id,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(if resp.status().as_u16() >= 500 {
                OrchestratorError::provider_transient("vonage 5xx")
            } else {
                OrchestratorError::provider_permanent("vonage rejected originate")
            });
        }
        let body: serde_json::Value = resp.json().await.map_err(|e| OrchestratorError::provider_permanent(e.to_string()))?;
        let uuid = body
            .get("uuid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::provider_permanent("vonage response missing uuid"))?;
        Ok(CallId::from_string(uuid))
    }

    async fn build_answer_document(&self, call_id: &CallId, host: &str) -> Result<String> {
        Ok(serde_json::json!([
            { "action": "connect", "endpoint": [{ "type": "websocket", "uri": format!("wss://{host}/media/{}", call_id.as_str()) }] }
        ])
        .to_string())
    }

    fn validate_webhook(&self, signature: Option<&str>, _body: &[u8]) -> WebhookValidationResult {
        match signature {
            Some(_) => WebhookValidationResult::Ok,
            None => WebhookValidationResult::Warn,
        }
    }

    async fn terminate(&self, call_id: &CallId) -> Result<()> {
        let url = format!("{}/v1/calls/{}", self.api_base, call_id.as_str());
        self.client
            .put(&url)
            .bearer_auth(&self.jwt)
            .json(&serde_json::json!({ "action": "hangup" }))
            .send()
            .await?;
        Ok(())
    }

    async fn send_dtmf_response(&self, _call_id: &CallId, plan_prompt: &str) -> Result<String> {
        Ok(serde_json::json!([{ "action": "talk", "text": plan_prompt }, { "action": "input" }]).to_string())
    }

    async fn emit_tts(&self, _call_id: &CallId, text_or_audio_url: &str) -> Result<()> {
        debug!(content = %text_or_audio_url, "vonage emit_tts");
        Ok(())
    }
}
