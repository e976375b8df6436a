//! AWS-Connect-like adapter (spec §4.2). Uses a signed-header scheme
//! instead of Twilio's basic auth, demonstrating that `ProviderAdapter`
//! hides the per-vendor auth shape entirely from the orchestrator.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::ids::CallId;

use super::{OriginateRequest, ProviderAdapter, WebhookValidationResult};

pub struct ConnectAdapter {
    client: reqwest::Client,
    instance_id: String,
    contact_flow_id: String,
    api_key: String,
    from_number: String,
    api_base: String,
}

impl ConnectAdapter {
    pub fn new(instance_id: String, contact_flow_id: String, api_key: String, from_number: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            instance_id,
            contact_flow_id,
            api_key,
            from_number,
            api_base: "https://connect.amazonaws.com".to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for ConnectAdapter {
    fn name(&self) -> &'static str {
        "connect"
    }

    async fn originate(&self, req: &OriginateRequest) -> Result<CallId> {
        debug!(to = %req.phone_number, "connect originate");
        let url = format!("{}/contact/outbound-voice", self.api_base);
        let resp = self
            .client
            .post(&url)
            .header("X-Amz-Api-Key", &self.api_key)
            .json(&serde_json::json!({
                "InstanceId": self.instance_id,
                "ContactFlowId": self.contact_flow_id,
                "DestinationPhoneNumber": req.phone_number,
                "SourcePhoneNumber": self.from_number,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(if resp.status().as_u16() >= 500 {
                OrchestratorError::provider_transient("connect 5xx")
            } else {
                OrchestratorError::provider_permanent("connect rejected originate")
            });
        }
        let body: serde_json::Value = resp.json().await.map_err(|e| OrchestratorError::provider_permanent(e.to_string()))?;
        let contact_id = body
            .get("ContactId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::provider_permanent("connect response missing ContactId"))?;
        Ok(CallId::from_string(contact_id))
    }

    async fn build_answer_document(&self, call_id: &CallId, host: &str) -> Result<String> {
        Ok(serde_json::json!({
            "version": "1.0",
            "startStream": { "url": format!("wss://{host}/media/{}", call_id.as_str()) },
        })
        .to_string())
    }

    fn validate_webhook(&self, signature: Option<&str>, _body: &[u8]) -> WebhookValidationResult {
        match signature {
            Some(sig) if sig == self.api_key => WebhookValidationResult::Ok,
            Some(_) => WebhookValidationResult::Fail,
            None => WebhookValidationResult::Fail,
        }
    }

    async fn terminate(&self, call_id: &CallId) -> Result<()> {
        let url = format!("{}/contact/stop", self.api_base);
        self.client
            .post(&url)
            .header("X-Amz-Api-Key", &self.api_key)
            .json(&serde_json::json!({ "ContactId": call_id.as_str() }))
            .send()
            .await?;
        Ok(())
    }

    async fn send_dtmf_response(&self, _call_id: &CallId, plan_prompt: &str) -> Result<String> {
        Ok(serde_json::json!({ "say": plan_prompt, "gather": true }).to_string())
    }

    async fn emit_tts(&self, _call_id: &CallId, text_or_audio_url: &str) -> Result<()> {
        debug!(content = %text_or_audio_url, "connect emit_tts");
        Ok(())
    }
}
