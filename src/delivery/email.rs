//! SendGrid `mail/send` adapter for the email channel (spec §4.8). One
//! concrete vendor is wired up; `DeliveryAdapter` is the seam another
//! (SES, Mailgun) would implement against.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::persistence::Message;
use crate::types::Channel;

use super::adapter::{classify_http_status, DeliveryAdapter};
use super::template;

pub struct SendGridEmailAdapter {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl SendGridEmailAdapter {
    pub fn new(api_key: String) -> Self {
        Self { client: reqwest::Client::new(), api_key, api_base: "https://api.sendgrid.com".to_string() }
    }

    #[cfg(test)]
    pub fn with_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }
}

fn rendered(body: &Option<String>, variables: &Option<serde_json::Value>) -> Option<String> {
    match (body, variables) {
        (Some(text), Some(vars)) => Some(template::render(text, vars)),
        (Some(text), None) => Some(text.clone()),
        (None, _) => None,
    }
}

#[async_trait]
impl DeliveryAdapter for SendGridEmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, message: &Message) -> Result<String> {
        debug!(to = %message.recipient, "sendgrid email send");
        let html = rendered(&message.html_body, &message.variables);
        let text = rendered(&message.text_body, &message.variables);

        let mut content = Vec::new();
        if let Some(text) = &text {
            content.push(json!({"type": "text/plain", "value": text}));
        }
        if let Some(html) = &html {
            content.push(json!({"type": "text/html", "value": html}));
        }

        let body = json!({
            "personalizations": [{"to": [{"email": message.recipient}]}],
            "from": {"email": message.sender},
            "subject": message.subject.clone().unwrap_or_default(),
            "content": content,
        });

        let url = format!("{}/v3/mail/send", self.api_base);
        let resp = self.client.post(&url).bearer_auth(&self.api_key).json(&body).send().await?;

        if !resp.status().is_success() {
            return Err(classify_http_status(resp.status().as_u16(), "sendgrid"));
        }
        // SendGrid returns the message id in a response header, not a body.
        let message_id = resp
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| format!("sendgrid-{}", uuid::Uuid::new_v4()));
        Ok(message_id)
    }
}
