use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info};

use crate::{
    clients::dispatcher::Mailer,
    config::Config,
    error::EmailError,
    models::delivery::{DeliveryResult, OutgoingEmail},
};

const PROVIDER: &str = "sendgrid";

/// HTTP-API delivery provider speaking the SendGrid v3 mail-send contract.
pub struct SendGridMailer {
    http_client: Client,
    api_url: String,
    api_key: String,
    from_email: String,
    from_name: String,
}

impl SendGridMailer {
    pub fn new(config: &Config, api_key: String) -> Result<Self, EmailError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| EmailError::provider(PROVIDER, e))?;

        info!(api_url = %config.sendgrid_api_url, "SendGrid mailer initialized");

        Ok(Self {
            http_client,
            api_url: config.sendgrid_api_url.clone(),
            api_key,
            from_email: config.smtp_from_email.clone(),
            from_name: config.smtp_from_name.clone(),
        })
    }

    fn build_payload(&self, email: &OutgoingEmail) -> JsonValue {
        let overrides = &email.overrides;

        let mut personalization = json!({
            "to": [address_object(&email.to, email.recipient_name.as_deref())],
        });

        if let Some(cc) = &overrides.cc {
            personalization["cc"] = cc.iter().map(|a| address_object(a, None)).collect();
        }

        if let Some(bcc) = &overrides.bcc {
            personalization["bcc"] = bcc.iter().map(|a| address_object(a, None)).collect();
        }

        let from_email = overrides.from_email.as_deref().unwrap_or(&self.from_email);
        let from_name = overrides.from_name.as_deref().unwrap_or(&self.from_name);

        let mut payload = json!({
            "personalizations": [personalization],
            "from": address_object(from_email, Some(from_name)),
            "subject": email.subject,
            "content": [{"type": "text/html", "value": email.html_body}],
        });

        if let Some(reply_to) = &overrides.reply_to {
            payload["reply_to"] = address_object(reply_to, None);
        }

        payload
    }
}

fn address_object(email: &str, name: Option<&str>) -> JsonValue {
    match name {
        Some(name) => json!({"email": email, "name": name}),
        None => json!({"email": email}),
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryResult, EmailError> {
        let url = format!("{}/v3/mail/send", self.api_url);
        let payload = self.build_payload(email);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EmailError::provider(PROVIDER, e))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmailError::provider(
                PROVIDER,
                format!("status {}: {}", status, error_text),
            ));
        }

        let provider_message_id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        debug!(to = %email.to, "Email sent via SendGrid");

        Ok(DeliveryResult {
            provider: PROVIDER.to_string(),
            provider_message_id,
        })
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
