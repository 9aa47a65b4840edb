use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::models::message::EmailNotificationRequest;

/// Optional per-request sender overrides, carried in request metadata and
/// persisted on the record so resubmission can reconstruct them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderOverrides {
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub cc: Option<Vec<String>>,
    pub bcc: Option<Vec<String>>,
    pub provider: Option<String>,
}

impl SenderOverrides {
    pub fn from_request(request: &EmailNotificationRequest) -> Self {
        Self {
            from_email: request.metadata_str("from_email"),
            from_name: request.metadata_str("from_name"),
            reply_to: request.metadata_str("reply_to"),
            cc: request.metadata_list("cc"),
            bcc: request.metadata_list("bcc"),
            provider: request.metadata_str("provider"),
        }
    }

    pub fn from_metadata(metadata: &JsonValue) -> Self {
        serde_json::from_value(metadata.clone()).unwrap_or_default()
    }

    pub fn to_metadata(&self, language: &str) -> JsonValue {
        json!({
            "language": language,
            "from_email": self.from_email,
            "from_name": self.from_name,
            "reply_to": self.reply_to,
            "cc": self.cc,
            "bcc": self.bcc,
            "provider": self.provider,
        })
    }
}

/// Fully resolved outgoing email handed to the delivery dispatcher.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub overrides: SenderOverrides,
}

/// Outcome reported by a delivery provider.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub provider: String,
    pub provider_message_id: Option<String>,
}
