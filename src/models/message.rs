use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Email,
    Push,
    Sms,
}

fn default_priority() -> i32 {
    1
}

/// Inbound notification message, consumed from the email queue or built by the
/// direct-send API. `request_id` is the sole idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailNotificationRequest {
    pub notification_id: String,
    pub notification_type: NotificationType,
    pub user_id: String,
    pub template_code: String,

    #[serde(default)]
    pub variables: HashMap<String, JsonValue>,

    pub request_id: String,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,

    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl EmailNotificationRequest {
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub fn metadata_list(&self, key: &str) -> Option<Vec<String>> {
        self.metadata.get(key).and_then(|v| v.as_array()).map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
    }

    pub fn language(&self) -> String {
        self.metadata_str("language").unwrap_or_else(|| "en".to_string())
    }
}

/// Status event published to the status queue with routing key
/// `status.<status-lowercase>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub notification_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: JsonValue,
}

/// Dead-letter payload, routing key `failed.email`. Carries the raw original
/// message so nothing is lost when decoding fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMessage {
    pub original_message: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Direct-send request accepted by `POST /api/v1/emails/send`. Recipient data
/// is carried inline, so processing skips the user-service lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailSendRequest {
    pub user_id: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub template_code: String,

    #[serde(default)]
    pub variables: HashMap<String, JsonValue>,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub language: Option<String>,

    pub notification_id: Option<String>,
    pub request_id: Option<String>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub cc: Option<Vec<String>>,
    pub bcc: Option<Vec<String>>,
    pub provider: Option<String>,
}
