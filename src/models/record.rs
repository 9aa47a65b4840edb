use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Delivery status of a notification record.
///
/// Pending -> Sending -> {Sent, Failed}. Delivered and Bounced are recorded
/// from provider feedback, which arrives outside this pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Failed,
    Bounced,
}

impl EmailStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Sending => "sending",
            EmailStatus::Sent => "sent",
            EmailStatus::Delivered => "delivered",
            EmailStatus::Failed => "failed",
            EmailStatus::Bounced => "bounced",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "sending" => EmailStatus::Sending,
            "sent" => EmailStatus::Sent,
            "delivered" => EmailStatus::Delivered,
            "failed" => EmailStatus::Failed,
            "bounced" => EmailStatus::Bounced,
            _ => EmailStatus::Pending,
        }
    }
}

impl Display for EmailStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row per admitted `request_id`. Mutated in place as the pipeline
/// advances, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: Uuid,
    pub notification_id: String,
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub user_id: String,
    pub template_code: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: Option<String>,
    pub body_html: Option<String>,
    pub status: EmailStatus,
    pub priority: i32,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Insert payload for [`EmailRecord`] admission.
#[derive(Debug, Clone)]
pub struct NewEmailRecord {
    pub notification_id: String,
    pub request_id: String,
    pub correlation_id: Option<String>,
    pub user_id: String,
    pub template_code: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub priority: i32,
    pub metadata: JsonValue,
}

/// Field updates applied alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub error_message: Option<String>,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
}

impl StatusUpdate {
    pub fn with_error(error: impl ToString) -> Self {
        Self {
            error_message: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn with_provider(provider: impl ToString, message_id: Option<String>) -> Self {
        Self {
            provider: Some(provider.to_string()),
            provider_message_id: message_id,
            ..Default::default()
        }
    }
}
