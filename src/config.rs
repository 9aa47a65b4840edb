use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{circuit_breaker::CircuitBreakerConfig, retry::RetryConfig};

/// Selects how the processor resolves the recipient for a request: taken from
/// inbound metadata, or fetched from the user service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientSource {
    Metadata,
    UserService,
}

fn default_recipient_source() -> RecipientSource {
    RecipientSource::Metadata
}

fn default_sendgrid_api_url() -> String {
    "https://api.sendgrid.com".to_string()
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    pub rabbitmq_exchange: String,
    pub email_queue_name: String,
    pub status_queue_name: String,
    pub failed_queue_name: String,
    pub prefetch_count: u16,

    pub database_url: String,

    pub user_service_url: String,
    pub template_service_url: String,
    pub request_timeout_seconds: u64,

    #[serde(default = "default_recipient_source")]
    pub recipient_source: RecipientSource,

    pub email_provider: String,

    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_use_tls: bool,
    pub smtp_from_email: String,
    pub smtp_from_name: String,

    #[serde(default)]
    pub sendgrid_api_key: Option<String>,

    #[serde(default = "default_sendgrid_api_url")]
    pub sendgrid_api_url: String,

    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_recovery_timeout_seconds: u64,

    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_backoff_multiplier: u64,

    pub server_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            recovery_timeout_seconds: self.circuit_breaker_recovery_timeout_seconds,
        }
    }
}
