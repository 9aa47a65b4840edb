use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    config::Config,
    error::EmailError,
    models::{
        retry::RetryConfig,
        user::{UserEnvelope, UserProfile},
    },
    utils::retry_with_backoff,
};

const SERVICE: &str = "user_service";

/// Client for resolving recipient data from the user service.
///
/// The circuit breaker guards the whole retry loop as a single unit, so an
/// open circuit aborts all remaining attempts at once.
pub struct UserServiceClient {
    http_client: Client,
    base_url: String,
    retry_config: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl UserServiceClient {
    pub fn new(config: &Config, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, EmailError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| EmailError::dependency(SERVICE, e))?;

        info!(base_url = %config.user_service_url, "User service client initialized");

        Ok(Self {
            http_client,
            base_url: config.user_service_url.clone(),
            retry_config: config.retry_config(),
            circuit_breaker,
        })
    }

    pub async fn fetch_user(
        &self,
        user_id: &str,
        correlation_id: Option<&str>,
    ) -> Result<UserProfile, EmailError> {
        let url = format!("{}/api/v1/users/{}", self.base_url, user_id);

        debug!(user_id, "Fetching user from service");

        let http_client = self.http_client.clone();
        let retry_config = self.retry_config.clone();
        let correlation_id = correlation_id.map(|s| s.to_string());
        let user_id = user_id.to_string();

        self.circuit_breaker
            .call(|| async move {
                retry_with_backoff(&retry_config, || {
                    Self::fetch_once(
                        http_client.clone(),
                        url.clone(),
                        user_id.clone(),
                        correlation_id.clone(),
                    )
                })
                .await
            })
            .await
    }

    async fn fetch_once(
        http_client: Client,
        url: String,
        user_id: String,
        correlation_id: Option<String>,
    ) -> Result<UserProfile, EmailError> {
        let mut request = http_client.get(&url);

        if let Some(correlation_id) = &correlation_id {
            request = request.header("X-Correlation-ID", correlation_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmailError::dependency(SERVICE, e))?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(EmailError::NotFound {
                resource: format!("user {}", user_id),
            });
        }

        if !status.is_success() {
            return Err(EmailError::dependency(
                SERVICE,
                format!("returned status {}", status),
            ));
        }

        let envelope: UserEnvelope = response
            .json()
            .await
            .map_err(|e| EmailError::dependency(SERVICE, format!("invalid response: {}", e)))?;

        match envelope.data {
            Some(data) if envelope.success => Ok(UserProfile::from_data(data)),
            _ => Err(EmailError::dependency(
                SERVICE,
                envelope
                    .message
                    .unwrap_or_else(|| "missing response data".to_string()),
            )),
        }
    }
}
