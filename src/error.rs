use thiserror::Error;

/// Error taxonomy for the notification pipeline.
///
/// The retry executor consults [`EmailError::is_retryable`] and re-raises the
/// last error unchanged, so callers can always distinguish a terminal failure
/// from an exhausted retryable one.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{service} unavailable: {reason}")]
    DependencyUnavailable { service: String, reason: String },

    #[error("circuit breaker is open for {service}, retry in {retry_after_secs}s")]
    CircuitOpen {
        service: String,
        retry_after_secs: u64,
    },

    #[error("provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] tokio_postgres::Error),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EmailError {
    pub fn dependency(service: &str, reason: impl ToString) -> Self {
        Self::DependencyUnavailable {
            service: service.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn provider(provider: &str, reason: impl ToString) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Classification consumed by the retry executor: a non-retryable error aborts
/// the remaining attempts immediately.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for EmailError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmailError::DependencyUnavailable { .. } | EmailError::Provider { .. }
        )
    }
}
