use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::clients::circuit_breaker::CircuitBreaker;
use crate::error::EmailError;
use crate::models::delivery::{DeliveryResult, OutgoingEmail};

/// A delivery provider transport. Implementations do not retry; retry policy
/// stays with the orchestrator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryResult, EmailError>;

    fn name(&self) -> &str;
}

/// Routes an outgoing email to one registered provider.
///
/// Selection order: per-request override, then the configured default. Every
/// provider sits behind its own circuit breaker, so a failing API key on one
/// provider never blocks the others.
pub struct DeliveryDispatcher {
    providers: HashMap<String, (Arc<dyn Mailer>, Arc<CircuitBreaker>)>,
    default_provider: String,
}

impl DeliveryDispatcher {
    pub fn new(default_provider: String) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider,
        }
    }

    pub fn register(&mut self, mailer: Arc<dyn Mailer>, circuit_breaker: Arc<CircuitBreaker>) {
        info!(provider = mailer.name(), "Delivery provider registered");
        self.providers
            .insert(mailer.name().to_string(), (mailer, circuit_breaker));
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    pub async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryResult, EmailError> {
        let provider = email
            .overrides
            .provider
            .as_deref()
            .unwrap_or(&self.default_provider);

        let (mailer, circuit_breaker) = self.providers.get(provider).ok_or_else(|| {
            EmailError::Validation(format!("Unknown delivery provider: {}", provider))
        })?;

        debug!(provider, to = %email.to, "Dispatching email");

        circuit_breaker.call(|| mailer.send(email)).await
    }
}
