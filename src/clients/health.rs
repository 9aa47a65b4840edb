use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use lapin::{Connection, ConnectionProperties};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, database::RecordStore},
    models::{
        circuit_breaker::CircuitState,
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    },
};

/// Aggregates liveness of the backing stores and the circuit breaker registry
/// into a single readiness report.
pub struct HealthChecker {
    broker_url: String,
    store: Arc<dyn RecordStore>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl HealthChecker {
    pub fn new(
        broker_url: String,
        store: Arc<dyn RecordStore>,
        breakers: HashMap<String, Arc<CircuitBreaker>>,
    ) -> Self {
        Self {
            broker_url,
            store,
            breakers,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("database".to_string(), self.check_database().await);
        checks.insert("rabbitmq".to_string(), probe_broker(&self.broker_url).await);

        for (name, breaker) in &self.breakers {
            checks.insert(format!("circuit_breaker_{}", name), breaker_health(breaker));
        }

        HealthCheckResponse {
            status: overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_database(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.store.health_check().await {
            Ok(()) => ServiceHealth::healthy(start.elapsed().as_millis() as u64),
            Err(e) => ServiceHealth::unhealthy(e.to_string()),
        }
    }
}

/// Connection-only broker probe. The worker's topology is not redeclared and
/// the probe connection is closed before reporting.
pub async fn probe_broker(url: &str) -> ServiceHealth {
    let start = Instant::now();

    match Connection::connect(url, ConnectionProperties::default()).await {
        Ok(connection) => {
            let health = ServiceHealth::healthy(start.elapsed().as_millis() as u64);
            let _ = connection.close(200, "health probe").await;
            health
        }
        Err(e) => ServiceHealth::unhealthy(e.to_string()),
    }
}

fn breaker_health(breaker: &CircuitBreaker) -> ServiceHealth {
    let state = breaker.state();

    match state {
        CircuitState::Closed => {
            ServiceHealth::healthy(0).with_circuit_breaker(state.as_str().to_string())
        }
        CircuitState::HalfOpen | CircuitState::Open => {
            ServiceHealth::degraded(state.as_str().to_string(), None)
        }
    }
}

fn overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    if checks
        .values()
        .any(|c| c.status == HealthStatus::Unhealthy)
    {
        HealthStatus::Unhealthy
    } else if checks.values().any(|c| c.status == HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
