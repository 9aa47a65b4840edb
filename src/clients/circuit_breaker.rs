use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::EmailError;
use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitState};

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

/// Per-dependency failure-isolation state machine.
///
/// One instance exists per named dependency for the process lifetime, shared
/// across concurrent callers via `Arc`. All state transitions happen inside a
/// single mutex region; the guarded operation itself runs outside the lock.
/// The `trial_in_flight` flag guarantees at most one trial call while
/// half-open, even when two callers observe the OPEN -> HALF_OPEN edge at
/// once.
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

enum Admission {
    Allowed { trial: bool },
    Rejected { retry_after_secs: u64 },
}

/// Releases the half-open trial slot if the trial future is dropped before it
/// resolves, so a cancelled caller cannot wedge the breaker in HALF_OPEN.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    defused: bool,
}

impl TrialGuard<'_> {
    fn defuse(mut self) {
        self.defused = true;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.defused {
            let mut inner = self.breaker.lock();
            inner.trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(service_name: String, config: CircuitBreakerConfig) -> Self {
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, EmailError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, EmailError>>,
    {
        let trial = match self.admit() {
            Admission::Allowed { trial } => trial,
            Admission::Rejected { retry_after_secs } => {
                warn!(
                    service = %self.service_name,
                    retry_after_secs,
                    "Circuit breaker is open, rejecting request"
                );
                return Err(EmailError::CircuitOpen {
                    service: self.service_name.clone(),
                    retry_after_secs,
                });
            }
        };

        let guard = trial.then(|| TrialGuard {
            breaker: self,
            defused: false,
        });

        match operation().await {
            Ok(result) => {
                if let Some(guard) = guard {
                    guard.defuse();
                }
                self.record_success(trial);
                Ok(result)
            }
            Err(e) => {
                if let Some(guard) = guard {
                    guard.defuse();
                }
                self.record_failure(trial);
                Err(e)
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        let recovery_timeout = Duration::from_secs(self.config.recovery_timeout_seconds);

        match inner.state {
            CircuitState::Closed => Admission::Allowed { trial: false },
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(recovery_timeout);

                if elapsed >= recovery_timeout {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Admission::Allowed { trial: true }
                } else {
                    Admission::Rejected {
                        retry_after_secs: (recovery_timeout - elapsed).as_secs().max(1),
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Rejected {
                        retry_after_secs: 1,
                    }
                } else {
                    debug!(service = %self.service_name, "Circuit breaker in half-open state");
                    inner.trial_in_flight = true;
                    Admission::Allowed { trial: true }
                }
            }
        }
    }

    fn record_success(&self, trial: bool) {
        let mut inner = self.lock();

        if trial {
            inner.trial_in_flight = false;
            inner.state = CircuitState::Closed;
            inner.last_failure_time = None;
            info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
        }

        inner.consecutive_failures = 0;
    }

    fn record_failure(&self, trial: bool) {
        let mut inner = self.lock();

        inner.consecutive_failures += 1;

        if trial {
            inner.trial_in_flight = false;
            inner.state = CircuitState::Open;
            inner.last_failure_time = Some(Instant::now());
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return;
        }

        debug!(
            service = %self.service_name,
            failures = inner.consecutive_failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.last_failure_time = Some(Instant::now());
            warn!(
                service = %self.service_name,
                failures = inner.consecutive_failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
