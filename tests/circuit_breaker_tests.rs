mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use email_service::{
    clients::circuit_breaker::CircuitBreaker,
    error::EmailError,
    models::circuit_breaker::CircuitState,
};
use tokio::sync::oneshot;

use common::breaker_config;

async fn fail(breaker: &CircuitBreaker) {
    let result: Result<(), EmailError> = breaker
        .call(|| async { Err(EmailError::dependency("svc", "boom")) })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn stays_closed_below_failure_threshold() {
    let breaker = CircuitBreaker::new("svc".to_string(), breaker_config(3, 60));

    fail(&breaker).await;
    fail(&breaker).await;

    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn opens_after_threshold_consecutive_failures() {
    let breaker = CircuitBreaker::new("svc".to_string(), breaker_config(3, 60));

    for _ in 0..3 {
        fail(&breaker).await;
    }

    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn open_circuit_rejects_without_invoking_operation() {
    let breaker = CircuitBreaker::new("svc".to_string(), breaker_config(2, 60));

    fail(&breaker).await;
    fail(&breaker).await;

    let invoked = AtomicU32::new(0);

    let result: Result<(), EmailError> = breaker
        .call(|| async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    match result {
        Err(EmailError::CircuitOpen {
            service,
            retry_after_secs,
        }) => {
            assert_eq!(service, "svc");
            assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
        }
        other => panic!("expected circuit open, got {other:?}"),
    }
}

#[tokio::test]
async fn success_resets_consecutive_failure_count() {
    let breaker = CircuitBreaker::new("svc".to_string(), breaker_config(3, 60));

    fail(&breaker).await;
    fail(&breaker).await;

    let ok: Result<(), EmailError> = breaker.call(|| async { Ok(()) }).await;
    assert!(ok.is_ok());

    // Two more failures alone no longer reach the threshold.
    fail(&breaker).await;
    fail(&breaker).await;

    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn successful_trial_closes_the_circuit() {
    let breaker = CircuitBreaker::new("svc".to_string(), breaker_config(2, 0));

    fail(&breaker).await;
    fail(&breaker).await;

    // Zero recovery timeout: next call is admitted as the half-open trial.
    let result: Result<u32, EmailError> = breaker.call(|| async { Ok(7) }).await;

    assert_eq!(result.unwrap(), 7);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn failed_trial_reopens_the_circuit() {
    let breaker = CircuitBreaker::new("svc".to_string(), breaker_config(2, 0));

    fail(&breaker).await;
    fail(&breaker).await;

    fail(&breaker).await;

    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn cancelled_trial_releases_the_half_open_slot() {
    let breaker = Arc::new(CircuitBreaker::new("svc".to_string(), breaker_config(2, 0)));

    fail(&breaker).await;
    fail(&breaker).await;

    // Trial that never resolves: the sender half is kept alive but unused.
    let (_held, gate) = oneshot::channel::<()>();

    let trial_breaker = Arc::clone(&breaker);
    let trial = tokio::spawn(async move {
        trial_breaker
            .call(|| async {
                gate.await.ok();
                Ok::<_, EmailError>(())
            })
            .await
    });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    trial.abort();
    let _ = trial.await;

    // The aborted trial must not wedge the breaker: the next caller takes
    // over the trial slot and can close the circuit.
    let result: Result<u32, EmailError> = breaker.call(|| async { Ok(9) }).await;

    assert_eq!(result.unwrap(), 9);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn half_open_admits_exactly_one_trial() {
    let breaker = Arc::new(CircuitBreaker::new("svc".to_string(), breaker_config(2, 0)));

    fail(&breaker).await;
    fail(&breaker).await;

    let (release, gate) = oneshot::channel::<()>();

    let trial_breaker = Arc::clone(&breaker);
    let trial = tokio::spawn(async move {
        trial_breaker
            .call(|| async {
                gate.await.ok();
                Ok::<_, EmailError>("trial done")
            })
            .await
    });

    // Let the trial occupy the half-open slot before probing again.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let second: Result<&str, EmailError> = breaker.call(|| async { Ok("second") }).await;
    assert!(matches!(second, Err(EmailError::CircuitOpen { .. })));

    release.send(()).unwrap();

    let trial_result = trial.await.unwrap();
    assert_eq!(trial_result.unwrap(), "trial done");
    assert_eq!(breaker.state(), CircuitState::Closed);
}
