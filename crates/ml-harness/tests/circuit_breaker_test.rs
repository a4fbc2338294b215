use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ml_harness::circuit_breaker::{
    guarded_call, AlwaysOpen, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    CircuitGate, CircuitState,
};

fn fast_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout: Duration::from_millis(100),
        half_open_max_requests: 2,
    }
}

fn tripped() -> CircuitBreaker {
    let cb = CircuitBreaker::new("test", fast_config());
    for _ in 0..3 {
        cb.record_failure();
    }
    cb
}

#[test]
fn starts_closed() {
    let cb = CircuitBreaker::new("test", fast_config());
    assert_eq!(cb.state(), CircuitState::Closed);
    assert!(cb.allow_request());
}

#[test]
fn opens_after_threshold_failures() {
    let cb = CircuitBreaker::new("test", fast_config());
    cb.record_failure();
    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Closed);
    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);
}

#[test]
fn success_resets_consecutive_failures() {
    let cb = CircuitBreaker::new("test", fast_config());
    cb.record_failure();
    cb.record_failure();
    cb.record_success();
    assert_eq!(cb.failure_count(), 0);
    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[test]
fn rejects_requests_when_open() {
    let cb = tripped();
    assert!(!cb.allow_request());
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test]
async fn transitions_to_half_open_after_timeout() {
    let cb = tripped();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(cb.allow_request());
    assert_eq!(cb.state(), CircuitState::HalfOpen);
}

#[tokio::test]
async fn half_open_admits_bounded_trials() {
    let cb = tripped();
    tokio::time::sleep(Duration::from_millis(150)).await;

    // First trial is the transition itself, the second is the last slot.
    assert!(cb.allow_request());
    assert!(cb.allow_request());
    assert!(!cb.allow_request());
    assert_eq!(cb.state(), CircuitState::HalfOpen);
}

#[tokio::test]
async fn half_open_success_closes() {
    let cb = tripped();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(cb.allow_request());
    cb.record_success();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.failure_count(), 0);
    assert!(cb.allow_request());
}

#[tokio::test]
async fn half_open_failure_reopens_and_restarts_cooldown() {
    let cb = tripped();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(cb.allow_request());
    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);
    assert!(!cb.allow_request());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(cb.allow_request());
    assert_eq!(cb.state(), CircuitState::HalfOpen);
}

#[test]
fn manual_reset() {
    let cb = tripped();
    cb.reset();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.failure_count(), 0);
}

#[test]
fn clones_share_state() {
    let cb = CircuitBreaker::new("test", fast_config());
    let clone = cb.clone();
    for _ in 0..3 {
        clone.record_failure();
    }
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test]
async fn guarded_call_success() {
    let cb = CircuitBreaker::new("test", fast_config());
    let res = guarded_call(&cb, Duration::from_secs(1), || async { Ok::<_, String>(42) }).await;
    assert_eq!(res.unwrap(), 42);
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test]
async fn guarded_call_inner_error_counts_as_failure() {
    let cb = CircuitBreaker::new("test", fast_config());
    for _ in 0..3 {
        let res = guarded_call(&cb, Duration::from_secs(1), || async {
            Err::<i32, _>("model exploded")
        })
        .await;
        match res {
            Err(CircuitBreakerError::Inner(msg)) => assert_eq!(msg, "model exploded"),
            other => panic!("expected inner error, got {other:?}"),
        }
    }
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test]
async fn guarded_call_timeout_counts_as_failure() {
    let cb = CircuitBreaker::new("test", fast_config());
    let res = guarded_call(&cb, Duration::from_millis(20), || async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, String>(1)
    })
    .await;
    assert!(matches!(res, Err(CircuitBreakerError::Timeout(_))));
    assert_eq!(cb.failure_count(), 1);
}

#[tokio::test]
async fn guarded_call_never_invokes_when_open() {
    let calls = AtomicUsize::new(0);
    let res = guarded_call(&AlwaysOpen, Duration::from_secs(1), || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(())
    })
    .await;
    assert!(matches!(res, Err(CircuitBreakerError::Open)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
