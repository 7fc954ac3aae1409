//! Integration tests for concurrent access scenarios
//!
//! Tests thread-safety of the shared breaker state:
//! - Many tasks failing through one breaker
//! - Trial admission while half-open
//! - Concurrent retries sharing nothing but the operation

use pretty_assertions::assert_eq;
use rampart_resilience::prelude::*;
use rampart_resilience::{CircuitState, ManualClock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

const TASKS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Refused;

/// Test: breaker opens once under concurrent failures and loses no counts
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_breaker_opens_once_under_load() {
    let threshold = 5;
    let breaker = CircuitBreaker::<Refused>::builder()
        .failure_threshold(threshold)
        .break_duration(Duration::from_secs(60))
        .build()
        .unwrap();
    let invocations = Arc::new(AtomicU32::new(0));
    let rejected = Arc::new(AtomicU32::new(0));

    let mut handles = vec![];

    for _ in 0..TASKS {
        let breaker = breaker.clone();
        let invocations = Arc::clone(&invocations);
        let rejected = Arc::clone(&rejected);

        // Each task keeps calling until the breaker turns it away, so at most
        // one call per task is in flight at any moment.
        let handle = tokio::spawn(async move {
            loop {
                let invocations = Arc::clone(&invocations);
                let result: ResilienceResult<(), Refused> = breaker
                    .execute(|| async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Err(ResilienceError::Operation(Refused))
                    })
                    .await;

                if result.is_err_and(|error| error.is_circuit_open()) {
                    rejected.fetch_add(1, Ordering::SeqCst);
                    break;
                }
            }
        });

        handles.push(handle);
    }

    futures::future::join_all(handles).await;

    let stats = breaker.stats();
    let invoked = invocations.load(Ordering::SeqCst);

    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.times_opened, 1, "breaker must open exactly once");
    assert_eq!(rejected.load(Ordering::SeqCst), TASKS);
    assert!(
        invoked >= threshold && invoked < threshold + TASKS,
        "{invoked} invocations for threshold {threshold}"
    );
    assert_eq!(u64::from(invoked), stats.failures, "every failure recorded");
    assert_eq!(stats.rejected_calls, u64::from(TASKS));
}

/// Test: only one trial runs when many callers arrive after the break
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_trial_under_contention() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::<Refused>::builder()
        .failure_threshold(1)
        .break_duration(Duration::from_secs(5))
        .clock(clock.clone())
        .build()
        .unwrap();

    let _ = breaker
        .execute(|| async { Err::<(), _>(ResilienceError::Operation(Refused)) })
        .await;
    assert!(breaker.is_open());
    clock.advance(Duration::from_secs(5));

    let trials = Arc::new(AtomicU32::new(0));
    let rejected = Arc::new(AtomicU32::new(0));
    let release = Arc::new(Notify::new());

    let mut handles = vec![];

    for _ in 0..TASKS {
        let breaker = breaker.clone();
        let trials = Arc::clone(&trials);
        let rejected = Arc::clone(&rejected);
        let release = Arc::clone(&release);

        let handle = tokio::spawn(async move {
            let result = breaker
                .execute(|| async move {
                    trials.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                    Ok::<_, ResilienceError<Refused>>(())
                })
                .await;
            if result.is_err_and(|error| error.is_circuit_open()) {
                rejected.fetch_add(1, Ordering::SeqCst);
            }
        });

        handles.push(handle);
    }

    // Hold the trial until every other caller has been turned away
    tokio::time::timeout(Duration::from_secs(10), async {
        while rejected.load(Ordering::SeqCst) < TASKS - 1 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("callers were not rejected while the trial ran");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    release.notify_one();

    futures::future::join_all(handles).await;

    assert_eq!(trials.load(Ordering::SeqCst), 1);
    assert_eq!(rejected.load(Ordering::SeqCst), TASKS - 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Test: one retry policy shared by many tasks keeps attempts per call
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_retry_policy_is_per_call() {
    let clock = ManualClock::new();
    let retry = RetryPolicy::<Refused>::builder()
        .max_attempts(2)
        .clock(clock.clone())
        .build()
        .unwrap();
    let invocations = Arc::new(AtomicU32::new(0));

    let mut handles = vec![];

    for _ in 0..TASKS {
        let retry = retry.clone();
        let invocations = Arc::clone(&invocations);

        let handle = tokio::spawn(async move {
            retry
                .execute(move || {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(ResilienceError::Operation(Refused)) }
                })
                .await
        });

        handles.push(handle);
    }

    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap(), Err(ResilienceError::Operation(Refused)));
    }
    assert_eq!(invocations.load(Ordering::SeqCst), TASKS * 3);
    assert_eq!(clock.sleeps().len(), (TASKS * 2) as usize);
}
