//! Behavior tests for the sliding-window rate limiter.
//!
//! These verify the core contract: no trailing window ever holds more than
//! the budget, waits are bounded, and cancellation is observed instead of
//! blocking forever.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use marketsieve_core::{CancelToken, SlidingWindowLimiter};
use tokio::task::JoinSet;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn no_trailing_window_ever_exceeds_the_budget() {
    // Given: a budget of 5 calls per 10 s and 4 competing tasks
    let limiter = Arc::new(SlidingWindowLimiter::new(5, Duration::from_secs(10)));
    let cancel = CancelToken::new();
    let grants: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

    // When: 24 acquires race through the limiter
    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let limiter = limiter.clone();
        let cancel = cancel.clone();
        let grants = grants.clone();
        tasks.spawn(async move {
            for _ in 0..6 {
                limiter.acquire(&cancel).await.expect("acquire succeeds");
                grants.lock().expect("grant log").push(Instant::now());
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("worker task");
    }

    // Then: any 6 consecutive grants span at least one full window
    let mut grants = grants.lock().expect("grant log").clone();
    grants.sort();
    assert_eq!(grants.len(), 24);
    for window in grants.windows(6) {
        let span = window[5].duration_since(window[0]);
        assert!(
            span >= Duration::from_secs(10),
            "6 grants within {span:?} violate the 5-per-10s budget"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn total_wait_is_bounded_by_the_window_arithmetic() {
    // Given: 24 sequential acquires against 5 calls / 10 s
    let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(10));
    let cancel = CancelToken::new();

    let start = Instant::now();
    for _ in 0..24 {
        limiter.acquire(&cancel).await.expect("acquire succeeds");
    }
    let elapsed = start.elapsed();

    // Then: ceil(24/5) = 5 windows upper-bound the elapsed time (plus the
    // limiter's per-wait slack)
    assert!(
        elapsed <= Duration::from_secs(50) + Duration::from_secs(1),
        "24 acquires took {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn queued_waiters_all_observe_cancellation() {
    // Given: a fully consumed 1-per-30s budget and 5 queued waiters
    let limiter = Arc::new(SlidingWindowLimiter::new(1, Duration::from_secs(30)));
    let cancel = CancelToken::new();
    limiter.acquire(&cancel).await.expect("first slot");

    let mut waiters = JoinSet::new();
    for _ in 0..5 {
        let limiter = limiter.clone();
        let cancel = cancel.clone();
        waiters.spawn(async move { limiter.acquire(&cancel).await });
    }
    tokio::task::yield_now().await;

    // When: the run is cancelled
    cancel.cancel();

    // Then: every waiter aborts instead of sleeping out the window
    let mut aborted = 0;
    while let Some(result) = waiters.join_next().await {
        let outcome = result.expect("waiter task");
        assert!(outcome.expect_err("must abort").is_cancelled());
        aborted += 1;
    }
    assert_eq!(aborted, 5);
    assert_eq!(limiter.recorded_in_window().await, 1);
}
