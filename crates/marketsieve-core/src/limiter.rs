//! Shared sliding-window rate limiter.
//!
//! The single gate for every upstream call. A true sliding window over call
//! timestamps, not a fixed-bucket counter: bucket resets under-utilize or
//! overshoot the budget at window boundaries.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::data_source::FetchError;
use crate::CancelToken;

/// Extra wait added on top of the computed window delay to absorb clock
/// skew between the local clock and the provider's accounting.
const WAIT_SLACK: Duration = Duration::from_millis(100);

/// Enforces "at most `max_calls` within any trailing `window`".
///
/// All state lives behind one async mutex with FIFO wakeups: a caller that
/// must wait sleeps while holding the lock, so later arrivals queue behind it
/// instead of racing it for the freed slot. `acquire` never fails with a rate
/// condition; it only delays, or aborts when the run is cancelled.
pub struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        debug_assert!(max_calls > 0, "config validation rejects a zero budget");
        debug_assert!(!window.is_zero(), "config validation rejects a zero window");
        Self {
            max_calls: max_calls as usize,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls as usize)),
        }
    }

    /// Blocks until one upstream call is safe, then records it.
    ///
    /// Returns `Err(FetchError::cancelled())` if `cancel` fires while
    /// queueing or waiting; the window state is left untouched in that case.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<(), FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::cancelled());
        }

        let mut calls = tokio::select! {
            guard = self.calls.lock() => guard,
            () = cancel.cancelled() => return Err(FetchError::cancelled()),
        };

        loop {
            let now = Instant::now();
            Self::prune(&mut calls, now, self.window);

            if calls.len() < self.max_calls {
                calls.push_back(Instant::now());
                return Ok(());
            }

            let oldest = *calls.front().expect("window is full, so non-empty");
            let wait = self.window.saturating_sub(now.duration_since(oldest)) + WAIT_SLACK;

            tokio::select! {
                () = sleep(wait) => {}
                () = cancel.cancelled() => return Err(FetchError::cancelled()),
            }
        }
    }

    /// Number of calls currently recorded inside the trailing window.
    pub async fn recorded_in_window(&self) -> usize {
        let mut calls = self.calls.lock().await;
        Self::prune(&mut calls, Instant::now(), self.window);
        calls.len()
    }

    fn prune(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while calls
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            calls.pop_front();
        }
    }
}
