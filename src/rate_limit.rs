//! In-memory request rate limiting per user.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `HashMap<Uuid, VecDeque<Instant>>`.
//! One limit, keyed by user id: at most `max_requests` within `window`.
//! REST requests are counted when the bearer credential is resolved;
//! websocket frames are counted only for object mutations, so cursor and
//! presence traffic never consumes the budget.
//!
//! TRADE-OFFS
//! ==========
//! Counters live in one process. Behind several server processes each
//! enforces its own window, so the effective limit scales with the fleet.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded (max {limit} requests/{window_secs}s)")]
pub struct RateLimitError {
    pub limit: usize,
    pub window_secs: u64,
    /// Seconds until the oldest counted request leaves the window.
    pub retry_after_secs: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<Uuid, VecDeque<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// `max_requests == 0` disables limiting.
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self { inner: Arc::default(), max_requests, window }
    }

    /// Count one request for `user_id`, or refuse it without counting.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError` when the window is already full.
    pub fn check_and_record(&self, user_id: Uuid) -> Result<(), RateLimitError> {
        self.check_and_record_at(user_id, Instant::now())
    }

    fn check_and_record_at(&self, user_id: Uuid, now: Instant) -> Result<(), RateLimitError> {
        if self.max_requests == 0 {
            return Ok(());
        }
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let requests = inner.entry(user_id).or_default();
        prune_window(requests, now, self.window);
        if requests.len() >= self.max_requests {
            let retry_after = requests
                .front()
                .map_or(self.window, |oldest| self.window.saturating_sub(now.duration_since(*oldest)));
            return Err(RateLimitError {
                limit: self.max_requests,
                window_secs: self.window.as_secs(),
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }
        requests.push_back(now);
        Ok(())
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Drop users with no request inside the window.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.retain(|_, requests| {
            prune_window(requests, now, self.window);
            !requests.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.duration_since(front) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
