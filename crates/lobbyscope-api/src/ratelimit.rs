use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Sliding window limiter: at most `limit` requests complete within any `window`.
///
/// Callers wait in arrival order. The window is measured from the completion of
/// earlier requests, so a slow response never lets a burst through.
pub struct RateLimiter {
    window: Duration,
    slots: Arc<Semaphore>,
    /// Completion times, oldest first. One entry per free slot.
    history: Arc<Mutex<VecDeque<Instant>>>,
}

/// Held for the duration of one request
pub struct RateLimitGuard {
    history: Arc<Mutex<VecDeque<Instant>>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        let limit = limit.max(1);
        let now = Instant::now();
        let expired = now.checked_sub(window).unwrap_or(now);

        Self {
            window,
            slots: Arc::new(Semaphore::new(limit)),
            history: Arc::new(Mutex::new(std::iter::repeat_n(expired, limit).collect())),
        }
    }

    /// Wait until a request may be made
    pub async fn acquire(&self) -> RateLimitGuard {
        // The semaphore is never closed
        let permit = Arc::clone(&self.slots).acquire_owned().await.ok();
        let oldest = self.history.lock().pop_front();

        // Build the guard first so a cancelled wait still returns its slot
        let guard = RateLimitGuard {
            history: Arc::clone(&self.history),
            _permit: permit,
        };

        if let Some(oldest) = oldest {
            tokio::time::sleep_until(oldest + self.window).await;
        }
        guard
    }
}

impl Drop for RateLimitGuard {
    fn drop(&mut self) {
        let now = Instant::now();
        let mut history = self.history.lock();
        let idx = history.partition_point(|t| *t <= now);
        history.insert(idx, now);
    }
}
