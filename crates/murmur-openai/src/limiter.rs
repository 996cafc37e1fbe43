use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Strict-interval rate limiter shared by all concurrent callers.
///
/// Admits at most one caller per interval, FIFO, with no bursting: each
/// caller reserves the next free slot under the lock (tokio mutexes queue
/// fairly) and then sleeps until its slot arrives.
pub struct StrictLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl StrictLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn per_second(calls: u32) -> Self {
        Self::new(Duration::from_secs(1) / calls.max(1))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Blocks the calling task until its slot in the admission order.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let at = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(at + self.interval);
            at
        };
        sleep_until(slot).await;
    }
}
