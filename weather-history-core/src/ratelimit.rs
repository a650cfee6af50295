//! Call-rate limiter for the upstream provider.
//!
//! The limiter remembers when the last `max_calls` slots were handed out. A
//! new caller gets the earliest instant that keeps every window of length
//! `period` at or below `max_calls` grants, then sleeps until that instant.
//! Slots are reserved under a short synchronous lock and awaited outside of
//! it, so waiters are served strictly in arrival order and nobody holds the
//! lock while sleeping. A caller that gives up while waiting hands its slot
//! back, so cancelled requests do not push later callers further out.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

pub const DEFAULT_MAX_CALLS: u32 = 60;
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `max_calls` below one is treated as one.
    pub fn new(max_calls: u32, period: Duration) -> Self {
        let max_calls = max_calls.max(1) as usize;
        Self {
            max_calls,
            period,
            grants: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait until a call slot is available. Never fails, only delays.
    ///
    /// Dropping the future before the slot comes up gives the slot back.
    pub async fn acquire(&self) {
        let now = Instant::now();
        let slot = self.reserve(now);
        if slot <= now {
            return;
        }

        let mut pending = PendingSlot {
            limiter: self,
            slot,
            granted: false,
        };
        tracing::debug!(wait = ?(slot - now), "rate limit reached, waiting for slot");
        tokio::time::sleep_until(slot).await;
        pending.granted = true;
    }

    fn reserve(&self, now: Instant) -> Instant {
        let mut grants = self.grants.lock();

        // grants that can no longer share a window with any future slot
        while grants.front().is_some_and(|first| *first + self.period <= now) {
            grants.pop_front();
        }

        let mut slot = now;
        if grants.len() >= self.max_calls {
            let oldest_in_window = grants[grants.len() - self.max_calls];
            slot = slot.max(oldest_in_window + self.period);
        }
        if let Some(last) = grants.back() {
            slot = slot.max(*last);
        }

        grants.push_back(slot);
        slot
    }

    /// Forget a reservation that was never used. The log stays sorted, and
    /// slots already handed out keep their instants.
    fn release(&self, slot: Instant) {
        let mut grants = self.grants.lock();
        if let Some(pos) = grants.iter().rposition(|granted| *granted == slot) {
            grants.remove(pos);
        }
    }
}

/// A reserved slot whose owner is still sleeping towards it.
struct PendingSlot<'a> {
    limiter: &'a RateLimiter,
    slot: Instant,
    granted: bool,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if !self.granted {
            tracing::debug!("rate limit wait cancelled, releasing slot");
            self.limiter.release(self.slot);
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALLS, DEFAULT_PERIOD)
    }
}
