//! Per-sender command cooldown.
//!
//! A keyed GCRA limiter with a burst of one: after an accepted command the
//! sender is held off for exactly `interval`. Rejected attempts consume no
//! cell, so they never extend the wait.

use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use tracing::debug;

/// Entries beyond this count trigger a sweep of stale senders.
const PRUNE_THRESHOLD: usize = 1024;

type KeyedLimiter<C> =
    RateLimiter<i64, DashMapStateStore<i64>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Tracks when each sender may next have a command accepted.
///
/// A zero interval disables the cooldown.
pub struct CooldownTracker<C: Clock = DefaultClock> {
    interval: Duration,
    limiter: Option<KeyedLimiter<C>>,
}

impl CooldownTracker {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, &DefaultClock::default())
    }
}

impl<C: Clock> CooldownTracker<C> {
    pub fn with_clock(interval: Duration, clock: &C) -> Self {
        let limiter = Quota::with_period(interval)
            .map(|quota| RateLimiter::dashmap_with_clock(quota, clock));
        Self { interval, limiter }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` and starts a new cooldown for `sender` unless the
    /// previous accepted command is less than the interval ago.
    pub fn try_acquire(&self, sender: i64) -> bool {
        let Some(limiter) = &self.limiter else {
            return true;
        };
        if limiter.check_key(&sender).is_err() {
            return false;
        }
        if limiter.len() > PRUNE_THRESHOLD {
            let before = limiter.len();
            limiter.retain_recent();
            debug!(removed = before - limiter.len(), "Pruned cooldown entries");
        }
        true
    }

    pub fn len(&self) -> usize {
        self.limiter.as_ref().map_or(0, |l| l.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: Clock> std::fmt::Debug for CooldownTracker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooldownTracker")
            .field("interval", &self.interval)
            .field("senders", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    fn tracker(ms: u64) -> (CooldownTracker<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        (CooldownTracker::with_clock(Duration::from_millis(ms), &clock), clock)
    }

    #[test]
    fn test_second_call_within_interval_rejected() {
        let (cooldown, clock) = tracker(500);
        assert!(cooldown.try_acquire(42));

        clock.advance(Duration::from_millis(100));
        assert!(!cooldown.try_acquire(42));
        // Other senders are independent.
        assert!(cooldown.try_acquire(43));

        clock.advance(Duration::from_millis(400));
        assert!(cooldown.try_acquire(42));
    }

    #[test]
    fn test_rejection_does_not_extend_cooldown() {
        let (cooldown, clock) = tracker(500);
        assert!(cooldown.try_acquire(1));
        clock.advance(Duration::from_millis(400));
        assert!(!cooldown.try_acquire(1));
        clock.advance(Duration::from_millis(100));
        assert!(cooldown.try_acquire(1));
    }

    #[test]
    fn test_zero_interval_disables() {
        let (cooldown, _clock) = tracker(0);
        assert!(cooldown.try_acquire(7));
        assert!(cooldown.try_acquire(7));
        assert!(cooldown.is_empty());
    }

    #[test]
    fn test_stale_entries_pruned() {
        let (cooldown, clock) = tracker(10);
        for sender in 0..=PRUNE_THRESHOLD as i64 {
            assert!(cooldown.try_acquire(sender));
        }
        clock.advance(Duration::from_millis(20));

        assert!(cooldown.try_acquire(-1));
        assert_eq!(cooldown.len(), 1);
    }
}
