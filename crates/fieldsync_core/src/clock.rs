//! Server clock and commit stamps.
//!
//! Every accepted version write gets a unique stamp that is strictly greater
//! than any stamp or change feed cursor issued before it. Feed cursors are
//! drawn from the same sequence, so a cursor handed to a device is always
//! below every later commit.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Sets the clock, possibly backwards.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Issues strictly increasing stamps: `max(now, last + 1µs)`.
pub(crate) struct StampIssuer {
    clock: Arc<dyn Clock>,
    last: Mutex<DateTime<Utc>>,
}

impl StampIssuer {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Wall-clock time, not guaranteed unique.
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Next unique stamp.
    pub(crate) fn next(&self) -> DateTime<Utc> {
        let mut last = self.last.lock();
        let now = self.clock.now();
        let next = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        next
    }

    /// Records a stamp seen during replay so later stamps stay above it.
    pub(crate) fn observe(&self, stamp: DateTime<Utc>) {
        let mut last = self.last.lock();
        if stamp > *last {
            *last = stamp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frozen() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[test]
    fn frozen_clock_still_yields_unique_stamps() {
        let clock = frozen();
        let stamps = StampIssuer::new(clock);
        let a = stamps.next();
        let b = stamps.next();
        let c = stamps.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn clock_moving_backwards_does_not_reorder() {
        let clock = frozen();
        let stamps = StampIssuer::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let first = stamps.next();
        clock.set(first - Duration::hours(1));
        assert!(stamps.next() > first);
    }

    #[test]
    fn observed_stamps_raise_the_floor() {
        let clock = frozen();
        let stamps = StampIssuer::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let future = clock.now() + Duration::days(1);
        stamps.observe(future);
        assert!(stamps.next() > future);
    }

    #[test]
    fn advancing_clock_is_followed() {
        let clock = frozen();
        let stamps = StampIssuer::new(Arc::clone(&clock) as Arc<dyn Clock>);
        stamps.next();
        clock.advance(Duration::seconds(5));
        assert_eq!(stamps.next(), clock.now());
    }
}
