//! Time source for the expiring stores.
//!
//! The pending-login and session stores never call `Utc::now()` directly;
//! they ask a [`Clock`]. Production wiring uses [`SystemClock`], tests use
//! [`ManualClock`] to step past the 10-minute and 24-hour windows without
//! sleeping.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// A source of "now".
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
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
    /// Start the clock at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    /// Start the clock at the current wall-clock time.
    #[must_use]
    pub fn starting_now() -> Arc<Self> {
        Self::new(Utc::now())
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Shared clock handle used by the stores.
pub type SharedClock = Arc<dyn Clock>;

/// The default wall-clock handle.
#[must_use]
pub fn system() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        // GIVEN: a manual clock
        let clock = ManualClock::starting_now();
        let t0 = clock.now();

        // THEN: it does not drift on its own
        assert_eq!(clock.now(), t0);

        // WHEN: advanced by 11 minutes
        clock.advance(TimeDelta::minutes(11));

        // THEN: now reflects exactly that step
        assert_eq!(clock.now() - t0, TimeDelta::minutes(11));
    }
}
