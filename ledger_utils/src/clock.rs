use std::cell::Cell;
use std::time::Duration;

use thiserror::Error;

/// Seconds since the unix epoch, the unit used for lock expiries
pub type Timestamp = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("clock cannot move backwards from {now} to {requested}")]
    Backwards { now: Timestamp, requested: Timestamp },
    #[error("advancing {now} by {by:?} overflows the timestamp range")]
    Overflow { now: Timestamp, by: Duration },
    #[error("clock only moves in whole seconds, cannot advance by {by:?}")]
    FractionalSeconds { by: Duration },
}

/// A source of the current time
///
/// Lock checks read the clock at the moment an operation executes, never at the moment a lock
/// was recorded.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// A manually driven clock for tests and scenarios
///
/// Time only moves when `advance` or `advance_to` is called, and never moves backwards.
#[derive(Debug, Default, Clone)]
pub struct FakeClock {
    now: Cell<Timestamp>,
}

impl FakeClock {
    pub fn new(start: Timestamp) -> Self {
        Self { now: Cell::new(start) }
    }

    /// Moves time forward by `by`, returning the new time
    ///
    /// `by` must be a whole number of seconds.
    pub fn advance(&self, by: Duration) -> Result<Timestamp, ClockError> {
        if by.subsec_nanos() != 0 {
            return Err(ClockError::FractionalSeconds { by });
        }
        let now = self.now.get();
        let next = now.checked_add(by.as_secs()).ok_or(ClockError::Overflow { now, by })?;
        self.now.set(next);
        Ok(next)
    }

    /// Moves time forward to exactly `at`
    pub fn advance_to(&self, at: Timestamp) -> Result<Timestamp, ClockError> {
        let now = self.now.get();
        if at < now {
            return Err(ClockError::Backwards { now, requested: at });
        }
        self.now.set(at);
        Ok(at)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Timestamp {
        self.now.get()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{Clock, ClockError, FakeClock};

    #[test]
    fn it_advances_monotonically() {
        let clock = FakeClock::new(1_000);
        assert_eq!(clock.now(), 1_000);

        clock.advance(Duration::from_secs(999)).unwrap();
        assert_eq!(clock.now(), 1_999);

        clock.advance_to(2_000).unwrap();
        assert_eq!(clock.now(), 2_000);

        // advancing to the current time is a no-op
        clock.advance_to(2_000).unwrap();
        assert_eq!(clock.now(), 2_000);
    }

    #[test]
    fn it_refuses_to_move_backwards() {
        let clock = FakeClock::new(50);
        let err = clock.advance_to(49).unwrap_err();
        assert_eq!(err, ClockError::Backwards { now: 50, requested: 49 });
        assert_eq!(clock.now(), 50);
    }

    #[test]
    fn it_detects_overflow() {
        let clock = FakeClock::new(u64::MAX - 1);
        clock.advance(Duration::from_secs(2)).unwrap_err();
        assert_eq!(clock.now(), u64::MAX - 1);
    }

    #[test]
    fn it_rejects_fractional_seconds() {
        let clock = FakeClock::new(1_000);
        let by = Duration::from_millis(900);
        assert_eq!(clock.advance(by).unwrap_err(), ClockError::FractionalSeconds { by });
        let by = Duration::from_millis(1_500);
        assert_eq!(clock.advance(by).unwrap_err(), ClockError::FractionalSeconds { by });
        assert_eq!(clock.now(), 1_000);

        assert_eq!(clock.advance(Duration::from_millis(2_000)).unwrap(), 1_002);
    }
}
