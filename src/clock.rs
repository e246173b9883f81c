//! Clock abstraction and business-day helpers.
//!
//! All day and hour decisions are made in one configured time zone so that
//! rollover does not depend on the host's local time.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

/// A clock that provides the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Calendar day of `now` in `tz`.
pub fn business_day(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Hour of day (0-23) of `now` in `tz`.
pub fn local_hour(now: DateTime<Utc>, tz: Tz) -> u32 {
    now.with_timezone(&tz).hour()
}

#[cfg(test)]
pub use fake::FakeClock;

#[cfg(test)]
mod fake {
    use super::Clock;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use chrono_tz::Tz;
    use std::sync::{Arc, Mutex};

    /// Fake clock for testing with controllable time.
    #[derive(Clone)]
    pub struct FakeClock {
        current: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FakeClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                current: Arc::new(Mutex::new(start)),
            }
        }

        /// Clock set to a wall-clock time in `tz`.
        pub fn at_local(tz: Tz, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Self {
            let local = tz.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap();
            Self::new(local.with_timezone(&Utc))
        }

        /// Advance the clock by the given duration.
        pub fn advance(&self, duration: Duration) {
            *self.current.lock().unwrap() += duration;
        }

        /// Set the clock to a specific instant.
        pub fn set(&self, instant: DateTime<Utc>) {
            *self.current.lock().unwrap() = instant;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.current.lock().unwrap()
        }
    }
}
