//! Time abstraction so date-dependent logic can be tested deterministically.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, NaiveDate, Utc};

/// Trait for abstracting time access.
///
/// Forecasts are anchored on "today"; injecting a mock clock pins that down
/// in tests.
pub trait Clock: Send + Sync {
    /// Get the current time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Get the current time in the local timezone.
    fn now_local(&self) -> DateTime<Local>;

    /// The local calendar date.
    fn today(&self) -> NaiveDate {
        self.now_local().date_naive()
    }
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Mock clock for testing with controllable time.
#[derive(Debug, Clone)]
pub struct MockClock {
    utc_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock set to the given UTC time.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            utc_time: Arc::new(Mutex::new(time)),
        }
    }

    /// Set the mock clock to a new time.
    pub fn set_time(&self, time: DateTime<Utc>) {
        *self.utc_time.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut time = self.utc_time.lock().unwrap_or_else(PoisonError::into_inner);
        *time += duration;
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.utc_time.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_local(&self) -> DateTime<Local> {
        self.now_utc().with_timezone(&Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_system_clock_returns_current_time() {
        let clock = SystemClock;
        let before = Utc::now();
        let now = clock.now_utc();
        let after = Utc::now();

        assert!(now >= before && now <= after);
    }

    #[test]
    fn test_mock_clock_set_and_advance() {
        let clock = MockClock::new(noon(2024, 6, 17));
        assert_eq!(clock.now_utc(), noon(2024, 6, 17));

        clock.advance(Duration::days(2));
        assert_eq!(clock.now_utc(), noon(2024, 6, 19));

        clock.set_time(noon(2025, 1, 1));
        assert_eq!(clock.now_utc(), noon(2025, 1, 1));
    }

    #[test]
    fn test_mock_clock_today() {
        let clock = MockClock::new(noon(2024, 6, 17));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 6, 17).unwrap());
    }

    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::new(noon(2024, 6, 17));
        let shared = clock.clone();
        clock.advance(Duration::hours(1));

        assert_eq!(shared.now_utc(), clock.now_utc());
    }
}
