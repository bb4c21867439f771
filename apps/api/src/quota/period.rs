//! Daily quota periods keyed by UTC calendar date.

use std::fmt;
#[cfg(test)]
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One UTC calendar day. Counters accumulate within a period and start
/// fresh under the next one, so no cleanup job is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Period(NaiveDate);

impl Period {
    pub fn containing(instant: DateTime<Utc>) -> Self {
        Self(instant.date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Storage key form, `YYYY-MM-DD`.
    pub fn key(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    /// Next UTC midnight, i.e. when counters for this period stop applying.
    pub fn next_boundary(&self) -> Option<DateTime<Utc>> {
        self.0
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl From<NaiveDate> for Period {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

/// Source of the current period. Injected so tests can cross midnight.
pub trait PeriodClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn current_period(&self) -> Period {
        Period::containing(self.now())
    }
}

/// Wall-clock UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl PeriodClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

#[cfg(test)]
impl PeriodClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_key_format() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 7, 15, 4, 5).unwrap();
        let period = Period::containing(instant);
        assert_eq!(period.key(), "2024-03-07");
        assert_eq!(period.to_string(), "2024-03-07");
    }

    #[test]
    fn test_calls_straddling_midnight_differ() {
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap());
        let before = clock.current_period();
        clock.advance(chrono::Duration::seconds(1));
        let after = clock.current_period();
        assert_ne!(before, after);
        assert_eq!(after.key(), "2025-01-01");
    }

    #[test]
    fn test_same_day_same_period() {
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let morning = clock.current_period();
        clock.set(Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 59).unwrap());
        assert_eq!(morning, clock.current_period());
    }

    #[test]
    fn test_next_boundary_is_next_utc_midnight() {
        let period = Period::containing(Utc.with_ymd_and_hms(2024, 2, 28, 9, 30, 0).unwrap());
        assert_eq!(
            period.next_boundary(),
            Some(Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_period_serializes_as_date() {
        let period = Period::from(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());
        assert_eq!(serde_json::to_string(&period).unwrap(), "\"2024-01-09\"");
    }
}
