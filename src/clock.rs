//! Clock and calendar-day normalization.
//!
//! All dates the engine compares are calendar days in one reference timezone.
//! Timestamps arriving from callers are converted into that zone first, so an
//! exclusion given as `2023-01-11T00:30:00+01:00` lands on the same day as the
//! occurrence it names regardless of the host's local zone.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::engine::SchedulingError;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The reference timezone for calendar-day comparisons.
    fn timezone(&self) -> Tz;

    fn calendar_day(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone()).date_naive()
    }

    fn today(&self) -> NaiveDate {
        self.calendar_day(self.now())
    }

    /// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp.
    fn parse_day(&self, input: &str) -> Result<NaiveDate, SchedulingError> {
        let input = input.trim();
        if let Ok(day) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            return Ok(day);
        }
        DateTime::parse_from_rfc3339(input)
            .map(|ts| self.calendar_day(ts.with_timezone(&Utc)))
            .map_err(|_| SchedulingError::MalformedDate(input.to_string()))
    }
}

/// Wall clock in a configured reference zone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Frozen clock for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
    tz: Tz,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, tz: Tz) -> Self {
        Self { now, tz }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}
