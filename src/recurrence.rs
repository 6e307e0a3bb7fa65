//! Weekly recurrence: every date in an inclusive range that falls on one
//! weekday, minus an exclusion set.
//!
//! Exclusions are compared as calendar days. Callers normalize timestamps to
//! the reference timezone before building the set (see [`crate::clock`]).

use std::collections::BTreeSet;

use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::engine::SchedulingError;

const WEEK: Days = Days::new(7);

/// Map 0 = Sunday .. 6 = Saturday to a weekday.
pub fn weekday_from_index(index: u8) -> Result<Weekday, SchedulingError> {
    match index {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        other => Err(SchedulingError::InvalidWeekday(other)),
    }
}

/// First date on or after `from` that falls on `weekday`.
fn first_on_or_after(from: NaiveDate, weekday: Weekday) -> Option<NaiveDate> {
    let target = weekday.num_days_from_sunday();
    let current = from.weekday().num_days_from_sunday();
    let offset = (target + 7 - current) % 7;
    from.checked_add_days(Days::new(u64::from(offset)))
}

/// Lazy, restartable iterator over the dates of one weekly pattern.
#[derive(Debug, Clone)]
pub struct WeeklyDates<'a> {
    next: Option<NaiveDate>,
    end: NaiveDate,
    exclude: &'a BTreeSet<NaiveDate>,
}

impl Iterator for WeeklyDates<'_> {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        loop {
            let date = self.next.filter(|d| *d <= self.end)?;
            self.next = date.checked_add_days(WEEK);
            if !self.exclude.contains(&date) {
                return Some(date);
            }
        }
    }
}

/// Dates in `[start, end]` falling on `weekday`, skipping `exclude`.
/// An inverted range yields nothing.
pub fn weekly_dates(
    start: NaiveDate,
    end: NaiveDate,
    weekday: Weekday,
    exclude: &BTreeSet<NaiveDate>,
) -> WeeklyDates<'_> {
    let next = if start > end { None } else { first_on_or_after(start, weekday) };
    WeeklyDates { next, end, exclude }
}

pub fn generate(
    start: NaiveDate,
    end: NaiveDate,
    weekday: Weekday,
    exclude: &BTreeSet<NaiveDate>,
) -> Vec<NaiveDate> {
    weekly_dates(start, end, weekday, exclude).collect()
}
