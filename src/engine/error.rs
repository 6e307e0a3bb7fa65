use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Rejection, TimeOfDay};
use crate::store::StoreError;
use crate::timemath::MalformedTime;

/// Faults that stop a request. Scheduling collisions are not errors; they come
/// back as [`Rejection`] inside a `Decision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    MalformedTime(String),
    MalformedDate(String),
    InvalidWindow { start: TimeOfDay, end: TimeOfDay },
    InvalidWeekday(u8),
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    NotFound(Ulid),
    StorageUnavailable(String),
    /// The store failed after part of a series was written. Those bookings stay
    /// committed and were already handed to the owner ledger.
    SeriesInterrupted {
        series_id: Ulid,
        booking_ids: Vec<Ulid>,
        cause: String,
    },
    Internal(String),
}

impl std::fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulingError::MalformedTime(t) => write!(f, "malformed time of day: {t:?}"),
            SchedulingError::MalformedDate(d) => write!(f, "malformed date: {d:?}"),
            SchedulingError::InvalidWindow { start, end } => {
                write!(f, "invalid time window {start}-{end}: start must be before end")
            }
            SchedulingError::InvalidWeekday(i) => write!(f, "invalid day of week {i}: expected 0 (Sunday) to 6"),
            SchedulingError::InvalidDateRange { start, end } => {
                write!(f, "invalid date range {start}..{end}: end must be after start")
            }
            SchedulingError::NotFound(id) => write!(f, "booking not found: {id}"),
            SchedulingError::StorageUnavailable(e) => write!(f, "storage unavailable: {e}"),
            SchedulingError::SeriesInterrupted { series_id, booking_ids, cause } => write!(
                f,
                "series {series_id} interrupted after {} bookings: {cause}",
                booking_ids.len()
            ),
            SchedulingError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for SchedulingError {}

impl From<MalformedTime> for SchedulingError {
    fn from(e: MalformedTime) -> Self {
        SchedulingError::MalformedTime(e.0)
    }
}

/// Duplicate slots are intercepted by the write paths before conversion.
impl From<StoreError> for SchedulingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SchedulingError::NotFound(id),
            StoreError::IdInUse(id) => SchedulingError::Internal(format!("booking id {id} already in use")),
            other => SchedulingError::StorageUnavailable(other.to_string()),
        }
    }
}

// ── Transport mapping ───────────────────────────────────────────

impl SchedulingError {
    pub fn status(&self) -> u16 {
        match self {
            SchedulingError::MalformedTime(_)
            | SchedulingError::MalformedDate(_)
            | SchedulingError::InvalidWindow { .. }
            | SchedulingError::InvalidWeekday(_)
            | SchedulingError::InvalidDateRange { .. } => 400,
            SchedulingError::NotFound(_) => 404,
            SchedulingError::Internal(_) => 500,
            SchedulingError::StorageUnavailable(_) | SchedulingError::SeriesInterrupted { .. } => 503,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SchedulingError::MalformedTime(_) => "malformed_time",
            SchedulingError::MalformedDate(_) => "malformed_date",
            SchedulingError::InvalidWindow { .. } => "invalid_window",
            SchedulingError::InvalidWeekday(_) => "invalid_weekday",
            SchedulingError::InvalidDateRange { .. } => "invalid_date_range",
            SchedulingError::NotFound(_) => "not_found",
            SchedulingError::StorageUnavailable(_) => "storage_unavailable",
            SchedulingError::SeriesInterrupted { .. } => "series_interrupted",
            SchedulingError::Internal(_) => "internal",
        }
    }
}

impl Rejection {
    pub fn status(&self) -> u16 {
        409
    }

    pub fn code(&self) -> &'static str {
        match self {
            Rejection::Conflicts(_) => "conflict_detected",
            Rejection::LateConflicts(_) => "conflict_detected_late",
            Rejection::Duplicate(_) => "duplicate_booking",
        }
    }
}
