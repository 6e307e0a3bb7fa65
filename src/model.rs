use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::SchedulingError;
use crate::recurrence;
use crate::timemath::{self, MalformedTime};

/// Time of day in minutes since midnight, always within `0..1440`.
/// Serialized as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < timemath::MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = MalformedTime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        timemath::to_minutes(s).map(Self)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = MalformedTime;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&timemath::format_minutes(self.0))
    }
}

/// Half-open window `[start, end)` within one day. `start < end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    start: TimeOfDay,
    end: TimeOfDay,
}

impl TimeWindow {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Result<Self, SchedulingError> {
        if start >= end {
            return Err(SchedulingError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse both ends from `HH:MM` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, SchedulingError> {
        Self::new(start.parse()?, end.parse()?)
    }

    pub fn start(&self) -> TimeOfDay {
        self.start
    }

    pub fn end(&self) -> TimeOfDay {
        self.end
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        timemath::overlaps(
            self.start.minutes(),
            self.end.minutes(),
            other.start.minutes(),
            other.end.minutes(),
        )
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Weekday index with 0 = Sunday .. 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// A persisted booking. Owned by the store; the engine only ever holds copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Ulid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub location: String,
    pub instructor_id: String,
    /// Derived from `date`, kept in sync by the constructors.
    pub day_of_week: u8,
    pub series_id: Option<Ulid>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn from_candidate(id: Ulid, candidate: &CandidateOccurrence, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            date: candidate.date,
            start_time: candidate.window.start(),
            end_time: candidate.window.end(),
            location: candidate.location.clone(),
            instructor_id: candidate.instructor_id.clone(),
            day_of_week: day_of_week(candidate.date),
            series_id: candidate.series_id,
            created_at,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            end: self.end_time,
        }
    }

    /// The two slots this booking occupies under the store's uniqueness contract.
    pub fn slot_keys(&self) -> [SlotKey; 2] {
        [
            SlotKey::Room {
                location: self.location.clone(),
                date: self.date,
                start: self.start_time,
            },
            SlotKey::Instructor {
                instructor_id: self.instructor_id.clone(),
                date: self.date,
                start: self.start_time,
            },
        ]
    }
}

/// A booking that does not exist yet (or an edit of one that does).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateOccurrence {
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub location: String,
    pub instructor_id: String,
    pub series_id: Option<Ulid>,
    /// Set when re-validating an existing booking so it does not collide with itself.
    pub exclude_id: Option<Ulid>,
}

impl CandidateOccurrence {
    pub fn new(date: NaiveDate, window: TimeWindow, location: impl Into<String>, instructor_id: impl Into<String>) -> Self {
        Self {
            date,
            window,
            location: location.into(),
            instructor_id: instructor_id.into(),
            series_id: None,
            exclude_id: None,
        }
    }

    pub fn day_of_week(&self) -> u8 {
        day_of_week(self.date)
    }
}

/// Weekly recurrence: one occurrence per matching weekday in `[start_date, end_date]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub location: String,
    pub instructor_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub weekday: Weekday,
    pub window: TimeWindow,
    pub exclude_dates: BTreeSet<NaiveDate>,
}

impl SeriesRequest {
    /// Rejects ranges where `end_date <= start_date`.
    pub fn check(&self) -> Result<(), SchedulingError> {
        if self.end_date <= self.start_date {
            return Err(SchedulingError::InvalidDateRange {
                start: self.start_date,
                end: self.end_date,
            });
        }
        Ok(())
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        recurrence::generate(self.start_date, self.end_date, self.weekday, &self.exclude_dates)
    }

    pub fn occurrences(&self, series_id: Option<Ulid>) -> Vec<CandidateOccurrence> {
        self.dates()
            .into_iter()
            .map(|date| CandidateOccurrence {
                date,
                window: self.window,
                location: self.location.clone(),
                instructor_id: self.instructor_id.clone(),
                series_id,
                exclude_id: None,
            })
            .collect()
    }
}

// ── Conflicts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Room,
    Instructor,
}

/// One existing booking colliding with a candidate. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub kind: ConflictKind,
    pub conflicting_booking_id: Ulid,
    pub date: NaiveDate,
    /// Location and instructor of the existing booking.
    pub location: String,
    pub instructor_id: String,
    pub existing_window: String,
    pub candidate_window: String,
}

impl Conflict {
    pub fn between(kind: ConflictKind, existing: &Booking, candidate: &CandidateOccurrence) -> Self {
        Self {
            kind,
            conflicting_booking_id: existing.id,
            date: existing.date,
            location: existing.location.clone(),
            instructor_id: existing.instructor_id.clone(),
            existing_window: existing.window().to_string(),
            candidate_window: candidate.window.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub has_conflicts: bool,
    pub room_conflicts: Vec<Conflict>,
    pub instructor_conflicts: Vec<Conflict>,
    /// Every date evaluated; present only for series validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_dates: Option<Vec<NaiveDate>>,
}

impl ConflictReport {
    pub fn new(room_conflicts: Vec<Conflict>, instructor_conflicts: Vec<Conflict>) -> Self {
        Self {
            has_conflicts: !room_conflicts.is_empty() || !instructor_conflicts.is_empty(),
            room_conflicts,
            instructor_conflicts,
            occurrence_dates: None,
        }
    }

    pub fn merge(&mut self, other: ConflictReport) {
        self.room_conflicts.extend(other.room_conflicts);
        self.instructor_conflicts.extend(other.instructor_conflicts);
        self.has_conflicts = !self.room_conflicts.is_empty() || !self.instructor_conflicts.is_empty();
    }

    pub fn conflict_count(&self) -> usize {
        self.room_conflicts.len() + self.instructor_conflicts.len()
    }
}

// ── Uniqueness slots ─────────────────────────────────────────────

/// A slot guarded by the store's uniqueness contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SlotKey {
    #[serde(rename_all = "camelCase")]
    Room {
        location: String,
        date: NaiveDate,
        start: TimeOfDay,
    },
    #[serde(rename_all = "camelCase")]
    Instructor {
        instructor_id: String,
        date: NaiveDate,
        start: TimeOfDay,
    },
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Room { location, date, start } => write!(f, "room {location} on {date} at {start}"),
            SlotKey::Instructor {
                instructor_id,
                date,
                start,
            } => write!(f, "instructor {instructor_id} on {date} at {start}"),
        }
    }
}

// ── Decisions ────────────────────────────────────────────────────

/// Why a request was not committed. Always a scheduling collision, never a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Found by the pre-flight check; resubmit with force to override.
    Conflicts(ConflictReport),
    /// Found by the final check just before the write.
    LateConflicts(ConflictReport),
    /// The store's uniqueness constraint vetoed the write.
    Duplicate(SlotKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<T> {
    Committed(T),
    Rejected(Rejection),
}

impl<T> Decision<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Decision::Committed(_))
    }

    pub fn committed(self) -> Option<T> {
        match self {
            Decision::Committed(v) => Some(v),
            Decision::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Decision::Committed(_) => None,
            Decision::Rejected(r) => Some(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum SkipReason {
    LateConflict { report: ConflictReport },
    Duplicate { slot: SlotKey },
    Failed { message: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedOccurrence {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Result of a committed series. Partial success is still success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesOutcome {
    pub series_id: Ulid,
    pub inserted_count: usize,
    pub booking_ids: Vec<Ulid>,
    pub skipped: Vec<SkippedOccurrence>,
    pub cancelled: bool,
}

impl SeriesOutcome {
    pub fn new(series_id: Ulid) -> Self {
        Self {
            series_id,
            inserted_count: 0,
            booking_ids: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
        }
    }

    pub fn skip(&mut self, date: NaiveDate, reason: SkipReason) {
        self.skipped.push(SkippedOccurrence { date, reason });
    }
}

/// Journal record. One variant per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingInserted { booking: Booking },
    BookingReplaced { booking: Booking },
    BookingDeleted { id: Ulid },
}
