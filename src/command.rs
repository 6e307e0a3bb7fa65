use std::collections::BTreeSet;

use serde::Deserialize;
use ulid::Ulid;

use crate::clock::Clock;
use crate::engine::SchedulingError;
use crate::model::*;
use crate::recurrence::weekday_from_index;

/// One request line. Dates and times stay strings until [`CandidateInput::resolve`]
/// or [`SeriesInput::resolve`] so that format errors map to the scheduling
/// error table rather than to a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Command {
    ValidateSingle {
        booking: CandidateInput,
        #[serde(default)]
        exclude_id: Option<Ulid>,
    },
    ValidateSeries {
        series: SeriesInput,
    },
    ScheduleSingle {
        booking: CandidateInput,
        #[serde(default)]
        force: bool,
    },
    ScheduleSeries {
        series: SeriesInput,
        #[serde(default)]
        force: bool,
    },
    UpdateBooking {
        id: Ulid,
        booking: CandidateInput,
        #[serde(default)]
        force: bool,
    },
    CancelBooking {
        id: Ulid,
    },
}

impl Command {
    pub fn op(&self) -> &'static str {
        match self {
            Command::ValidateSingle { .. } => "validate_single",
            Command::ValidateSeries { .. } => "validate_series",
            Command::ScheduleSingle { .. } => "schedule_single",
            Command::ScheduleSeries { .. } => "schedule_series",
            Command::UpdateBooking { .. } => "update_booking",
            Command::CancelBooking { .. } => "cancel_booking",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInput {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
    pub instructor_id: String,
}

impl CandidateInput {
    pub fn resolve(&self, clock: &dyn Clock) -> Result<CandidateOccurrence, SchedulingError> {
        Ok(CandidateOccurrence::new(
            clock.parse_day(&self.date)?,
            TimeWindow::parse(&self.start_time, &self.end_time)?,
            self.location.as_str(),
            self.instructor_id.as_str(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesInput {
    pub location: String,
    pub instructor_id: String,
    pub start_date: String,
    pub end_date: String,
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub exclude_dates: Vec<String>,
}

impl SeriesInput {
    pub fn resolve(&self, clock: &dyn Clock) -> Result<SeriesRequest, SchedulingError> {
        let exclude_dates = self
            .exclude_dates
            .iter()
            .map(|d| clock.parse_day(d))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(SeriesRequest {
            location: self.location.clone(),
            instructor_id: self.instructor_id.clone(),
            start_date: clock.parse_day(&self.start_date)?,
            end_date: clock.parse_day(&self.end_date)?,
            weekday: weekday_from_index(self.day_of_week)?,
            window: TimeWindow::parse(&self.start_time, &self.end_time)?,
            exclude_dates,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Empty,
    Parse(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Empty => write!(f, "empty command"),
            CommandError::Parse(s) => write!(f, "parse error: {s}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl CommandError {
    pub fn status(&self) -> u16 {
        400
    }

    pub fn code(&self) -> &'static str {
        "invalid_command"
    }
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(CommandError::Empty);
    }
    serde_json::from_str(line).map_err(|e| CommandError::Parse(e.to_string()))
}
