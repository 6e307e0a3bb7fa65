use std::sync::Arc;

use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::store::{BookingStore, ResourceRef};

use super::SchedulingError;

/// Read-only conflict queries against the booking store.
///
/// Each call reads fresh from the store; nothing is cached between calls.
#[derive(Clone)]
pub struct ConflictDetector {
    store: Arc<dyn BookingStore>,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// Existing bookings in the same location whose window overlaps the candidate's.
    pub async fn check_room_conflicts(
        &self,
        occurrence: &CandidateOccurrence,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<Conflict>, SchedulingError> {
        let existing = self
            .store
            .find_candidates(occurrence.date, ResourceRef::Location(&occurrence.location), exclude_id)
            .await?;
        Ok(existing
            .iter()
            .filter(|b| b.window().overlaps(&occurrence.window))
            .map(|b| Conflict::between(ConflictKind::Room, b, occurrence))
            .collect())
    }

    /// Existing bookings for the same instructor in a *different* location whose
    /// window overlaps. Same-location clashes are already room conflicts.
    pub async fn check_instructor_conflicts(
        &self,
        occurrence: &CandidateOccurrence,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<Conflict>, SchedulingError> {
        let existing = self
            .store
            .find_candidates(occurrence.date, ResourceRef::Instructor(&occurrence.instructor_id), exclude_id)
            .await?;
        Ok(existing
            .iter()
            .filter(|b| b.location != occurrence.location)
            .filter(|b| b.window().overlaps(&occurrence.window))
            .map(|b| Conflict::between(ConflictKind::Instructor, b, occurrence))
            .collect())
    }

    /// Both checks for one occurrence. `exclude_id` falls back to the candidate's own.
    pub async fn validate_single(
        &self,
        occurrence: &CandidateOccurrence,
        exclude_id: Option<Ulid>,
    ) -> Result<ConflictReport, SchedulingError> {
        let exclude_id = exclude_id.or(occurrence.exclude_id);
        let room = self.check_room_conflicts(occurrence, exclude_id).await?;
        let instructor = self.check_instructor_conflicts(occurrence, exclude_id).await?;
        metrics::counter!(crate::observability::VALIDATIONS_TOTAL, "scope" => "single").increment(1);
        debug!(
            date = %occurrence.date,
            window = %occurrence.window,
            location = %occurrence.location,
            room = room.len(),
            instructor = instructor.len(),
            "occurrence checked"
        );
        Ok(ConflictReport::new(room, instructor))
    }

    /// Expand the series and check every date. Conflicts from all dates are
    /// concatenated; `occurrence_dates` lists every date evaluated.
    pub async fn validate_series(&self, request: &SeriesRequest) -> Result<ConflictReport, SchedulingError> {
        let occurrences = request.occurrences(None);
        let mut report = ConflictReport::default();
        for occurrence in &occurrences {
            report.merge(self.validate_single(occurrence, None).await?);
        }
        report.occurrence_dates = Some(occurrences.iter().map(|o| o.date).collect());
        metrics::counter!(crate::observability::VALIDATIONS_TOTAL, "scope" => "series").increment(1);
        Ok(report)
    }
}
