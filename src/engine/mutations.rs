use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{self, record_rejection};
use crate::store::StoreError;

use super::{Scheduler, SchedulingError};

impl Scheduler {
    /// Pre-flight check, final check, write.
    ///
    /// With `force` set, conflicts found by either check are ignored, but the
    /// store's slot uniqueness still applies and surfaces as
    /// [`Rejection::Duplicate`].
    pub async fn schedule_single(
        &self,
        candidate: CandidateOccurrence,
        force: bool,
    ) -> Result<Decision<Booking>, SchedulingError> {
        let started = Instant::now();
        let result = self.commit_single(None, candidate, force).await;
        metrics::histogram!(observability::SCHEDULE_DURATION_SECONDS, "op" => "schedule_single")
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Edit an existing booking in place. The booking never conflicts with itself.
    pub async fn update_booking(
        &self,
        id: Ulid,
        mut candidate: CandidateOccurrence,
        force: bool,
    ) -> Result<Decision<Booking>, SchedulingError> {
        let existing = self.store.get(id).await?.ok_or(SchedulingError::NotFound(id))?;
        candidate.exclude_id = Some(id);
        candidate.series_id = existing.series_id;
        let started = Instant::now();
        let result = self.commit_single(Some(existing), candidate, force).await;
        metrics::histogram!(observability::SCHEDULE_DURATION_SECONDS, "op" => "update_booking")
            .record(started.elapsed().as_secs_f64());
        result
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, SchedulingError> {
        let removed = self.store.delete_one(id).await?;
        info!(%id, date = %removed.date, location = %removed.location, "booking cancelled");
        Ok(removed)
    }

    /// Shared path for new bookings (`existing == None`) and edits.
    async fn commit_single(
        &self,
        existing: Option<Booking>,
        candidate: CandidateOccurrence,
        force: bool,
    ) -> Result<Decision<Booking>, SchedulingError> {
        let exclude_id = candidate.exclude_id;

        let report = self.detector.validate_single(&candidate, exclude_id).await?;
        if report.has_conflicts && !force {
            debug!(date = %candidate.date, conflicts = report.conflict_count(), "rejected at pre-flight");
            return Ok(reject(Rejection::Conflicts(report)));
        }

        // Final check: under force the result would be ignored anyway.
        if !force {
            let late = self.detector.validate_single(&candidate, exclude_id).await?;
            if late.has_conflicts {
                warn!(date = %candidate.date, location = %candidate.location, "conflict appeared before write");
                return Ok(reject(Rejection::LateConflicts(late)));
            }
        }

        let written = match existing {
            None => {
                let booking = Booking::from_candidate(Ulid::new(), &candidate, self.clock.now());
                self.store.insert_one(booking.clone()).await.map(|_| booking)
            }
            Some(old) => {
                let booking = Booking::from_candidate(old.id, &candidate, old.created_at);
                self.store.replace_one(booking.clone()).await.map(|()| booking)
            }
        };

        match written {
            Ok(booking) => {
                metrics::counter!(observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
                info!(
                    id = %booking.id,
                    date = %booking.date,
                    window = %booking.window(),
                    location = %booking.location,
                    instructor = %booking.instructor_id,
                    forced = force && report.has_conflicts,
                    "booking committed"
                );
                Ok(Decision::Committed(booking))
            }
            Err(StoreError::Duplicate(slot)) => {
                warn!(%slot, "store rejected duplicate slot");
                Ok(reject(Rejection::Duplicate(slot)))
            }
            Err(e) => {
                error!(date = %candidate.date, "booking write failed: {e}");
                Err(e.into())
            }
        }
    }

    pub async fn schedule_series(
        &self,
        request: &SeriesRequest,
        force: bool,
    ) -> Result<Decision<SeriesOutcome>, SchedulingError> {
        self.schedule_series_with_cancel(request, force, &CancellationToken::new())
            .await
    }

    /// Validate every occurrence, then write in batches of `batch_size`.
    ///
    /// Occurrences that fail at write time are reported in `skipped` and never
    /// abort the rest. `cancel` is honored between batches; everything not yet
    /// attempted is then skipped as cancelled. If the store itself fails after
    /// some batches were written, those bookings are kept and handed to the
    /// ledger before [`SchedulingError::SeriesInterrupted`] is returned.
    pub async fn schedule_series_with_cancel(
        &self,
        request: &SeriesRequest,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<Decision<SeriesOutcome>, SchedulingError> {
        let started = Instant::now();
        request.check()?;

        let report = self.detector.validate_series(request).await?;
        if report.has_conflicts && !force {
            debug!(
                location = %request.location,
                dates = report.occurrence_dates.as_ref().map_or(0, Vec::len),
                conflicts = report.conflict_count(),
                "series rejected at pre-flight"
            );
            return Ok(reject(Rejection::Conflicts(report)));
        }

        let series_id = Ulid::new();
        let occurrences = request.occurrences(Some(series_id));
        let now = self.clock.now();
        let mut outcome = SeriesOutcome::new(series_id);

        for (n, batch) in occurrences.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                for occurrence in &occurrences[n * self.batch_size..] {
                    outcome.skip(occurrence.date, SkipReason::Cancelled);
                }
                outcome.cancelled = true;
                info!(%series_id, written = outcome.inserted_count, "series cancelled between batches");
                break;
            }
            if let Err(e) = self.commit_batch(batch, force, now, &mut outcome).await {
                error!(%series_id, written = outcome.inserted_count, "series aborted: {e}");
                if outcome.booking_ids.is_empty() {
                    return Err(e);
                }
                self.propagate_to_ledger(request, &outcome).await;
                return Err(SchedulingError::SeriesInterrupted {
                    series_id,
                    booking_ids: outcome.booking_ids,
                    cause: e.to_string(),
                });
            }
        }

        outcome.skipped.sort_by_key(|s| s.date);
        for skipped in &outcome.skipped {
            metrics::counter!(observability::SERIES_SKIPPED_TOTAL, "reason" => observability::skip_label(&skipped.reason))
                .increment(1);
        }
        self.propagate_to_ledger(request, &outcome).await;

        info!(
            %series_id,
            location = %request.location,
            instructor = %request.instructor_id,
            inserted = outcome.inserted_count,
            skipped = outcome.skipped.len(),
            "series committed"
        );
        metrics::histogram!(observability::SCHEDULE_DURATION_SECONDS, "op" => "schedule_series")
            .record(started.elapsed().as_secs_f64());
        Ok(Decision::Committed(outcome))
    }

    /// Final check and unordered insert for one batch.
    async fn commit_batch(
        &self,
        batch: &[CandidateOccurrence],
        force: bool,
        now: DateTime<Utc>,
        outcome: &mut SeriesOutcome,
    ) -> Result<(), SchedulingError> {
        let mut to_insert = Vec::with_capacity(batch.len());
        for occurrence in batch {
            if !force {
                let late = self.detector.validate_single(occurrence, None).await?;
                if late.has_conflicts {
                    warn!(date = %occurrence.date, "series occurrence conflicted before write");
                    metrics::counter!(observability::CONFLICTS_TOTAL, "stage" => "final").increment(1);
                    outcome.skip(occurrence.date, SkipReason::LateConflict { report: late });
                    continue;
                }
            }
            to_insert.push(Booking::from_candidate(Ulid::new(), occurrence, now));
        }
        if to_insert.is_empty() {
            return Ok(());
        }

        let dates: Vec<_> = to_insert.iter().map(|b| b.date).collect();
        let written = self.store.insert_many(to_insert).await?;

        for failure in written.failures {
            let date = dates[failure.index];
            let reason = match failure.error {
                StoreError::Duplicate(slot) => {
                    warn!(%slot, "series occurrence hit duplicate slot");
                    metrics::counter!(observability::DUPLICATES_TOTAL).increment(1);
                    SkipReason::Duplicate { slot }
                }
                other => {
                    warn!(%date, "series occurrence failed: {other}");
                    SkipReason::Failed {
                        message: other.to_string(),
                    }
                }
            };
            outcome.skip(date, reason);
        }
        metrics::counter!(observability::BOOKINGS_COMMITTED_TOTAL).increment(written.inserted_count as u64);
        outcome.inserted_count += written.inserted_count;
        outcome.booking_ids.extend(written.ids);
        Ok(())
    }

    /// Best-effort: a ledger failure is logged and never undoes committed bookings.
    async fn propagate_to_ledger(&self, request: &SeriesRequest, outcome: &SeriesOutcome) {
        let Some(ledger) = &self.ledger else { return };
        if outcome.booking_ids.is_empty() {
            return;
        }
        if let Err(e) = ledger
            .append_bookings(&request.instructor_id, &outcome.booking_ids)
            .await
        {
            metrics::counter!(observability::LEDGER_FAILURES_TOTAL).increment(1);
            warn!(
                series_id = %outcome.series_id,
                instructor = %request.instructor_id,
                bookings = outcome.booking_ids.len(),
                "owner ledger update failed: {e}"
            );
        }
    }
}

fn reject<T>(rejection: Rejection) -> Decision<T> {
    record_rejection(&rejection);
    Decision::Rejected(rejection)
}
