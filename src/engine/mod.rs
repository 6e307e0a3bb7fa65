//! Scheduling coordinator.
//!
//! Requests run independently with no shared in-process state. Correctness
//! under concurrent schedulers rests on two things: the final check, which
//! re-reads the store immediately before the write to narrow the race window,
//! and the store's slot uniqueness, which deterministically rejects whatever
//! the final check missed. No locks are taken here.

mod conflict;
mod error;
mod mutations;

pub use conflict::ConflictDetector;
pub use error::SchedulingError;

use std::sync::Arc;

use ulid::Ulid;

use crate::clock::Clock;
use crate::ledger::OwnerLedger;
use crate::model::*;
use crate::store::BookingStore;

/// Occurrences written per `insert_many` call.
pub const DEFAULT_BATCH_SIZE: usize = 50;

pub struct Scheduler {
    detector: ConflictDetector,
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    ledger: Option<Arc<dyn OwnerLedger>>,
    batch_size: usize,
}

impl Scheduler {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            detector: ConflictDetector::new(store.clone()),
            store,
            clock,
            ledger: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn OwnerLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Read-only conflict check for one candidate.
    pub async fn validate_single(
        &self,
        candidate: &CandidateOccurrence,
        exclude_id: Option<Ulid>,
    ) -> Result<ConflictReport, SchedulingError> {
        self.detector.validate_single(candidate, exclude_id).await
    }

    /// Read-only conflict check for every occurrence of a series.
    pub async fn validate_series(&self, request: &SeriesRequest) -> Result<ConflictReport, SchedulingError> {
        request.check()?;
        self.detector.validate_series(request).await
    }
}
