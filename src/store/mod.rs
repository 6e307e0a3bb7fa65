//! Booking storage contract and the reference in-memory implementation.
//!
//! Uniqueness contract: a write is rejected with [`StoreError::Duplicate`] when
//! either of its slots, `(location, date, startTime)` or
//! `(instructorId, date, startTime)`, is already held by another booking. This
//! is the deterministic backstop behind the engine's final conflict check.

mod memory;

pub use memory::{MemoryStore, compact_if_needed, run_compactor};

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Booking, SlotKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Duplicate(SlotKey),
    NotFound(Ulid),
    /// Another booking already holds this id.
    IdInUse(Ulid),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Duplicate(slot) => write!(f, "duplicate booking: {slot} is taken"),
            StoreError::NotFound(id) => write!(f, "booking not found: {id}"),
            StoreError::IdInUse(id) => write!(f, "booking id {id} already in use"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Which resource a candidate lookup is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceRef<'a> {
    Location(&'a str),
    Instructor(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertFailure {
    /// Position in the submitted batch.
    pub index: usize,
    pub error: StoreError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertManyOutcome {
    pub inserted_count: usize,
    pub ids: Vec<Ulid>,
    pub failures: Vec<InsertFailure>,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Bookings on `date` for the given resource, minus `exclude_id`.
    /// No overlap filtering happens here.
    async fn find_candidates(
        &self,
        date: NaiveDate,
        resource: ResourceRef<'_>,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<Booking>, StoreError>;

    async fn get(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;

    async fn insert_one(&self, booking: Booking) -> Result<Ulid, StoreError>;

    /// Unordered insert: every booking is attempted, a failure on one never
    /// aborts the rest. Returns `Err` only when nothing could be attempted.
    async fn insert_many(&self, bookings: Vec<Booking>) -> Result<InsertManyOutcome, StoreError>;

    /// Overwrite the booking with the same id, subject to the uniqueness contract.
    async fn replace_one(&self, booking: Booking) -> Result<(), StoreError>;

    async fn delete_one(&self, id: Ulid) -> Result<Booking, StoreError>;
}
