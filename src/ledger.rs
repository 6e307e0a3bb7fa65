//! Downstream bookkeeping: the owning instructor's list of booking ids.
//!
//! Propagation is best-effort. Committed bookings are never rolled back when
//! the ledger write fails.

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::store::StoreError;

#[async_trait]
pub trait OwnerLedger: Send + Sync {
    async fn append_bookings(&self, instructor_id: &str, booking_ids: &[Ulid]) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryLedger {
    lists: DashMap<String, Vec<Ulid>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bookings_of(&self, instructor_id: &str) -> Vec<Ulid> {
        self.lists.get(instructor_id).map(|e| e.value().clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OwnerLedger for MemoryLedger {
    async fn append_bookings(&self, instructor_id: &str, booking_ids: &[Ulid]) -> Result<(), StoreError> {
        self.lists
            .entry(instructor_id.to_string())
            .or_default()
            .extend_from_slice(booking_ids);
        Ok(())
    }
}
