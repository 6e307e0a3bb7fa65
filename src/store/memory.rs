use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::{Booking, Event, SlotKey};
use crate::observability;
use crate::wal::Journal;

use super::{BookingStore, InsertFailure, InsertManyOutcome, ResourceRef, StoreError};

// ── Group-commit journal channel ─────────────────────────

enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the journal and batches appends so one fsync covers every append
/// that was already queued when the first one arrived.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                flush_and_respond(&mut journal, batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut journal, other);
                }
            }
            other => handle_non_append(&mut journal, other),
        }
    }
}

fn flush_and_respond(journal: &mut Journal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut append_err = None;
    for (event, _) in &batch {
        if let Err(e) = journal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-written bytes do not ride along with the next batch.
    let flush_err = journal.flush_sync().err();
    metrics::histogram!(observability::JOURNAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    let failure = append_err.or(flush_err);
    for (_, tx) in batch {
        let r = match &failure {
            None => Ok(()),
            Some(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_compact_file(journal.path(), &events).and_then(|()| journal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Dashmap-backed booking store, optionally journaled to disk.
///
/// Slot uniqueness is enforced through the `slots` map's entry API, so two
/// writers racing for the same slot cannot both win.
pub struct MemoryStore {
    bookings: DashMap<Ulid, Booking>,
    by_day: DashMap<NaiveDate, Vec<Ulid>>,
    slots: DashMap<SlotKey, Ulid>,
    journal_tx: Option<mpsc::Sender<JournalCommand>>,
    /// Writes hold it shared; compaction holds it exclusively so no append can
    /// land in the old file after the snapshot was taken.
    write_gate: RwLock<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store with no journal.
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            by_day: DashMap::new(),
            slots: DashMap::new(),
            journal_tx: None,
            write_gate: RwLock::new(()),
        }
    }

    /// Replay the journal at `path` and keep appending to it.
    /// Must be called inside a tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let events = Journal::replay(&path)?;
        let journal = Journal::open(&path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, rx));

        let mut store = Self::new();
        for event in &events {
            store.apply(event);
        }
        store.journal_tx = Some(tx);
        info!(path = %path.display(), records = events.len(), bookings = store.len(), "journal replayed");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn all(&self) -> Vec<Booking> {
        let mut all: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|b| b.id);
        all
    }

    // ── Slot reservation ─────────────────────────────────────

    fn reserve(&self, key: SlotKey, id: Ulid) -> bool {
        match self.slots.entry(key) {
            Entry::Occupied(held) => *held.get() == id,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    fn release(&self, key: &SlotKey, id: Ulid) {
        self.slots.remove_if(key, |_, holder| *holder == id);
    }

    /// Reserve every key for `id` or none of them. Returns the keys newly taken.
    fn reserve_all(&self, keys: &[SlotKey], id: Ulid) -> Result<Vec<SlotKey>, StoreError> {
        let mut taken = Vec::with_capacity(keys.len());
        for key in keys {
            let already_ours = self.slots.get(key).is_some_and(|holder| *holder == id);
            if already_ours {
                continue;
            }
            if !self.reserve(key.clone(), id) {
                for k in &taken {
                    self.release(k, id);
                }
                return Err(StoreError::Duplicate(key.clone()));
            }
            taken.push(key.clone());
        }
        Ok(taken)
    }

    // ── Index maintenance ────────────────────────────────────

    fn index(&self, booking: Booking) {
        self.by_day.entry(booking.date).or_default().push(booking.id);
        self.bookings.insert(booking.id, booking);
    }

    fn unindex(&self, id: Ulid) -> Option<Booking> {
        let (_, old) = self.bookings.remove(&id)?;
        self.drop_from_day(old.date, id);
        Some(old)
    }

    fn drop_from_day(&self, date: NaiveDate, id: Ulid) {
        if let Some(mut ids) = self.by_day.get_mut(&date) {
            ids.retain(|i| *i != id);
        }
    }

    /// Apply a replayed record. Replay trusts the journal; slots are rebuilt from it.
    fn apply(&mut self, event: &Event) {
        match event {
            Event::BookingInserted { booking } | Event::BookingReplaced { booking } => {
                if let Some(old) = self.unindex(booking.id) {
                    for key in old.slot_keys() {
                        self.release(&key, old.id);
                    }
                }
                for key in booking.slot_keys() {
                    self.slots.insert(key, booking.id);
                }
                self.index(booking.clone());
            }
            Event::BookingDeleted { id } => {
                if let Some(old) = self.unindex(*id) {
                    for key in old.slot_keys() {
                        self.release(&key, old.id);
                    }
                }
            }
        }
    }

    // ── Journal ──────────────────────────────────────────────

    async fn journal_append(&self, event: Event) -> Result<(), StoreError> {
        let Some(tx) = &self.journal_tx else {
            return Ok(());
        };
        let (response, rx) = oneshot::channel();
        tx.send(JournalCommand::Append { event, response })
            .await
            .map_err(|_| StoreError::Unavailable("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let Some(tx) = &self.journal_tx else {
            return 0;
        };
        let (response, rx) = oneshot::channel();
        if tx.send(JournalCommand::AppendsSinceCompact { response }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the journal as one insert record per live booking.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(tx) = &self.journal_tx else {
            return Ok(());
        };
        let _exclusive = self.write_gate.write().await;
        let events: Vec<Event> = self
            .all()
            .into_iter()
            .map(|booking| Event::BookingInserted { booking })
            .collect();
        let (response, rx) = oneshot::channel();
        tx.send(JournalCommand::Compact { events, response })
            .await
            .map_err(|_| StoreError::Unavailable("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn find_candidates(
        &self,
        date: NaiveDate,
        resource: ResourceRef<'_>,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<Booking>, StoreError> {
        let ids = self.by_day.get(&date).map(|e| e.value().clone()).unwrap_or_default();
        let found = ids
            .into_iter()
            .filter(|id| Some(*id) != exclude_id)
            .filter_map(|id| self.bookings.get(&id).map(|b| b.value().clone()))
            .filter(|b| match resource {
                ResourceRef::Location(location) => b.location == location,
                ResourceRef::Instructor(instructor) => b.instructor_id == instructor,
            })
            .collect();
        Ok(found)
    }

    async fn get(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|b| b.value().clone()))
    }

    async fn insert_one(&self, booking: Booking) -> Result<Ulid, StoreError> {
        let _shared = self.write_gate.read().await;
        if self.bookings.contains_key(&booking.id) {
            return Err(StoreError::IdInUse(booking.id));
        }
        let taken = self.reserve_all(&booking.slot_keys(), booking.id)?;
        if let Err(e) = self.journal_append(Event::BookingInserted { booking: booking.clone() }).await {
            for key in &taken {
                self.release(key, booking.id);
            }
            return Err(e);
        }
        let id = booking.id;
        debug!(%id, date = %booking.date, location = %booking.location, "booking stored");
        self.index(booking);
        Ok(id)
    }

    async fn insert_many(&self, bookings: Vec<Booking>) -> Result<InsertManyOutcome, StoreError> {
        let mut outcome = InsertManyOutcome::default();
        for (index, booking) in bookings.into_iter().enumerate() {
            match self.insert_one(booking).await {
                Ok(id) => {
                    outcome.inserted_count += 1;
                    outcome.ids.push(id);
                }
                Err(error) => outcome.failures.push(InsertFailure { index, error }),
            }
        }
        Ok(outcome)
    }

    async fn replace_one(&self, booking: Booking) -> Result<(), StoreError> {
        let _shared = self.write_gate.read().await;
        let old = self
            .bookings
            .get(&booking.id)
            .map(|b| b.value().clone())
            .ok_or(StoreError::NotFound(booking.id))?;

        let new_keys = booking.slot_keys();
        let taken = self.reserve_all(&new_keys, booking.id)?;
        if let Err(e) = self.journal_append(Event::BookingReplaced { booking: booking.clone() }).await {
            for key in &taken {
                self.release(key, booking.id);
            }
            return Err(e);
        }
        for key in old.slot_keys() {
            if !new_keys.contains(&key) {
                self.release(&key, booking.id);
            }
        }
        self.unindex(booking.id);
        self.index(booking);
        Ok(())
    }

    async fn delete_one(&self, id: Ulid) -> Result<Booking, StoreError> {
        let _shared = self.write_gate.read().await;
        // Taking the booking out first means only one concurrent delete journals it.
        let (_, old) = self.bookings.remove(&id).ok_or(StoreError::NotFound(id))?;
        if let Err(e) = self.journal_append(Event::BookingDeleted { id }).await {
            self.bookings.insert(id, old);
            return Err(e);
        }
        self.drop_from_day(old.date, id);
        for key in old.slot_keys() {
            self.release(&key, id);
        }
        Ok(old)
    }
}

// ── Background compaction ────────────────────────────────

/// Compact when at least `threshold` records were appended since the last
/// compaction. Returns whether a compaction ran.
pub async fn compact_if_needed(store: &MemoryStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.journal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    store.compact().await?;
    info!(appends, bookings = store.len(), "journal compacted");
    Ok(true)
}

pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            warn!("journal compaction failed: {e}");
        }
    }
}
