use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::model::*;
use crate::wal::Wal;

use super::{Filter, ReservationStore, SlotLease, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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

/// Owns the WAL. Waits for one append, drains whatever else is already
/// queued, and covers the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = std::time::Instant::now();
        let result = commit_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed to control path")));
        }
    }
}

// ── Store ────────────────────────────────────────────────

/// Row set in a `DashMap`, made durable by the WAL when opened from a path.
pub struct LogStore {
    rows: DashMap<BookingRef, Reservation>,
    /// Slot → the one row allowed to hold it.
    claims: DashMap<SlotKey, BookingRef>,
    /// Serializes writers of the same row across the WAL await.
    row_locks: DashMap<BookingRef, Arc<Mutex<()>>>,
    slot_locks: DashMap<SlotKey, Arc<Mutex<()>>>,
    /// Writers share it; compaction takes it exclusively so the snapshot
    /// cannot miss a record appended to the old log.
    compact_gate: RwLock<()>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    wal_path: Option<PathBuf>,
}

impl LogStore {
    /// Non-durable store for tests and embedding.
    pub fn in_memory() -> Self {
        Self {
            rows: DashMap::new(),
            claims: DashMap::new(),
            row_locks: DashMap::new(),
            slot_locks: DashMap::new(),
            compact_gate: RwLock::new(()),
            wal_tx: None,
            wal_path: None,
        }
    }

    /// Replay the WAL at `path` and start its group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Self::in_memory();
        store.wal_tx = Some(wal_tx);
        store.wal_path = Some(path.to_path_buf());
        for event in events {
            let row = match event {
                Event::Created(r) | Event::Updated(r) => r,
            };
            store.rows.insert(row.id.clone(), row);
        }
        for entry in store.rows.iter() {
            if entry.holds_date() {
                for slot in entry.slots() {
                    store.claims.insert(slot, entry.id.clone());
                }
            }
        }
        Ok(store)
    }

    pub fn wal_path(&self) -> Option<&Path> {
        self.wal_path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Current holder of a slot according to the uniqueness index.
    pub fn holder_of(&self, slot: &SlotKey) -> Option<BookingRef> {
        self.claims.get(slot).map(|e| e.value().clone())
    }

    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        let Some(tx) = &self.wal_tx else {
            return Ok(());
        };
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Append { event, response })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn row_lock(&self, id: &BookingRef) -> Arc<Mutex<()>> {
        self.row_locks.entry(id.clone()).or_default().clone()
    }

    /// Claim every slot for `id`, all or nothing.
    fn claim(&self, id: &BookingRef, slots: &[SlotKey]) -> Result<Vec<SlotKey>, StoreError> {
        let mut taken = Vec::new();
        for slot in slots {
            let entry = self.claims.entry(*slot).or_insert_with(|| id.clone());
            if entry.value() != id {
                let holder = entry.value().clone();
                drop(entry);
                self.release(id, &taken);
                return Err(StoreError::SlotTaken { slot: *slot, holder });
            }
            drop(entry);
            taken.push(*slot);
        }
        Ok(taken)
    }

    fn release(&self, id: &BookingRef, slots: &[SlotKey]) {
        for slot in slots {
            self.claims.remove_if(slot, |_, holder| holder == id);
        }
    }

    fn held_slots(r: &Reservation) -> Vec<SlotKey> {
        if r.holds_date() { r.slots() } else { Vec::new() }
    }

    /// Rewrite the WAL as one `Created` record per row.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(tx) = &self.wal_tx else {
            return Ok(());
        };
        let _gate = self.compact_gate.write().await;
        let events: Vec<Event> = self
            .rows
            .iter()
            .map(|e| Event::Created(e.value().clone()))
            .collect();
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Compact { events, response })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(tx) = &self.wal_tx else {
            return 0;
        };
        let (response, rx) = oneshot::channel();
        if tx.send(WalCommand::AppendsSinceCompact { response }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for LogStore {
    async fn get(&self, id: &BookingRef) -> Result<Option<Reservation>, StoreError> {
        Ok(self.rows.get(id).map(|e| e.value().clone()))
    }

    async fn create(&self, mut reservation: Reservation) -> Result<Reservation, StoreError> {
        let _gate = self.compact_gate.read().await;
        let lock = self.row_lock(&reservation.id);
        let _row = lock.lock().await;
        if self.rows.contains_key(&reservation.id) {
            return Err(StoreError::AlreadyExists(reservation.id));
        }
        reservation.version = 1;

        let claimed = self.claim(&reservation.id, &Self::held_slots(&reservation))?;
        if let Err(e) = self.wal_append(Event::Created(reservation.clone())).await {
            self.release(&reservation.id, &claimed);
            return Err(e);
        }
        self.rows.insert(reservation.id.clone(), reservation.clone());
        Ok(reservation)
    }

    async fn update(
        &self,
        mut next: Reservation,
        expected_version: u64,
    ) -> Result<Reservation, StoreError> {
        let _gate = self.compact_gate.read().await;
        let lock = self.row_lock(&next.id);
        let _row = lock.lock().await;

        let current = self
            .rows
            .get(&next.id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(next.id.clone()))?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: next.id,
                expected: expected_version,
                found: current.version,
            });
        }
        next.version = current.version + 1;

        let old_slots = Self::held_slots(&current);
        let new_slots = Self::held_slots(&next);
        let fresh: Vec<SlotKey> = new_slots
            .iter()
            .filter(|s| !old_slots.contains(s))
            .copied()
            .collect();
        let claimed = self.claim(&next.id, &fresh)?;

        if let Err(e) = self.wal_append(Event::Updated(next.clone())).await {
            self.release(&next.id, &claimed);
            return Err(e);
        }
        self.rows.insert(next.id.clone(), next.clone());

        let keep: HashSet<&SlotKey> = new_slots.iter().collect();
        let dropped: Vec<SlotKey> = old_slots.into_iter().filter(|s| !keep.contains(s)).collect();
        self.release(&next.id, &dropped);
        Ok(next)
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Reservation>, StoreError> {
        let mut rows: Vec<Reservation> = self
            .rows
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn lease(&self, mut slots: Vec<SlotKey>) -> Result<SlotLease, StoreError> {
        // Sorted acquisition keeps overlapping leases deadlock-free.
        slots.sort();
        slots.dedup();
        let mut guards = Vec::with_capacity(slots.len());
        for slot in &slots {
            let lock = self.slot_locks.entry(*slot).or_default().clone();
            guards.push(lock.lock_owned().await);
        }
        Ok(SlotLease::new(slots, guards))
    }
}
