use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::model::{Event, Reservation, RoomIdentity, StatusChange};

use super::wal::Wal;
use super::{ReservationStore, StoreError};

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// All or nothing: on any failure the log is cut back to where the batch
/// started, so no partial frame is left ahead of the next batch.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        warn!(error = %e, events = batch.len(), "reservation log write failed, rolling back batch");
        if let Err(rollback_err) = wal.rollback() {
            error!(error = %rollback_err, "failed to cut reservation log back after a failed write");
        }
    }
    result
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Durable store backed by a group-committed write-ahead log.
///
/// Every record ever written is kept in an in-memory projection, so `load`
/// answers for terminal reservations as well as live ones. The log itself is
/// the source of truth and is replayed into the projection on `open`.
pub struct WalStore {
    path: PathBuf,
    tx: mpsc::Sender<WalCommand>,
    rooms: DashMap<String, RoomIdentity>,
    reservations: DashMap<Ulid, Reservation>,
    /// Appends hold it shared from log write to projection update;
    /// compaction holds it exclusively so its snapshot misses nothing.
    compact_gate: RwLock<()>,
}

impl WalStore {
    /// Replay `path` and start the writer task. Must run inside a tokio runtime.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let replay = Wal::replay(&path)?;
        if replay.truncated {
            warn!(
                path = %path.display(),
                valid_len = replay.valid_len,
                "truncating torn tail of reservation log"
            );
        }
        let wal = Wal::open(&path, replay.valid_len)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));

        let store = Self {
            path,
            tx,
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            compact_gate: RwLock::new(()),
        };
        for event in &replay.events {
            store.apply(event);
        }
        info!(
            path = %store.path.display(),
            events = replay.events.len(),
            rooms = store.rooms.len(),
            reservations = store.reservations.len(),
            "reservation log replayed"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn apply(&self, event: &Event) {
        match event {
            Event::RoomRegistered { room } => {
                self.rooms.insert(room.room_id.clone(), room.clone());
            }
            Event::ReservationCreated { reservation } => {
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::StatusChanged { id, change } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.apply(change);
                }
            }
        }
    }

    async fn send(&self, cmd: WalCommand) -> Result<(), StoreError> {
        self.tx.send(cmd).await.map_err(|_| StoreError::Closed)
    }

    /// Log the event durably, then fold it into the projection.
    async fn append(&self, event: Event) -> Result<(), StoreError> {
        let _gate = self.compact_gate.read().await;
        let (tx, rx) = oneshot::channel();
        self.send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await?;
        rx.await.map_err(|_| StoreError::Closed)??;
        self.apply(&event);
        Ok(())
    }

    /// Rewrite the log as one event per room and per reservation.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.compact_gate.write().await;
        let mut events: Vec<Event> = self
            .rooms
            .iter()
            .map(|e| Event::RoomRegistered {
                room: e.value().clone(),
            })
            .collect();
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        events.extend(
            reservations
                .into_iter()
                .map(|reservation| Event::ReservationCreated { reservation }),
        );
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.send(WalCommand::Compact { events, response: tx }).await?;
        rx.await.map_err(|_| StoreError::Closed)??;
        info!(path = %self.path.display(), events = count, "reservation log compacted");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn save_room(&self, room: &RoomIdentity) -> Result<(), StoreError> {
        self.append(Event::RoomRegistered { room: room.clone() }).await
    }

    async fn load_rooms(&self) -> Result<Vec<RoomIdentity>, StoreError> {
        Ok(self.rooms.iter().map(|e| e.value().clone()).collect())
    }

    async fn save(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if self.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Duplicate(reservation.id));
        }
        self.append(Event::ReservationCreated {
            reservation: reservation.clone(),
        })
        .await
    }

    async fn update_status(&self, id: Ulid, change: StatusChange) -> Result<(), StoreError> {
        if !self.reservations.contains_key(&id) {
            return Err(StoreError::UnknownReservation(id));
        }
        self.append(Event::StatusChanged { id, change }).await
    }

    async fn load(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.get(&id).map(|e| e.value().clone()))
    }

    async fn load_active_by_room(&self, room_id: &str) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .reservations
            .iter()
            .filter(|e| e.room_id == room_id && e.status.is_active())
            .map(|e| e.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_wal_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn reservation(room_id: &str, day: u32) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: room_id.into(),
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
                NaiveDate::from_ymd_opt(2025, 6, day + 2).unwrap(),
            ),
            guest: GuestContact {
                name: "Lin".into(),
                email: "lin@example.com".into(),
                phone: None,
            },
            status: ReservationStatus::Pending,
            created_at: 0,
            hold_expires_at: 900_000,
            updated_at: 0,
            cancelled_by: None,
            idempotency_key: None,
        }
    }

    fn change(status: ReservationStatus) -> StatusChange {
        StatusChange {
            status,
            at: 5,
            actor: None,
        }
    }

    #[tokio::test]
    async fn reopen_restores_projection() {
        let path = test_wal_path("reopen.wal");
        let a = reservation("R1", 1);
        let b = reservation("R1", 10);
        {
            let store = WalStore::open(&path).unwrap();
            store.save_room(&RoomIdentity::new("R1", "Double")).await.unwrap();
            store.save(&a).await.unwrap();
            store.save(&b).await.unwrap();
            store.update_status(a.id, change(ReservationStatus::Confirmed)).await.unwrap();
            store.update_status(b.id, change(ReservationStatus::Cancelled)).await.unwrap();
        }

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.load_rooms().await.unwrap().len(), 1);
        let active = store.load_active_by_room("R1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
        assert_eq!(active[0].status, ReservationStatus::Confirmed);
        let cancelled = store.load(b.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn concurrent_saves_group_commit() {
        let path = test_wal_path("group_commit.wal");
        let store = Arc::new(WalStore::open(&path).unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.save(&reservation(&format!("R{i}"), 1)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.appends_since_compact().await, 20);

        let reopened = WalStore::open(&path).unwrap();
        assert_eq!(reopened.reservations.len(), 20);
    }

    #[tokio::test]
    async fn compact_collapses_status_history() {
        let path = test_wal_path("compact.wal");
        let a = reservation("R1", 1);
        {
            let store = WalStore::open(&path).unwrap();
            store.save_room(&RoomIdentity::new("R1", "Double")).await.unwrap();
            store.save(&a).await.unwrap();
            store.update_status(a.id, change(ReservationStatus::Confirmed)).await.unwrap();
            store.update_status(a.id, change(ReservationStatus::Cancelled)).await.unwrap();
            assert_eq!(store.appends_since_compact().await, 4);

            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await, 0);

            // Appends after compaction land in the new file.
            store.save(&reservation("R1", 20)).await.unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events.len(), 3);

        let store = WalStore::open(&path).unwrap();
        let a_after = store.load(a.id).await.unwrap().unwrap();
        assert_eq!(a_after.status, ReservationStatus::Cancelled);
        assert_eq!(store.load_active_by_room("R1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn writes_after_torn_tail_survive_restart() {
        let path = test_wal_path("torn_reopen.wal");
        {
            let store = WalStore::open(&path).unwrap();
            store.save_room(&RoomIdentity::new("R1", "Double")).await.unwrap();
        }
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xAB; 6]).unwrap();
        }
        let a = reservation("R1", 1);
        {
            let store = WalStore::open(&path).unwrap();
            store.save_room(&RoomIdentity::new("R2", "Suite")).await.unwrap();
            store.save(&a).await.unwrap();
            assert_eq!(store.load_rooms().await.unwrap().len(), 2);
        }

        let store = WalStore::open(&path).unwrap();
        let mut rooms: Vec<String> = store
            .load_rooms()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.room_id)
            .collect();
        rooms.sort();
        assert_eq!(rooms, ["R1", "R2"]);
        assert_eq!(store.load(a.id).await.unwrap().unwrap().status, ReservationStatus::Pending);
        assert!(!Wal::replay(&path).unwrap().truncated);
    }

    #[tokio::test]
    async fn update_unknown_reservation_fails() {
        let path = test_wal_path("unknown.wal");
        let store = WalStore::open(&path).unwrap();
        let id = Ulid::new();
        let result = store.update_status(id, change(ReservationStatus::Confirmed)).await;
        assert_eq!(result, Err(StoreError::UnknownReservation(id)));
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
