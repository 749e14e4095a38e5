mod admission;
pub mod availability;
mod clock;
mod error;
mod index;
pub mod interval;
mod queries;

pub use admission::ReservationRequest;
pub use availability::{merge_overlapping, saturated_ranges, subtract_ranges};
pub use clock::{Clock, ManualClock, SystemClock, date_of, date_to_ms};
pub use error::{
    CancelError, ConfirmError, IndexError, InvalidRange, QueryError, RequestError, RoomError,
};
pub use index::{AvailabilityIndex, RoomGuard, SharedRoomState};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;
use crate::store::{ReservationStore, StoreError};

/// Default hold before an unpaid reservation expires.
pub const DEFAULT_HOLD_DURATION_MS: Ms = 15 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    pub hold_duration_ms: Ms,
    /// Days before today a check-in may still fall on.
    pub checkin_grace_days: u32,
    pub max_stay_nights: i64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            hold_duration_ms: DEFAULT_HOLD_DURATION_MS,
            checkin_grace_days: 0,
            max_stay_nights: MAX_STAY_NIGHTS,
        }
    }
}

/// What a rebuild found in the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildStats {
    pub rooms: usize,
    pub pending: usize,
    pub confirmed: usize,
}

pub struct Engine {
    index: Arc<AvailabilityIndex>,
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    settings: AdmissionSettings,
    /// Idempotency key → reservation, and back.
    idempotency: DashMap<String, Ulid>,
    key_of: DashMap<Ulid, String>,
    /// Keys with an admission in flight. Same-key requests queue here.
    key_claims: DashMap<String, Arc<Mutex<()>>>,
    /// Serializes room registration so the store and index agree on a room's type.
    registration: Mutex<()>,
}

impl Engine {
    /// Wrap an index without touching the store.
    pub fn new(
        index: Arc<AvailabilityIndex>,
        store: Arc<dyn ReservationStore>,
        settings: AdmissionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            store,
            clock,
            settings,
            idempotency: DashMap::new(),
            key_of: DashMap::new(),
            key_claims: DashMap::new(),
            registration: Mutex::new(()),
        }
    }

    /// Build a fresh index from everything the store holds.
    pub async fn open(
        store: Arc<dyn ReservationStore>,
        settings: AdmissionSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let engine = Self::new(Arc::new(AvailabilityIndex::new()), store, settings, clock);
        let stats = engine.rebuild().await?;
        info!(
            rooms = stats.rooms,
            pending = stats.pending,
            confirmed = stats.confirmed,
            "availability index rebuilt"
        );
        Ok(engine)
    }

    /// Load rooms and active reservations into the index. Nothing is expired
    /// here; the reaper does that on its first tick.
    pub async fn rebuild(&self) -> Result<RebuildStats, StoreError> {
        let mut stats = RebuildStats::default();
        for room in self.store.load_rooms().await? {
            let room_id = room.room_id.clone();
            if let Err(e) = self.index.register_room(room) {
                warn!(%room_id, error = %e, "skipping room during rebuild");
                continue;
            }
            stats.rooms += 1;

            for reservation in self.store.load_active_by_room(&room_id).await? {
                let state = match reservation.status {
                    ReservationStatus::Pending => {
                        stats.pending += 1;
                        HoldState::Pending {
                            expires_at: reservation.hold_expires_at,
                        }
                    }
                    ReservationStatus::Confirmed => {
                        stats.confirmed += 1;
                        HoldState::Confirmed
                    }
                    ReservationStatus::Cancelled | ReservationStatus::Expired => continue,
                };
                let entry = IndexEntry {
                    id: reservation.id,
                    range: reservation.range,
                    state,
                };
                if let Err(e) = self.index.restore(&room_id, entry).await {
                    error!(%room_id, reservation = %reservation.id, error = %e, "failed to restore reservation");
                    continue;
                }
                if let Some(key) = reservation.idempotency_key {
                    self.bind_key(key, reservation.id);
                }
            }
        }
        Ok(stats)
    }

    pub fn index(&self) -> &Arc<AvailabilityIndex> {
        &self.index
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &AdmissionSettings {
        &self.settings
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    // ── Idempotency keys ─────────────────────────────────────

    fn bind_key(&self, key: String, id: Ulid) {
        if let Some(old) = self.idempotency.insert(key.clone(), id) {
            self.key_of.remove(&old);
        }
        self.key_of.insert(id, key);
    }

    /// Drop the key of a reservation that left the index.
    fn forget_key(&self, id: Ulid) {
        if let Some((_, key)) = self.key_of.remove(&id) {
            self.idempotency.remove_if(&key, |_, bound| *bound == id);
        }
    }

    fn bound_reservation(&self, key: &str) -> Option<Ulid> {
        self.idempotency.get(key).map(|e| *e.value())
    }

    /// Wait for exclusive use of `key` for one admission. The claim is held
    /// from the idempotency lookup through the key bind.
    async fn claim_key(&self, key: &str) -> KeyClaim<'_> {
        let lock = self.key_claims.entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyClaim {
            claims: &self.key_claims,
            key: key.to_string(),
            guard: Some(guard),
        }
    }
}

/// Exclusive use of an idempotency key. Dropping it lets the next
/// same-key request in and forgets the lock once nobody waits on it.
struct KeyClaim<'a> {
    claims: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyClaim<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.claims
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
