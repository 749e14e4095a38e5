use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::error;
use ulid::Ulid;

use crate::limits::MAX_ACTIVE_PER_ROOM;
use crate::model::*;

use super::availability::merge_overlapping;
use super::error::IndexError;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Per-room sorted interval sets, each behind its own lock.
///
/// Shard guards are never held across an `.await`: the room's `Arc` is
/// cloned out of the map first, then locked.
pub struct AvailabilityIndex {
    rooms: DashMap<String, SharedRoomState>,
    room_types: DashMap<String, String>,
    by_type: DashMap<String, Vec<String>>,
    reservation_to_room: DashMap<Ulid, String>,
}

impl Default for AvailabilityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityIndex {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            room_types: DashMap::new(),
            by_type: DashMap::new(),
            reservation_to_room: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room(&self, room_id: &str) -> Option<SharedRoomState> {
        self.rooms.get(room_id).map(|e| e.value().clone())
    }

    pub fn room_type_of(&self, room_id: &str) -> Option<String> {
        self.room_types.get(room_id).map(|e| e.value().clone())
    }

    /// Room ids of one type, sorted.
    pub fn rooms_of_type(&self, room_type: &str) -> Vec<String> {
        let mut ids = self
            .by_type
            .get(room_type)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// All registered rooms, sorted by id.
    pub fn rooms(&self) -> Vec<RoomIdentity> {
        let mut rooms: Vec<RoomIdentity> = self
            .room_types
            .iter()
            .map(|e| RoomIdentity::new(e.key().clone(), e.value().clone()))
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    /// Returns `true` if the room was new, `false` if it was already known
    /// with the same type.
    pub fn register_room(&self, room: RoomIdentity) -> Result<bool, IndexError> {
        match self.room_types.entry(room.room_id.clone()) {
            Entry::Occupied(existing) => {
                if existing.get() == &room.room_type {
                    Ok(false)
                } else {
                    Err(IndexError::RoomTypeMismatch {
                        room_id: room.room_id,
                        existing: existing.get().clone(),
                        requested: room.room_type,
                    })
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(room.room_type.clone());
                self.by_type
                    .entry(room.room_type.clone())
                    .or_default()
                    .push(room.room_id.clone());
                self.rooms.insert(
                    room.room_id.clone(),
                    Arc::new(RwLock::new(RoomState::new(room))),
                );
                Ok(true)
            }
        }
    }

    pub fn room_of(&self, id: &Ulid) -> Option<String> {
        self.reservation_to_room.get(id).map(|e| e.value().clone())
    }

    // ── Locking ──────────────────────────────────────────────

    pub async fn lock_room(&self, room_id: &str) -> Result<RoomGuard<'_>, IndexError> {
        let rs = self
            .room(room_id)
            .ok_or_else(|| IndexError::UnknownRoom(room_id.to_string()))?;
        Ok(RoomGuard {
            index: self,
            state: rs.write_owned().await,
        })
    }

    /// Lock the room currently holding `id`. `None` when the reservation is
    /// not in the index. The entry may still vanish between the lookup and
    /// the lock, so callers re-check with [`RoomGuard::entry`].
    pub async fn lock_reservation(&self, id: &Ulid) -> Option<RoomGuard<'_>> {
        let room_id = self.room_of(id)?;
        self.lock_room(&room_id).await.ok()
    }

    // ── Check-and-insert ─────────────────────────────────────

    pub async fn is_free(&self, room_id: &str, range: &DateRange) -> Result<bool, IndexError> {
        let rs = self
            .room(room_id)
            .ok_or_else(|| IndexError::UnknownRoom(room_id.to_string()))?;
        let guard = rs.read().await;
        Ok(guard.find_conflict(range).is_none())
    }

    /// Conflict check and Pending insert in one critical section.
    pub async fn reserve(
        &self,
        room_id: &str,
        range: DateRange,
        id: Ulid,
        expires_at: Ms,
    ) -> Result<(), IndexError> {
        let mut guard = self.lock_room(room_id).await?;
        guard.insert_pending(range, id, expires_at)
    }

    pub async fn promote(&self, id: Ulid) -> Result<(), IndexError> {
        let mut guard = self
            .lock_reservation(&id)
            .await
            .ok_or(IndexError::NotFound(id))?;
        guard.promote(id)
    }

    pub async fn release(&self, id: Ulid) -> Result<IndexEntry, IndexError> {
        let mut guard = self
            .lock_reservation(&id)
            .await
            .ok_or(IndexError::NotFound(id))?;
        guard.release(id).ok_or(IndexError::NotFound(id))
    }

    /// Insert a durable reservation during rebuild. Overlaps are logged and
    /// kept.
    pub async fn restore(&self, room_id: &str, entry: IndexEntry) -> Result<(), IndexError> {
        let mut guard = self.lock_room(room_id).await?;
        if let Some(other) = guard.state.find_conflict(&entry.range) {
            error!(
                room_id,
                reservation = %entry.id,
                conflicting = %other,
                range = %entry.range,
                "overlapping reservations found in store"
            );
        }
        self.reservation_to_room.insert(entry.id, room_id.to_string());
        guard.state.insert_entry(entry);
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────

    /// Room and entry for a live reservation.
    pub async fn entry(&self, id: &Ulid) -> Option<(String, IndexEntry)> {
        let room_id = self.room_of(id)?;
        let rs = self.room(&room_id)?;
        let guard = rs.read().await;
        guard.entry(*id).cloned().map(|e| (room_id, e))
    }

    pub async fn active_entries(&self, room_id: &str) -> Result<Vec<IndexEntry>, IndexError> {
        let rs = self
            .room(room_id)
            .ok_or_else(|| IndexError::UnknownRoom(room_id.to_string()))?;
        let guard = rs.read().await;
        Ok(guard.entries.clone())
    }

    /// Every active range of every room of `room_type`, clamped to `window`,
    /// unmerged, ordered by start then room.
    pub async fn blocked_dates(&self, room_type: &str, window: &DateRange) -> Vec<BlockedRange> {
        let mut blocked = Vec::new();
        for room_id in self.rooms_of_type(room_type) {
            let Some(rs) = self.room(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            blocked.extend(guard.overlapping(window).filter_map(|e| {
                e.range.clamp(window).map(|range| BlockedRange {
                    room_id: room_id.clone(),
                    range,
                })
            }));
        }
        blocked.sort_by(|a, b| {
            a.range
                .start
                .cmp(&b.range.start)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        blocked
    }

    /// Union of [`blocked_dates`](Self::blocked_dates) at room-type granularity.
    pub async fn blocked_dates_merged(&self, room_type: &str, window: &DateRange) -> Vec<DateRange> {
        let ranges: Vec<DateRange> = self
            .blocked_dates(room_type, window)
            .await
            .into_iter()
            .map(|b| b.range)
            .collect();
        merge_overlapping(&ranges)
    }

    /// Snapshot of Pending holds with `expires_at <= now`. Callers must
    /// re-check each one under the room lock.
    pub async fn expired_pending(&self, now: Ms) -> Vec<(Ulid, String)> {
        let rooms: Vec<(String, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut expired = Vec::new();
        for (room_id, rs) in rooms {
            let guard = rs.read().await;
            for entry in &guard.entries {
                if let HoldState::Pending { expires_at } = entry.state
                    && expires_at <= now
                {
                    expired.push((entry.id, room_id.clone()));
                }
            }
        }
        expired
    }
}

/// Exclusive access to one room's intervals.
pub struct RoomGuard<'a> {
    index: &'a AvailabilityIndex,
    state: OwnedRwLockWriteGuard<RoomState>,
}

impl RoomGuard<'_> {
    pub fn room(&self) -> &RoomIdentity {
        &self.state.room
    }

    pub fn entry(&self, id: Ulid) -> Option<&IndexEntry> {
        self.state.entry(id)
    }

    pub fn find_conflict(&self, range: &DateRange) -> Option<Ulid> {
        self.state.find_conflict(range)
    }

    pub fn insert_pending(
        &mut self,
        range: DateRange,
        id: Ulid,
        expires_at: Ms,
    ) -> Result<(), IndexError> {
        if let Some(other) = self.state.find_conflict(&range) {
            return Err(IndexError::Conflict(other));
        }
        if self.state.entries.len() >= MAX_ACTIVE_PER_ROOM {
            return Err(IndexError::LimitExceeded("too many active reservations on room"));
        }
        self.index
            .reservation_to_room
            .insert(id, self.state.room.room_id.clone());
        self.state.insert_entry(IndexEntry {
            id,
            range,
            state: HoldState::Pending { expires_at },
        });
        Ok(())
    }

    pub fn promote(&mut self, id: Ulid) -> Result<(), IndexError> {
        let entry = self.state.entry_mut(id).ok_or(IndexError::NotFound(id))?;
        entry.state = HoldState::Confirmed;
        Ok(())
    }

    pub fn release(&mut self, id: Ulid) -> Option<IndexEntry> {
        let entry = self.state.remove_entry(id)?;
        self.index.reservation_to_room.remove(&id);
        Some(entry)
    }
}
