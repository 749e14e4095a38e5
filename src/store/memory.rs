use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::{Reservation, RoomIdentity, StatusChange};

use super::{ReservationStore, StoreError};

/// Non-durable store. Backs tests and `INNKEEP_DATA_DIR=:memory:` runs.
#[derive(Default)]
pub struct MemoryStore {
    rooms: DashMap<String, RoomIdentity>,
    reservations: DashMap<Ulid, Reservation>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn save_room(&self, room: &RoomIdentity) -> Result<(), StoreError> {
        self.rooms.insert(room.room_id.clone(), room.clone());
        Ok(())
    }

    async fn load_rooms(&self) -> Result<Vec<RoomIdentity>, StoreError> {
        Ok(self.rooms.iter().map(|e| e.value().clone()).collect())
    }

    async fn save(&self, reservation: &Reservation) -> Result<(), StoreError> {
        match self.reservations.entry(reservation.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(reservation.id)),
            Entry::Vacant(v) => {
                v.insert(reservation.clone());
                Ok(())
            }
        }
    }

    async fn update_status(&self, id: Ulid, change: StatusChange) -> Result<(), StoreError> {
        let mut entry = self
            .reservations
            .get_mut(&id)
            .ok_or(StoreError::UnknownReservation(id))?;
        entry.apply(&change);
        Ok(())
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
