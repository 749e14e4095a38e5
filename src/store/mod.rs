//! Durable record of rooms and reservations.
//!
//! The engine owns the in-memory availability index; the store owns the
//! reservation documents. The engine writes through this narrow interface and
//! reads it back with [`ReservationStore::load_active_by_room`] when it rebuilds
//! the index on start-up.

mod memory;
mod wal;
mod wal_store;

pub use memory::MemoryStore;
pub use wal::{Replay, Wal};
pub use wal_store::WalStore;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Reservation, RoomIdentity, StatusChange};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(String),
    #[error("store writer shut down")]
    Closed,
    #[error("reservation {0} is not stored")]
    UnknownReservation(Ulid),
    #[error("reservation {0} is already stored")]
    Duplicate(Ulid),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn save_room(&self, room: &RoomIdentity) -> Result<(), StoreError>;

    async fn load_rooms(&self) -> Result<Vec<RoomIdentity>, StoreError>;

    async fn save(&self, reservation: &Reservation) -> Result<(), StoreError>;

    async fn update_status(&self, id: Ulid, change: StatusChange) -> Result<(), StoreError>;

    async fn load(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    /// Pending and Confirmed reservations for one room, in any order.
    async fn load_active_by_room(&self, room_id: &str) -> Result<Vec<Reservation>, StoreError>;
}
