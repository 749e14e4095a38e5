use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{saturated_ranges, subtract_ranges};
use super::error::{IndexError, QueryError};
use super::interval::{query_window, validate_shape};
use super::Engine;

impl From<IndexError> for QueryError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::UnknownRoom(room) => QueryError::UnknownRoom(room),
            IndexError::NotFound(id) | IndexError::Conflict(id) => QueryError::NotFound(id),
            IndexError::RoomTypeMismatch { room_id, .. } => QueryError::UnknownRoom(room_id),
            IndexError::LimitExceeded(msg) => QueryError::LimitExceeded(msg),
        }
    }
}

impl Engine {
    fn known_type(&self, room_type: &str) -> Result<Vec<String>, QueryError> {
        let rooms = self.index.rooms_of_type(room_type);
        if rooms.is_empty() {
            return Err(QueryError::UnknownRoomType(room_type.to_string()));
        }
        Ok(rooms)
    }

    /// Is `range` free on `room_id` right now?
    pub async fn room_availability(&self, room_id: &str, range: DateRange) -> Result<bool, QueryError> {
        validate_shape(&range)?;
        Ok(self.index.is_free(room_id, &range).await?)
    }

    /// Merged blackout ranges for a room type: a date is blocked if any room
    /// of the type is held on it.
    pub async fn room_type_calendar(
        &self,
        room_type: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DateRange>, QueryError> {
        let window = query_window(from, to)?;
        self.known_type(room_type)?;
        Ok(self.index.blocked_dates_merged(room_type, &window).await)
    }

    /// Per-room blocked ranges for a room type, unmerged.
    pub async fn room_blocked_dates(
        &self,
        room_type: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BlockedRange>, QueryError> {
        let window = query_window(from, to)?;
        self.known_type(room_type)?;
        Ok(self.index.blocked_dates(room_type, &window).await)
    }

    /// Ranges on which every room of the type is taken.
    pub async fn room_type_sold_out(
        &self,
        room_type: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DateRange>, QueryError> {
        let window = query_window(from, to)?;
        let rooms = self.known_type(room_type)?;
        let held: Vec<DateRange> = self
            .index
            .blocked_dates(room_type, &window)
            .await
            .into_iter()
            .map(|b| b.range)
            .collect();
        Ok(saturated_ranges(&held, rooms.len()))
    }

    /// Free ranges on one room inside `[from, to)`.
    pub async fn room_free_ranges(
        &self,
        room_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DateRange>, QueryError> {
        let window = query_window(from, to)?;
        let held: Vec<DateRange> = self
            .index
            .active_entries(room_id)
            .await?
            .into_iter()
            .filter_map(|e| e.range.clamp(&window))
            .collect();
        Ok(subtract_ranges(&[window], &held))
    }

    /// Live reservations come from the index, settled ones from the store.
    pub async fn reservation_status(&self, id: Ulid) -> Result<ReservationStatus, QueryError> {
        if let Some((_, entry)) = self.index.entry(&id).await {
            return Ok(entry.state.status());
        }
        match self.store.load(id).await? {
            Some(r) => Ok(r.status),
            None => Err(QueryError::NotFound(id)),
        }
    }

    pub async fn reservation(&self, id: Ulid) -> Result<Reservation, QueryError> {
        self.store.load(id).await?.ok_or(QueryError::NotFound(id))
    }

    /// Pending and confirmed reservations on a room, ordered by check-in.
    pub async fn active_reservations(
        &self,
        room_id: &str,
    ) -> Result<Vec<ActiveReservationInfo>, QueryError> {
        let entries = self.index.active_entries(room_id).await?;
        Ok(entries
            .into_iter()
            .map(|e| ActiveReservationInfo {
                id: e.id,
                room_id: room_id.to_string(),
                range: e.range,
                status: e.state.status(),
                hold_expires_at: match e.state {
                    HoldState::Pending { expires_at } => Some(expires_at),
                    HoldState::Confirmed => None,
                },
            })
            .collect())
    }

    pub fn list_rooms(&self, room_type: Option<&str>) -> Vec<RoomIdentity> {
        let mut rooms = self.index.rooms();
        if let Some(ty) = room_type {
            rooms.retain(|r| r.room_type == ty);
        }
        rooms
    }
}
