use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::ReservationStatus;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRange {
    #[error("check-in {start} is not before check-out {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("check-in {start} is in the past (earliest allowed is {earliest})")]
    InPast { start: NaiveDate, earliest: NaiveDate },
    #[error("stay of {nights} nights exceeds the {max} night limit")]
    TooLong { nights: i64, max: i64 },
    #[error("dates outside the supported calendar")]
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("unknown room: {0}")]
    UnknownRoom(String),
    #[error("conflict with reservation {0}")]
    Conflict(Ulid),
    #[error("reservation not held: {0}")]
    NotFound(Ulid),
    #[error("room {room_id} is already registered as {existing}, not {requested}")]
    RoomTypeMismatch {
        room_id: String,
        existing: String,
        requested: String,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid range: {0}")]
    InvalidRange(#[from] InvalidRange),
    #[error("invalid guest contact: {0}")]
    InvalidGuest(&'static str),
    #[error("unknown room: {0}")]
    UnknownRoom(String),
    #[error("room unavailable: dates held by reservation {conflicting_reservation_id}")]
    RoomUnavailable { conflicting_reservation_id: Ulid },
    #[error("idempotency key already used by reservation {0} for different dates or room")]
    IdempotencyKeyReused(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<IndexError> for RequestError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Conflict(id) => RequestError::RoomUnavailable {
                conflicting_reservation_id: id,
            },
            IndexError::UnknownRoom(room) => RequestError::UnknownRoom(room),
            IndexError::LimitExceeded(msg) => RequestError::LimitExceeded(msg),
            IndexError::NotFound(_) | IndexError::RoomTypeMismatch { .. } => {
                RequestError::LimitExceeded("index rejected reservation")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("reservation not found: {0}")]
    NotFound(Ulid),
    #[error("reservation {0} is already confirmed")]
    AlreadyConfirmed(Ulid),
    #[error("reservation {id} is already {status}")]
    AlreadyTerminal { id: Ulid, status: ReservationStatus },
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("reservation not found: {0}")]
    NotFound(Ulid),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid range: {0}")]
    InvalidRange(#[from] InvalidRange),
    #[error("unknown room: {0}")]
    UnknownRoom(String),
    #[error("unknown room type: {0}")]
    UnknownRoomType(String),
    #[error("reservation not found: {0}")]
    NotFound(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room {room_id} is already registered as {existing}, not {requested}")]
    TypeMismatch {
        room_id: String,
        existing: String,
        requested: String,
    },
    #[error("invalid room: {0}")]
    InvalidRoom(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}
