use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

/// Half-open stay `[start, end)`: `start` is check-in, `end` is check-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    /// Build a range without asserting order. Callers validate afterwards.
    pub fn unchecked(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Checkout day equal to the next check-in day is not an overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_date(&self, d: NaiveDate) -> bool {
        self.start <= d && d < self.end
    }

    /// Intersection with `window`, or `None` when they don't overlap.
    pub fn clamp(&self, window: &DateRange) -> Option<DateRange> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then_some(DateRange { start, end })
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomIdentity {
    pub room_id: String,
    pub room_type: String,
}

impl RoomIdentity {
    pub fn new(room_id: impl Into<String>, room_type: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            room_type: room_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    /// Pending and Confirmed reservations occupy their dates.
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "confirmed" => Some(ReservationStatus::Confirmed),
            "cancelled" | "canceled" => Some(ReservationStatus::Cancelled),
            "expired" => Some(ReservationStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    Guest,
    Admin,
    Payment,
    System,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Actor::Guest => "guest",
            Actor::Admin => "admin",
            Actor::Payment => "payment",
            Actor::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "guest" => Some(Actor::Guest),
            "admin" => Some(Actor::Admin),
            "payment" => Some(Actor::Payment),
            "system" => Some(Actor::System),
            _ => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable reservation record, as written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: String,
    pub range: DateRange,
    pub guest: GuestContact,
    pub status: ReservationStatus,
    pub created_at: Ms,
    /// Only meaningful while `Pending`.
    pub hold_expires_at: Ms,
    pub updated_at: Ms,
    pub cancelled_by: Option<Actor>,
    pub idempotency_key: Option<String>,
}

/// A status transition as handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: ReservationStatus,
    pub at: Ms,
    pub actor: Option<Actor>,
}

impl Reservation {
    pub fn apply(&mut self, change: &StatusChange) {
        self.status = change.status;
        self.updated_at = change.at;
        if change.status == ReservationStatus::Cancelled {
            self.cancelled_by = change.actor;
        }
    }
}

/// State of an interval held in the availability index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    Pending { expires_at: Ms },
    Confirmed,
}

impl HoldState {
    pub fn status(&self) -> ReservationStatus {
        match self {
            HoldState::Pending { .. } => ReservationStatus::Pending,
            HoldState::Confirmed => ReservationStatus::Confirmed,
        }
    }
}

/// One occupied range on a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: Ulid,
    pub range: DateRange,
    pub state: HoldState,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: RoomIdentity,
    /// Active intervals, sorted by `range.start`.
    pub entries: Vec<IndexEntry>,
}

impl RoomState {
    pub fn new(room: RoomIdentity) -> Self {
        Self {
            room,
            entries: Vec::new(),
        }
    }

    /// Insert entry maintaining sort order by range.start.
    pub fn insert_entry(&mut self, entry: IndexEntry) {
        let pos = self
            .entries
            .partition_point(|e| e.range.start <= entry.range.start);
        self.entries.insert(pos, entry);
    }

    pub fn remove_entry(&mut self, id: Ulid) -> Option<IndexEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn entry(&self, id: Ulid) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: Ulid) -> Option<&mut IndexEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Entries whose range overlaps `query`.
    /// Uses binary search to skip entries starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &IndexEntry> {
        let right_bound = self.entries.partition_point(|e| e.range.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.range.end > query.start)
    }

    /// First entry colliding with `range`, if any.
    pub fn find_conflict(&self, range: &DateRange) -> Option<Ulid> {
        self.overlapping(range).next().map(|e| e.id)
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomRegistered {
        room: RoomIdentity,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    StatusChanged {
        id: Ulid,
        change: StatusChange,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveReservationInfo {
    pub id: Ulid,
    pub room_id: String,
    pub range: DateRange,
    pub status: ReservationStatus,
    /// `Some` while the reservation is a pending hold.
    pub hold_expires_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedRange {
    pub room_id: String,
    pub range: DateRange,
}
