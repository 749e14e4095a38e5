use std::time::Instant;

use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    ADMISSION_DURATION_SECONDS, RESERVATION_CONFLICTS_TOTAL, RESERVATION_REQUESTS_TOTAL,
    RESERVATION_ROLLBACKS_TOTAL, RESERVATIONS_ADMITTED_TOTAL, RESERVATIONS_CANCELLED_TOTAL,
    RESERVATIONS_CONFIRMED_TOTAL, RESERVATIONS_EXPIRED_TOTAL, ROOMS_REGISTERED,
};
use crate::store::StoreError;

use super::clock::date_of;
use super::error::{CancelError, ConfirmError, IndexError, RequestError, RoomError};
use super::index::RoomGuard;
use super::interval::validate_range;
use super::Engine;

/// Stale holds a single request may expire before giving up on the room.
const LAZY_EXPIRY_ATTEMPTS: usize = 8;

/// A guest's ask for one room over one stay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub room_id: String,
    pub range: DateRange,
    pub guest: GuestContact,
    /// Resubmitting with the same key returns the original reservation.
    pub idempotency_key: Option<String>,
}

impl ReservationRequest {
    pub fn new(room_id: impl Into<String>, range: DateRange, guest: GuestContact) -> Self {
        Self {
            room_id: room_id.into(),
            range,
            guest,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

fn validate_guest(guest: &GuestContact) -> Result<(), RequestError> {
    if guest.name.trim().is_empty() {
        return Err(RequestError::InvalidGuest("guest name is required"));
    }
    if guest.name.len() > MAX_GUEST_NAME_LEN {
        return Err(RequestError::InvalidGuest("guest name too long"));
    }
    let email = guest.email.trim();
    if email.is_empty() {
        return Err(RequestError::InvalidGuest("guest email is required"));
    }
    if !email.contains('@') {
        return Err(RequestError::InvalidGuest("guest email must contain '@'"));
    }
    if email.len() > MAX_GUEST_EMAIL_LEN {
        return Err(RequestError::InvalidGuest("guest email too long"));
    }
    if guest
        .phone
        .as_ref()
        .is_some_and(|p| p.len() > MAX_GUEST_PHONE_LEN)
    {
        return Err(RequestError::InvalidGuest("guest phone too long"));
    }
    Ok(())
}

fn validate_room(room: &RoomIdentity) -> Result<(), RoomError> {
    if room.room_id.is_empty() {
        return Err(RoomError::InvalidRoom("room id is required"));
    }
    if room.room_type.is_empty() {
        return Err(RoomError::InvalidRoom("room type is required"));
    }
    if room.room_id.len() > MAX_ROOM_ID_LEN {
        return Err(RoomError::LimitExceeded("room id too long"));
    }
    if room.room_type.len() > MAX_ROOM_TYPE_LEN {
        return Err(RoomError::LimitExceeded("room type too long"));
    }
    Ok(())
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    /// Persist, then index. Returns `false` if the room was already known
    /// with the same type.
    pub async fn register_room(&self, room: RoomIdentity) -> Result<bool, RoomError> {
        let added = self.register_rooms(vec![room]).await?;
        Ok(added == 1)
    }

    /// Register a batch of rooms. Every row is checked against the index and
    /// the rest of the batch before any is written, so a bad row rejects the
    /// whole batch. Returns how many rooms were new.
    pub async fn register_rooms(&self, rooms: Vec<RoomIdentity>) -> Result<usize, RoomError> {
        for room in &rooms {
            validate_room(room)?;
        }
        let _serial = self.registration.lock().await;

        let mut fresh: Vec<RoomIdentity> = Vec::new();
        for room in rooms {
            let known = self
                .index
                .room_type_of(&room.room_id)
                .or_else(|| {
                    fresh
                        .iter()
                        .find(|f| f.room_id == room.room_id)
                        .map(|f| f.room_type.clone())
                });
            match known {
                Some(existing) if existing == room.room_type => {}
                Some(existing) => {
                    return Err(RoomError::TypeMismatch {
                        room_id: room.room_id,
                        existing,
                        requested: room.room_type,
                    });
                }
                None => fresh.push(room),
            }
        }
        if self.index.room_count() + fresh.len() > MAX_ROOMS {
            return Err(RoomError::LimitExceeded("too many rooms"));
        }

        let added = fresh.len();
        for room in fresh {
            self.store.save_room(&room).await?;
            let (room_id, room_type) = (room.room_id.clone(), room.room_type.clone());
            self.index.register_room(room).map_err(|e| match e {
                IndexError::RoomTypeMismatch {
                    room_id,
                    existing,
                    requested,
                } => RoomError::TypeMismatch {
                    room_id,
                    existing,
                    requested,
                },
                _ => RoomError::LimitExceeded("index rejected room"),
            })?;
            info!(%room_id, %room_type, "room registered");
        }
        metrics::gauge!(ROOMS_REGISTERED).set(self.index.room_count() as f64);
        Ok(added)
    }

    // ── Admission ────────────────────────────────────────────

    /// Admit a stay as a Pending hold.
    pub async fn request_reservation(&self, request: ReservationRequest) -> Result<Ulid, RequestError> {
        metrics::counter!(RESERVATION_REQUESTS_TOTAL).increment(1);
        let started = Instant::now();
        let result = self.admit(request).await;
        metrics::histogram!(ADMISSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn admit(&self, request: ReservationRequest) -> Result<Ulid, RequestError> {
        let now = self.now();
        validate_range(
            &request.range,
            date_of(now),
            self.settings.checkin_grace_days,
            self.settings.max_stay_nights,
        )?;
        validate_guest(&request.guest)?;

        // Held until the key is bound or the admission fails, so a concurrent
        // request with the same key sees the outcome of this one.
        let _claim = match &request.idempotency_key {
            Some(key) => {
                if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                    return Err(RequestError::LimitExceeded("idempotency key too long"));
                }
                let claim = self.claim_key(key).await;
                if let Some(existing) = self.replay_idempotent(key, &request).await? {
                    debug!(reservation = %existing, %key, "idempotent resubmission");
                    return Ok(existing);
                }
                Some(claim)
            }
            None => None,
        };

        let id = Ulid::new();
        let expires_at = now.saturating_add(self.settings.hold_duration_ms);
        self.reserve_or_expire(&request, id, expires_at, now).await?;

        let reservation = Reservation {
            id,
            room_id: request.room_id,
            range: request.range,
            guest: request.guest,
            status: ReservationStatus::Pending,
            created_at: now,
            hold_expires_at: expires_at,
            updated_at: now,
            cancelled_by: None,
            idempotency_key: request.idempotency_key,
        };

        if let Err(e) = self.store.save(&reservation).await {
            match self.index.release(id).await {
                Ok(_) => warn!(
                    reservation = %id,
                    room_id = %reservation.room_id,
                    error = %e,
                    "store rejected reservation, hold rolled back"
                ),
                Err(release_err) => error!(
                    reservation = %id,
                    error = %e,
                    release_error = %release_err,
                    "store rejected reservation and rollback failed"
                ),
            }
            metrics::counter!(RESERVATION_ROLLBACKS_TOTAL).increment(1);
            return Err(RequestError::Storage(e));
        }

        if let Some(key) = reservation.idempotency_key {
            self.bind_key(key, id);
        }
        metrics::counter!(RESERVATIONS_ADMITTED_TOTAL).increment(1);
        info!(
            reservation = %id,
            room_id = %reservation.room_id,
            range = %reservation.range,
            expires_at,
            "reservation held"
        );
        Ok(id)
    }

    /// `Some(id)` when the key is bound to a live reservation for the same
    /// room and range. A key bound to a dead reservation is free to rebind.
    async fn replay_idempotent(
        &self,
        key: &str,
        request: &ReservationRequest,
    ) -> Result<Option<Ulid>, RequestError> {
        let Some(existing) = self.bound_reservation(key) else {
            return Ok(None);
        };
        match self.index.entry(&existing).await {
            Some((room_id, entry)) if room_id == request.room_id && entry.range == request.range => {
                Ok(Some(existing))
            }
            Some(_) => Err(RequestError::IdempotencyKeyReused(existing)),
            None => Ok(None),
        }
    }

    /// Atomic reserve. A conflicting hold that is past its deadline but not
    /// yet reaped is expired on the spot and the reserve retried.
    async fn reserve_or_expire(
        &self,
        request: &ReservationRequest,
        id: Ulid,
        expires_at: Ms,
        now: Ms,
    ) -> Result<(), RequestError> {
        let mut attempts = 0;
        loop {
            match self
                .index
                .reserve(&request.room_id, request.range, id, expires_at)
                .await
            {
                Ok(()) => return Ok(()),
                Err(IndexError::Conflict(other)) => {
                    attempts += 1;
                    if attempts <= LAZY_EXPIRY_ATTEMPTS && self.expire_if_stale(other, now).await {
                        continue;
                    }
                    metrics::counter!(RESERVATION_CONFLICTS_TOTAL).increment(1);
                    info!(
                        room_id = %request.room_id,
                        range = %request.range,
                        conflicting = %other,
                        "dates unavailable"
                    );
                    return Err(RequestError::RoomUnavailable {
                        conflicting_reservation_id: other,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ── Transitions ──────────────────────────────────────────

    /// Pending → Confirmed. Strict: anything else is an error.
    pub async fn confirm_reservation(&self, id: Ulid) -> Result<(), ConfirmError> {
        let now = self.now();
        let Some(mut room) = self.index.lock_reservation(&id).await else {
            return Err(self.settled_confirm_error(id).await);
        };
        let Some(state) = room.entry(id).map(|e| e.state) else {
            drop(room);
            return Err(self.settled_confirm_error(id).await);
        };

        match state {
            HoldState::Confirmed => {
                debug!(reservation = %id, "confirm on confirmed reservation");
                Err(ConfirmError::AlreadyConfirmed(id))
            }
            HoldState::Pending { expires_at } if expires_at <= now => {
                self.expire_locked(&mut room, id, now).await?;
                drop(room);
                self.forget_key(id);
                warn!(reservation = %id, expires_at, now, "confirm arrived after hold expired");
                Err(ConfirmError::AlreadyTerminal {
                    id,
                    status: ReservationStatus::Expired,
                })
            }
            HoldState::Pending { .. } => {
                self.store
                    .update_status(
                        id,
                        StatusChange {
                            status: ReservationStatus::Confirmed,
                            at: now,
                            actor: None,
                        },
                    )
                    .await?;
                room.promote(id).map_err(|_| ConfirmError::NotFound(id))?;
                metrics::counter!(RESERVATIONS_CONFIRMED_TOTAL).increment(1);
                info!(reservation = %id, room_id = %room.room().room_id, "reservation confirmed");
                Ok(())
            }
        }
    }

    /// Error for a confirm whose reservation is not in the index.
    async fn settled_confirm_error(&self, id: Ulid) -> ConfirmError {
        match self.store.load(id).await {
            Ok(Some(r)) if r.status.is_active() => {
                warn!(reservation = %id, status = %r.status, "store has an active reservation the index lacks");
                ConfirmError::NotFound(id)
            }
            Ok(Some(r)) => {
                debug!(reservation = %id, status = %r.status, "confirm on settled reservation");
                ConfirmError::AlreadyTerminal {
                    id,
                    status: r.status,
                }
            }
            Ok(None) => ConfirmError::NotFound(id),
            Err(e) => ConfirmError::Storage(e),
        }
    }

    /// Pending/Confirmed → Cancelled. Lenient: cancelling a settled
    /// reservation succeeds without change.
    pub async fn cancel_reservation(&self, id: Ulid, actor: Actor) -> Result<(), CancelError> {
        let now = self.now();
        let cancelled = StatusChange {
            status: ReservationStatus::Cancelled,
            at: now,
            actor: Some(actor),
        };

        if let Some(mut room) = self.index.lock_reservation(&id).await
            && let Some(prior) = room.entry(id).map(|e| e.state.status())
        {
            self.store.update_status(id, cancelled).await?;
            room.release(id);
            let room_id = room.room().room_id.clone();
            drop(room);
            self.forget_key(id);
            metrics::counter!(RESERVATIONS_CANCELLED_TOTAL, "actor" => actor.as_str()).increment(1);
            info!(reservation = %id, %room_id, %actor, from = %prior, "reservation cancelled");
            return Ok(());
        }

        match self.store.load(id).await? {
            None => Err(CancelError::NotFound(id)),
            Some(r) if r.status.is_active() => {
                warn!(reservation = %id, status = %r.status, "cancelling reservation the index lacks");
                self.store.update_status(id, cancelled).await?;
                Ok(())
            }
            Some(r) => {
                debug!(reservation = %id, status = %r.status, "cancel on settled reservation");
                Ok(())
            }
        }
    }

    /// Expire every Pending hold whose deadline is at or before `now`.
    /// Returns how many were expired. Failures are logged and left for the
    /// next run.
    pub async fn expire_stale_holds(&self, now: Ms) -> usize {
        let candidates = self.index.expired_pending(now).await;
        let mut expired = 0;
        for (id, room_id) in candidates {
            let Some(mut room) = self.index.lock_reservation(&id).await else {
                continue;
            };
            match self.expire_locked(&mut room, id, now).await {
                Ok(true) => {
                    drop(room);
                    self.forget_key(id);
                    expired += 1;
                }
                Ok(false) => debug!(reservation = %id, %room_id, "hold settled before expiry"),
                Err(e) => warn!(reservation = %id, %room_id, error = %e, "failed to persist expiry"),
            }
        }
        expired
    }

    async fn expire_if_stale(&self, id: Ulid, now: Ms) -> bool {
        let Some(mut room) = self.index.lock_reservation(&id).await else {
            // Released between the conflict and now; the retry will see it.
            return true;
        };
        match self.expire_locked(&mut room, id, now).await {
            Ok(expired) => {
                drop(room);
                if expired {
                    self.forget_key(id);
                }
                expired
            }
            Err(e) => {
                warn!(reservation = %id, error = %e, "failed to persist expiry");
                false
            }
        }
    }

    /// Expire `id` if it is still a Pending hold past its deadline. The
    /// caller holds the room lock.
    async fn expire_locked(
        &self,
        room: &mut RoomGuard<'_>,
        id: Ulid,
        now: Ms,
    ) -> Result<bool, StoreError> {
        match room.entry(id).map(|e| e.state) {
            Some(HoldState::Pending { expires_at }) if expires_at <= now => {}
            _ => return Ok(false),
        }
        self.store
            .update_status(
                id,
                StatusChange {
                    status: ReservationStatus::Expired,
                    at: now,
                    actor: None,
                },
            )
            .await?;
        room.release(id);
        metrics::counter!(RESERVATIONS_EXPIRED_TOTAL).increment(1);
        info!(reservation = %id, room_id = %room.room().room_id, "hold expired");
        Ok(true)
    }
}
