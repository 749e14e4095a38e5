use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "innkeep_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "innkeep_query_duration_seconds";

// ── Admission metrics ───────────────────────────────────────────

/// Counter: reservation requests received by the engine.
pub const RESERVATION_REQUESTS_TOTAL: &str = "innkeep_reservation_requests_total";

/// Counter: requests admitted as Pending holds.
pub const RESERVATIONS_ADMITTED_TOTAL: &str = "innkeep_reservations_admitted_total";

/// Counter: requests refused because the dates were taken.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "innkeep_reservation_conflicts_total";

/// Counter: holds released because the store refused the record.
pub const RESERVATION_ROLLBACKS_TOTAL: &str = "innkeep_reservation_rollbacks_total";

/// Counter: Pending → Confirmed.
pub const RESERVATIONS_CONFIRMED_TOTAL: &str = "innkeep_reservations_confirmed_total";

/// Counter: cancellations. Labels: actor.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "innkeep_reservations_cancelled_total";

/// Counter: holds expired by the reaper, a late confirm, or a conflicting request.
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "innkeep_reservations_expired_total";

/// Histogram: time spent in admission (validate, reserve, persist) in seconds.
pub const ADMISSION_DURATION_SECONDS: &str = "innkeep_admission_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Gauge: registered rooms.
pub const ROOMS_REGISTERED: &str = "innkeep_rooms_registered";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "innkeep_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::ConfirmReservation { .. } => "confirm_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectRoomReservations { .. } => "select_room_reservations",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectBlockedDates { .. } => "select_blocked_dates",
        Command::SelectSoldOut { .. } => "select_sold_out",
        Command::SelectFreeDates { .. } => "select_free_dates",
    }
}
