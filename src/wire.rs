use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::InnkeepAuthSource;
use crate::engine::{
    CancelError, ConfirmError, Engine, QueryError, RequestError, ReservationRequest, RoomError,
};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct InnkeepHandler {
    engine: Arc<Engine>,
    query_parser: Arc<InnkeepQueryParser>,
}

impl InnkeepHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(InnkeepQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRoom { rooms } => {
                // Rooms already known with the same type are not counted.
                let added = engine.register_rooms(rooms).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(added))])
            }
            Command::InsertReservation {
                room_id,
                range,
                guest,
                idempotency_key,
            } => {
                let mut request = ReservationRequest::new(room_id, range, guest);
                if let Some(key) = idempotency_key {
                    request = request.with_idempotency_key(key);
                }
                let id = engine
                    .request_reservation(request)
                    .await
                    .map_err(engine_err)?;
                // A replayed key may point at a reservation that has moved on.
                let reservation = engine.reservation(id).await.map_err(engine_err)?;

                let schema = Arc::new(admission_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&reservation.id.to_string())?;
                encoder.encode_field(&reservation.status.as_str().to_string())?;
                encoder.encode_field(&pending_expiry(&reservation))?;
                let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::ConfirmReservation { id } => {
                engine.confirm_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelReservation { id, actor } => {
                engine
                    .cancel_reservation(id, actor)
                    .await
                    .map_err(engine_err)?;
                let tag = if actor == Actor::Guest { "DELETE" } else { "UPDATE" };
                Ok(vec![Response::Execution(Tag::new(tag).with_rows(1))])
            }
            Command::SelectReservation { id } => {
                let r = engine.reservation(id).await.map_err(engine_err)?;
                let schema = Arc::new(reservation_schema());
                let guest = serde_json::to_string(&r.guest)
                    .map_err(|e| PgWireError::ApiError(Box::new(e)))?;

                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&r.id.to_string())?;
                encoder.encode_field(&r.room_id)?;
                encoder.encode_field(&r.range.start.to_string())?;
                encoder.encode_field(&r.range.end.to_string())?;
                encoder.encode_field(&r.status.as_str().to_string())?;
                encoder.encode_field(&guest)?;
                encoder.encode_field(&r.created_at)?;
                encoder.encode_field(&pending_expiry(&r))?;
                encoder.encode_field(&r.updated_at)?;
                encoder.encode_field(&r.cancelled_by.map(|a| a.as_str().to_string()))?;
                encoder.encode_field(&r.idempotency_key)?;
                let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectRoomReservations { room_id } => {
                let active = engine
                    .active_reservations(&room_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(active_schema());
                let rows: Vec<PgWireResult<_>> = active
                    .into_iter()
                    .map(|info| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&info.id.to_string())?;
                        encoder.encode_field(&info.room_id)?;
                        encoder.encode_field(&info.range.start.to_string())?;
                        encoder.encode_field(&info.range.end.to_string())?;
                        encoder.encode_field(&info.status.as_str().to_string())?;
                        encoder.encode_field(&info.hold_expires_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectRooms { room_type } => {
                let rooms = engine.list_rooms(room_type.as_deref());
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .into_iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.room_id)?;
                        encoder.encode_field(&room.room_type)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability { room_id, range } => {
                let available = engine
                    .room_availability(&room_id, range)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&room_id)?;
                encoder.encode_field(&available)?;
                let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectCalendar {
                room_type,
                from,
                to,
            } => {
                let ranges = engine
                    .room_type_calendar(&room_type, from, to)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![range_rows(ranges)])
            }
            Command::SelectBlockedDates {
                room_type,
                from,
                to,
            } => {
                let blocked = engine
                    .room_blocked_dates(&room_type, from, to)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(blocked_schema());
                let rows: Vec<PgWireResult<_>> = blocked
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.room_id)?;
                        encoder.encode_field(&b.range.start.to_string())?;
                        encoder.encode_field(&b.range.end.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSoldOut {
                room_type,
                from,
                to,
            } => {
                let ranges = engine
                    .room_type_sold_out(&room_type, from, to)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![range_rows(ranges)])
            }
            Command::SelectFreeDates { room_id, from, to } => {
                let ranges = engine
                    .room_free_ranges(&room_id, from, to)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![range_rows(ranges)])
            }
        }
    }
}

fn pending_expiry(r: &Reservation) -> Option<Ms> {
    (r.status == ReservationStatus::Pending).then_some(r.hold_expires_at)
}

fn range_rows(ranges: Vec<DateRange>) -> Response {
    let schema = Arc::new(range_schema());
    let rows: Vec<PgWireResult<_>> = ranges
        .into_iter()
        .map(|range| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&range.start.to_string())?;
            encoder.encode_field(&range.end.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn admission_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("status"),
        int8_field("hold_expires_at"),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("room_id"),
        text_field("check_in"),
        text_field("check_out"),
        text_field("status"),
        text_field("guest"),
        int8_field("created_at"),
        int8_field("hold_expires_at"),
        int8_field("updated_at"),
        text_field("cancelled_by"),
        text_field("idempotency_key"),
    ]
}

fn active_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("room_id"),
        text_field("check_in"),
        text_field("check_out"),
        text_field("status"),
        int8_field("hold_expires_at"),
    ]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("room_type")]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id"),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn blocked_schema() -> Vec<FieldInfo> {
    vec![text_field("room_id"), text_field("start"), text_field("end")]
}

fn range_schema() -> Vec<FieldInfo> {
    vec![text_field("start"), text_field("end")]
}

/// Result columns a statement will produce, judged from its target table.
/// Placeholders make the statement unparseable before binding.
fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .collect();
    let after = |keyword: &str| {
        words
            .iter()
            .position(|w| *w == keyword)
            .and_then(|i| words.get(i + 1))
            .map(|w| w.trim_matches('"'))
    };

    match words.first().copied() {
        Some("insert") if after("into") == Some("reservations") => admission_schema(),
        Some("select") => match after("from") {
            Some("reservations") if lower.contains("room_id") => active_schema(),
            Some("reservations") => reservation_schema(),
            Some("rooms") => rooms_schema(),
            Some("availability") => availability_schema(),
            Some("blocked_dates") => blocked_schema(),
            Some("calendar" | "sold_out" | "free_dates") => range_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for InnkeepHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct InnkeepQueryParser;

#[async_trait]
impl QueryParser for InnkeepQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for InnkeepHandler {
    type Statement = String;
    type QueryParser = InnkeepQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(&sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals and identifiers, as the byte
/// range each occupies and its index.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves us inside.
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let digits = i + 1;
                let mut end = digits;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > digits
                    && let Ok(n) = sql[digits..end].parse::<usize>()
                {
                    found.push((i..end, n));
                }
                i = end;
            }
            None => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_text_params(&portal.statement.statement, &params)
}

/// One pass over the statement text. Each placeholder is replaced exactly
/// once, so a bound value is never rescanned. Unbound indexes stay as written
/// and fail in the parser.
fn bind_text_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(text) => {
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct InnkeepFactory {
    handler: Arc<InnkeepHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<InnkeepAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl InnkeepFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = InnkeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(InnkeepHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for InnkeepFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = InnkeepFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for an engine error.
trait SqlState {
    fn sqlstate(&self) -> &'static str;
}

const INVALID_DATETIME: &str = "22008";
const EXCLUSION_VIOLATION: &str = "23P01";
const NO_DATA_FOUND: &str = "P0002";
const OBJECT_NOT_IN_STATE: &str = "55000";
const UNIQUE_VIOLATION: &str = "23505";
const INVALID_PARAMETER: &str = "22023";
const PROGRAM_LIMIT: &str = "54000";
const IO_ERROR: &str = "58030";
const SYNTAX_ERROR: &str = "42601";

impl SqlState for RequestError {
    fn sqlstate(&self) -> &'static str {
        match self {
            RequestError::InvalidRange(_) => INVALID_DATETIME,
            RequestError::InvalidGuest(_) => INVALID_PARAMETER,
            RequestError::UnknownRoom(_) => NO_DATA_FOUND,
            RequestError::RoomUnavailable { .. } => EXCLUSION_VIOLATION,
            RequestError::IdempotencyKeyReused(_) => UNIQUE_VIOLATION,
            RequestError::LimitExceeded(_) => PROGRAM_LIMIT,
            RequestError::Storage(_) => IO_ERROR,
        }
    }
}

impl SqlState for ConfirmError {
    fn sqlstate(&self) -> &'static str {
        match self {
            ConfirmError::NotFound(_) => NO_DATA_FOUND,
            ConfirmError::AlreadyConfirmed(_) | ConfirmError::AlreadyTerminal { .. } => {
                OBJECT_NOT_IN_STATE
            }
            ConfirmError::Storage(_) => IO_ERROR,
        }
    }
}

impl SqlState for CancelError {
    fn sqlstate(&self) -> &'static str {
        match self {
            CancelError::NotFound(_) => NO_DATA_FOUND,
            CancelError::Storage(_) => IO_ERROR,
        }
    }
}

impl SqlState for QueryError {
    fn sqlstate(&self) -> &'static str {
        match self {
            QueryError::InvalidRange(_) => INVALID_DATETIME,
            QueryError::UnknownRoom(_)
            | QueryError::UnknownRoomType(_)
            | QueryError::NotFound(_) => NO_DATA_FOUND,
            QueryError::LimitExceeded(_) => PROGRAM_LIMIT,
            QueryError::Storage(_) => IO_ERROR,
        }
    }
}

impl SqlState for RoomError {
    fn sqlstate(&self) -> &'static str {
        match self {
            RoomError::TypeMismatch { .. } => UNIQUE_VIOLATION,
            RoomError::InvalidRoom(_) => INVALID_PARAMETER,
            RoomError::LimitExceeded(_) => PROGRAM_LIMIT,
            RoomError::Storage(_) => IO_ERROR,
        }
    }
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err<E: SqlState + std::fmt::Display>(e: E) -> PgWireError {
    let code = e.sqlstate();
    debug!(code, error = %e, "statement rejected");
    user_error(code, e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(SYNTAX_ERROR, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InvalidRange;
    use ulid::Ulid;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(
            count_params("SELECT * FROM availability WHERE room_id = $1 AND check_in = $2 AND check_out = $3"),
            3
        );
        assert_eq!(count_params("VALUES ($2, $10, $1)"), 10);
    }

    #[test]
    fn bind_params_quotes_and_orders() {
        let params: Vec<Option<String>> = (1..=10)
            .map(|i| Some(format!("v{i}")))
            .chain(std::iter::once(Some("O'Brien".to_string())))
            .collect();
        let sql = bind_text_params("x = $1 AND y = $10 AND z = $11", &params);
        assert_eq!(sql, "x = 'v1' AND y = 'v10' AND z = 'O''Brien'");

        let sql = bind_text_params("x = $1", &[None]);
        assert_eq!(sql, "x = NULL");
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let params = vec![
            Some("R1".to_string()),
            Some("2025-06-01".to_string()),
            Some("2025-06-05".to_string()),
            Some("Suite $1 fan".to_string()),
            Some("fan@example.com".to_string()),
        ];
        let sql = bind_text_params(
            "INSERT INTO reservations (room_id, check_in, check_out, guest_name, guest_email) \
             VALUES ($1, $2, $3, $4, $5)",
            &params,
        );
        assert!(sql.ends_with(
            "VALUES ('R1', '2025-06-01', '2025-06-05', 'Suite $1 fan', 'fan@example.com')"
        ));
        match sql::parse_sql(&sql).unwrap() {
            Command::InsertReservation { room_id, guest, .. } => {
                assert_eq!(room_id, "R1");
                assert_eq!(guest.name, "Suite $1 fan");
            }
            other => panic!("unexpected command: {other:?}"),
        }

        // Placeholders inside literals belong to the literal.
        let sql = bind_text_params("x = '$1' AND \"$2\" = $2", &[Some("a".into()), Some("b".into())]);
        assert_eq!(sql, "x = '$1' AND \"$2\" = 'b'");
        assert_eq!(count_params("x = 'it''s $9' AND y = $2"), 2);
    }

    #[test]
    fn statement_schema_by_table() {
        let names = |sql: &str| -> Vec<String> {
            statement_schema(sql)
                .iter()
                .map(|f| f.name().to_string())
                .collect()
        };
        assert_eq!(
            names("INSERT INTO reservations (room_id) VALUES ($1)"),
            ["id", "status", "hold_expires_at"]
        );
        assert_eq!(names("SELECT * FROM rooms"), ["id", "room_type"]);
        assert_eq!(
            names("SELECT * FROM sold_out WHERE room_type = $1"),
            ["start", "end"]
        );
        assert_eq!(names("SELECT * FROM reservations WHERE room_id = $1").len(), 6);
        assert_eq!(names("SELECT * FROM reservations WHERE id = $1").len(), 11);
        assert!(names("INSERT INTO rooms VALUES ($1, $2)").is_empty());
        assert!(names("DELETE FROM reservations WHERE id = $1").is_empty());
    }

    #[test]
    fn engine_errors_map_to_sqlstate() {
        let id = Ulid::new();
        assert_eq!(
            RequestError::RoomUnavailable {
                conflicting_reservation_id: id
            }
            .sqlstate(),
            "23P01"
        );
        assert_eq!(
            RequestError::InvalidRange(InvalidRange::OutOfRange).sqlstate(),
            "22008"
        );
        assert_eq!(RequestError::IdempotencyKeyReused(id).sqlstate(), "23505");
        assert_eq!(ConfirmError::AlreadyConfirmed(id).sqlstate(), "55000");
        assert_eq!(
            ConfirmError::AlreadyTerminal {
                id,
                status: ReservationStatus::Expired
            }
            .sqlstate(),
            "55000"
        );
        assert_eq!(CancelError::NotFound(id).sqlstate(), "P0002");
        assert_eq!(
            QueryError::UnknownRoomType("Loft".into()).sqlstate(),
            "P0002"
        );
        assert_eq!(QueryError::LimitExceeded("window").sqlstate(), "54000");
    }
}
