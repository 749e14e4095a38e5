use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        rooms: Vec<RoomIdentity>,
    },
    InsertReservation {
        room_id: String,
        range: DateRange,
        guest: GuestContact,
        idempotency_key: Option<String>,
    },
    ConfirmReservation {
        id: Ulid,
    },
    CancelReservation {
        id: Ulid,
        actor: Actor,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectRoomReservations {
        room_id: String,
    },
    SelectRooms {
        room_type: Option<String>,
    },
    SelectAvailability {
        room_id: String,
        range: DateRange,
    },
    SelectCalendar {
        room_type: String,
        from: NaiveDate,
        to: NaiveDate,
    },
    SelectBlockedDates {
        room_type: String,
        from: NaiveDate,
        to: NaiveDate,
    },
    SelectSoldOut {
        room_type: String,
        from: NaiveDate,
        to: NaiveDate,
    },
    SelectFreeDates {
        room_id: String,
        from: NaiveDate,
        to: NaiveDate,
    },
}

/// Column order for `INSERT INTO reservations` without a column list.
const RESERVATION_COLUMNS: [&str; 7] = [
    "room_id",
    "check_in",
    "check_out",
    "guest_name",
    "guest_email",
    "guest_phone",
    "idempotency_key",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();
    let rows = extract_all_insert_rows(insert)?;

    match table.as_str() {
        "rooms" => {
            let mut rooms = Vec::with_capacity(rows.len());
            for row in &rows {
                let row = Row::new(&columns, &["id", "room_type"], row);
                if row.arity() < 2 {
                    return Err(SqlError::WrongArity("rooms row", 2, row.arity()));
                }
                let room_id = row.text("id")?.ok_or(SqlError::MissingColumn("id"))?;
                let room_type = row
                    .text("room_type")?
                    .ok_or(SqlError::MissingColumn("room_type"))?;
                rooms.push(RoomIdentity::new(room_id, room_type));
            }
            Ok(Command::InsertRoom { rooms })
        }
        "reservations" => {
            if rows.len() != 1 {
                return Err(SqlError::Unsupported(
                    "one reservation per INSERT".into(),
                ));
            }
            let row = Row::new(&columns, &RESERVATION_COLUMNS, &rows[0]);
            let check_in = row.date("check_in")?.ok_or(SqlError::MissingColumn("check_in"))?;
            let check_out = row
                .date("check_out")?
                .ok_or(SqlError::MissingColumn("check_out"))?;
            Ok(Command::InsertReservation {
                room_id: row
                    .text("room_id")?
                    .ok_or(SqlError::MissingColumn("room_id"))?,
                range: DateRange::unchecked(check_in, check_out),
                guest: GuestContact {
                    name: row
                        .text("guest_name")?
                        .ok_or(SqlError::MissingColumn("guest_name"))?,
                    email: row
                        .text("guest_email")?
                        .ok_or(SqlError::MissingColumn("guest_email"))?,
                    phone: row.text("guest_phone")?,
                },
                idempotency_key: row.text("idempotency_key")?.filter(|k| !k.is_empty()),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let (mut status, mut actor) = (None, None);
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        match column.as_str() {
            "status" => {
                let raw = parse_text(&assignment.value)?
                    .ok_or_else(|| SqlError::Parse("status cannot be NULL".into()))?;
                status = Some(
                    ReservationStatus::parse(&raw)
                        .ok_or_else(|| SqlError::Parse(format!("unknown status: {raw}")))?,
                );
            }
            "cancelled_by" | "canceled_by" => {
                let raw = parse_text(&assignment.value)?
                    .ok_or_else(|| SqlError::Parse("cancelled_by cannot be NULL".into()))?;
                actor = Some(
                    Actor::parse(&raw)
                        .ok_or_else(|| SqlError::Parse(format!("unknown actor: {raw}")))?,
                );
            }
            other => return Err(SqlError::Unsupported(format!("SET {other}"))),
        }
    }

    match status {
        Some(ReservationStatus::Confirmed) => Ok(Command::ConfirmReservation { id }),
        Some(ReservationStatus::Cancelled) => Ok(Command::CancelReservation {
            id,
            actor: actor.unwrap_or(Actor::Admin),
        }),
        Some(other) => Err(SqlError::Unsupported(format!("status cannot be set to {other}"))),
        None => Err(SqlError::MissingColumn("status")),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::CancelReservation {
        id,
        actor: Actor::Guest,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        filters.collect(selection)?;
    }

    match table.as_str() {
        "reservations" => {
            if let Some(id) = filters.eq("id") {
                Ok(Command::SelectReservation {
                    id: parse_ulid_expr(id)?,
                })
            } else if let Some(room_id) = filters.eq("room_id") {
                Ok(Command::SelectRoomReservations {
                    room_id: required_text(room_id, "room_id")?,
                })
            } else {
                Err(SqlError::MissingFilter("id or room_id"))
            }
        }
        "rooms" => Ok(Command::SelectRooms {
            room_type: filters
                .eq("room_type")
                .map(|e| required_text(e, "room_type"))
                .transpose()?,
        }),
        "availability" => {
            let check_in = filters.date_eq("check_in")?;
            let check_out = filters.date_eq("check_out")?;
            Ok(Command::SelectAvailability {
                room_id: filters.text_eq("room_id")?,
                range: DateRange::unchecked(check_in, check_out),
            })
        }
        "calendar" => Ok(Command::SelectCalendar {
            room_type: filters.text_eq("room_type")?,
            from: filters.date_window_start()?,
            to: filters.date_window_end()?,
        }),
        "blocked_dates" => Ok(Command::SelectBlockedDates {
            room_type: filters.text_eq("room_type")?,
            from: filters.date_window_start()?,
            to: filters.date_window_end()?,
        }),
        "sold_out" => Ok(Command::SelectSoldOut {
            room_type: filters.text_eq("room_type")?,
            from: filters.date_window_start()?,
            to: filters.date_window_end()?,
        }),
        "free_dates" => Ok(Command::SelectFreeDates {
            room_id: filters.text_eq("room_id")?,
            from: filters.date_window_start()?,
            to: filters.date_window_end()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE filters ─────────────────────────────────────────────

/// Comparisons from an AND-only WHERE clause.
#[derive(Default)]
struct Filters<'a> {
    terms: Vec<(String, BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn collect(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.collect(left)?;
                self.collect(right)
            }
            Expr::BinaryOp { left, op, right } => {
                if let Some(col) = expr_column_name(left) {
                    self.terms.push((col, op.clone(), right.as_ref()));
                }
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
        }
    }

    fn find(&self, column: &str, op: &BinaryOperator) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, o, _)| c == column && o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, &BinaryOperator::Eq)
    }

    fn text_eq(&self, column: &'static str) -> Result<String, SqlError> {
        let expr = self.eq(column).ok_or(SqlError::MissingFilter(column))?;
        required_text(expr, column)
    }

    fn date_eq(&self, column: &'static str) -> Result<NaiveDate, SqlError> {
        let expr = self.eq(column).ok_or(SqlError::MissingFilter(column))?;
        parse_date_expr(expr)
    }

    /// `start >= 'date'`
    fn date_window_start(&self) -> Result<NaiveDate, SqlError> {
        let expr = self
            .find("start", &BinaryOperator::GtEq)
            .ok_or(SqlError::MissingFilter("start"))?;
        parse_date_expr(expr)
    }

    /// `"end" <= 'date'`
    fn date_window_end(&self) -> Result<NaiveDate, SqlError> {
        let expr = self
            .find("end", &BinaryOperator::LtEq)
            .ok_or(SqlError::MissingFilter("end"))?;
        parse_date_expr(expr)
    }
}

/// One VALUES row addressed by column name.
struct Row<'a> {
    columns: Vec<&'a str>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    /// Without an explicit column list, values map onto `default_order`.
    fn new(columns: &'a [String], default_order: &'a [&'a str], values: &'a [Expr]) -> Self {
        let columns = if columns.is_empty() {
            default_order.to_vec()
        } else {
            columns.iter().map(String::as_str).collect()
        };
        Self { columns, values }
    }

    fn arity(&self) -> usize {
        self.values.len().min(self.columns.len())
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        let pos = self.columns.iter().position(|c| *c == column)?;
        self.values.get(pos)
    }

    fn text(&self, column: &str) -> Result<Option<String>, SqlError> {
        match self.get(column) {
            Some(expr) => parse_text(expr),
            None => Ok(None),
        }
    }

    fn date(&self, column: &str) -> Result<Option<NaiveDate>, SqlError> {
        self.get(column).map(parse_date_expr).transpose()
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// A string literal, or `None` for NULL. Numbers are accepted as text.
fn parse_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn required_text(expr: &Expr, column: &'static str) -> Result<String, SqlError> {
    parse_text(expr)?.ok_or(SqlError::MissingColumn(column))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let raw = parse_text(expr)?.ok_or_else(|| SqlError::Parse("id cannot be NULL".into()))?;
    Ulid::from_string(&raw).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let raw = parse_text(expr)?.ok_or_else(|| SqlError::Parse("date cannot be NULL".into()))?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {raw:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
