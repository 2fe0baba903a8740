use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::clock::parse_date;
use crate::engine::{BookingRequest, DetailsPatch, RescheduleTo};
use crate::model::*;
use crate::schedule::{OverrideChange, SchedulePatch};

/// Default appointment length when an INSERT leaves `duration` out.
pub const DEFAULT_DURATION_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentFilter {
    All,
    Date(NaiveDate),
    Id(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectAvailableSlots {
        date: NaiveDate,
        duration: Option<u32>,
    },
    SelectBookableDate {
        date: NaiveDate,
        duration: Option<u32>,
    },
    SelectAppointments(AppointmentFilter),
    InsertAppointment(BookingRequest),
    /// Reschedule and/or details, applied together or not at all.
    UpdateAppointment {
        id: Ulid,
        reschedule: RescheduleTo,
        details: DetailsPatch,
    },
    DeleteAppointment {
        id: Ulid,
    },
    SelectSchedule,
    SelectWeeklyHours,
    SelectDateOverrides,
    UpdateSchedule(SchedulePatch),
    Listen {
        channel: String,
    },
    /// `None` = `UNLISTEN *`.
    Unlisten {
        channel: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(rest) = strip_keyword(trimmed, "LISTEN ") {
        return Ok(Command::Listen { channel: rest.trim().to_string() });
    }
    if let Some(rest) = strip_keyword(trimmed, "UNLISTEN ") {
        let channel = rest.trim();
        return Ok(Command::Unlisten {
            channel: (channel != "*").then(|| channel.to_string()),
        });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Case-insensitive ASCII prefix match that never splits a character.
fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword)
        .then(|| &sql[keyword.len()..])
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;
    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();

    match table.as_str() {
        "appointments" => {
            if rows.len() != 1 {
                return Err(SqlError::Unsupported(
                    "one appointment per INSERT".into(),
                ));
            }
            let row = named_row(
                &table,
                &columns,
                &rows[0],
                &["date", "start_time", "duration", "service", "full_name", "email", "phone"],
            )?;
            let date = parse_date_expr(required(&row, "date")?)?;
            let start_time = parse_time_expr(required(&row, "start_time")?)?;
            let duration_minutes = match row.get("duration") {
                Some(expr) => parse_u32_or_null(expr)?.unwrap_or(DEFAULT_DURATION_MINUTES),
                None => DEFAULT_DURATION_MINUTES,
            };
            let service = match row.get("service") {
                Some(expr) => parse_text_or_null(expr)?.unwrap_or_default(),
                None => String::new(),
            };
            let customer = Customer {
                full_name: parse_text(required(&row, "full_name")?)?,
                email: optional_text(&row, "email")?,
                phone: optional_text(&row, "phone")?,
            };
            Ok(Command::InsertAppointment(BookingRequest {
                date,
                start_time,
                duration_minutes,
                service,
                customer,
            }))
        }
        "weekly_hours" => {
            let mut weekly_hours = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = named_row(&table, &columns, values, &["day", "open", "close"])
                    .map_err(|e| e.in_row(i))?;
                let day = parse_u32(required(&row, "day")?).map_err(|e| e.in_row(i))?;
                let day = u8::try_from(day)
                    .map_err(|_| SqlError::Parse(format!("row {i}: day {day} out of range")))?;
                let hours = parse_hours(&row).map_err(|e| e.in_row(i))?;
                weekly_hours.push((day, hours));
            }
            Ok(Command::UpdateSchedule(SchedulePatch {
                weekly_hours,
                ..Default::default()
            }))
        }
        "date_overrides" => {
            let mut date_overrides = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = named_row(&table, &columns, values, &["date", "open", "close"])
                    .map_err(|e| e.in_row(i))?;
                let date = parse_date_expr(required(&row, "date")?).map_err(|e| e.in_row(i))?;
                let hours = parse_hours(&row).map_err(|e| e.in_row(i))?;
                date_overrides.push((date, OverrideChange::Set(hours)));
            }
            Ok(Command::UpdateSchedule(SchedulePatch {
                date_overrides,
                ..Default::default()
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `open`/`close` both NULL (or absent) means closed; one without the
/// other is an error.
fn parse_hours(row: &HashMap<String, &Expr>) -> Result<Option<Hours>, SqlError> {
    let open = optional_text(row, "open")?;
    let close = optional_text(row, "close")?;
    match (open, close) {
        (None, None) => Ok(None),
        (Some(open), Some(close)) => Ok(Some(Hours::new(parse_time(&open)?, parse_time(&close)?))),
        _ => Err(SqlError::Parse("open and close must both be set or both be NULL".into())),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut set = HashMap::new();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.insert(column, &assignment.value);
    }

    match table.as_str() {
        "appointments" => {
            let id = extract_where_id(selection)?;
            let mut reschedule = RescheduleTo::default();
            let mut details = DetailsPatch::default();
            for (column, expr) in set {
                match column.as_str() {
                    "date" => reschedule.date = Some(parse_date_expr(expr)?),
                    "start_time" => reschedule.start_time = Some(parse_time_expr(expr)?),
                    "duration" => reschedule.duration_minutes = Some(parse_u32(expr)?),
                    "service" => details.service = Some(parse_text_or_null(expr)?.unwrap_or_default()),
                    "full_name" => details.full_name = Some(parse_text(expr)?),
                    "email" => details.email = Some(parse_text_or_null(expr)?),
                    "phone" => details.phone = Some(parse_text_or_null(expr)?),
                    other => return Err(SqlError::UnknownColumn(table.clone(), other.to_string())),
                }
            }
            if reschedule.is_empty() && details.is_empty() {
                return Err(SqlError::Parse("UPDATE without SET".into()));
            }
            Ok(Command::UpdateAppointment { id, reschedule, details })
        }
        "schedule" => {
            let mut patch = SchedulePatch::default();
            for (column, expr) in set {
                match column.as_str() {
                    "slot_duration" => patch.slot_duration_minutes = Some(parse_u32(expr)?),
                    other => return Err(SqlError::UnknownColumn(table.clone(), other.to_string())),
                }
            }
            Ok(Command::UpdateSchedule(patch))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = where_filters(delete.selection.as_ref())?;

    match table.as_str() {
        "appointments" => Ok(Command::DeleteAppointment {
            id: extract_where_id(delete.selection.as_ref())?,
        }),
        "weekly_hours" => {
            let day = filters
                .get("day")
                .ok_or(SqlError::MissingFilter("day"))
                .and_then(|expr| parse_u32(expr))?;
            let day = u8::try_from(day)
                .map_err(|_| SqlError::Parse(format!("day {day} out of range")))?;
            Ok(Command::UpdateSchedule(SchedulePatch {
                weekly_hours: vec![(day, None)],
                ..Default::default()
            }))
        }
        "date_overrides" => {
            let date = filters
                .get("date")
                .ok_or(SqlError::MissingFilter("date"))
                .and_then(|expr| parse_date_expr(expr))?;
            Ok(Command::UpdateSchedule(SchedulePatch {
                date_overrides: vec![(date, OverrideChange::Remove)],
                ..Default::default()
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = where_filters(select.selection.as_ref())?;
    let allow = |allowed: &[&str]| -> Result<(), SqlError> {
        match filters.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(col) => Err(SqlError::UnknownColumn(table.clone(), col.clone())),
            None => Ok(()),
        }
    };

    match table.as_str() {
        "available_slots" | "bookable_dates" => {
            allow(&["date", "duration"])?;
            let date = filters
                .get("date")
                .ok_or(SqlError::MissingFilter("date"))
                .and_then(|expr| parse_date_expr(expr))?;
            let duration = match filters.get("duration") {
                Some(expr) => parse_u32_or_null(expr)?,
                None => None,
            };
            if table == "available_slots" {
                Ok(Command::SelectAvailableSlots { date, duration })
            } else {
                Ok(Command::SelectBookableDate { date, duration })
            }
        }
        "appointments" => {
            allow(&["date", "id"])?;
            let filter = match (filters.get("id"), filters.get("date")) {
                (Some(id), _) => AppointmentFilter::Id(parse_ulid_expr(id)?),
                (None, Some(date)) => AppointmentFilter::Date(parse_date_expr(date)?),
                (None, None) => AppointmentFilter::All,
            };
            Ok(Command::SelectAppointments(filter))
        }
        "schedule" => {
            allow(&[])?;
            Ok(Command::SelectSchedule)
        }
        "weekly_hours" => {
            allow(&[])?;
            Ok(Command::SelectWeeklyHours)
        }
        "date_overrides" => {
            allow(&[])?;
            Ok(Command::SelectDateOverrides)
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` terms joined by AND, keyed by lowercase column name.
fn where_filters(selection: Option<&Expr>) -> Result<HashMap<String, &Expr>, SqlError> {
    let mut filters = HashMap::new();
    if let Some(expr) = selection {
        collect_filters(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_filters<'a>(
    expr: &'a Expr,
    filters: &mut HashMap<String, &'a Expr>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                filters.insert(col, right.as_ref());
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
        },
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Pair row values with column names. Without a column list the values are
/// taken positionally in `known` order.
fn named_row<'a>(
    table: &str,
    columns: &[String],
    values: &'a [Expr],
    known: &[&'static str],
) -> Result<HashMap<String, &'a Expr>, SqlError> {
    let names: Vec<String> = if columns.is_empty() {
        if values.len() > known.len() {
            return Err(SqlError::WrongArity(known.len(), values.len()));
        }
        known.iter().map(|s| s.to_string()).collect()
    } else {
        if columns.len() != values.len() {
            return Err(SqlError::WrongArity(columns.len(), values.len()));
        }
        if let Some(unknown) = columns.iter().find(|c| !known.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(table.to_string(), unknown.clone()));
        }
        columns.to_vec()
    };
    Ok(names.into_iter().zip(values.iter()).collect())
}

fn required<'a>(row: &HashMap<String, &'a Expr>, column: &'static str) -> Result<&'a Expr, SqlError> {
    row.get(column).copied().ok_or(SqlError::MissingColumn(column))
}

fn optional_text(row: &HashMap<String, &Expr>, column: &str) -> Result<Option<String>, SqlError> {
    match row.get(column) {
        Some(expr) => parse_text_or_null(expr),
        None => Ok(None),
    }
}

fn extract_where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    let filters = where_filters(selection)?;
    let expr = filters.get("id").ok_or(SqlError::MissingFilter("id"))?;
    parse_ulid_expr(expr)
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

/// Literal behind casts and parentheses, so `'2030-01-07'::date` and
/// `($1)` work.
fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        Expr::Cast { expr, .. } | Expr::Nested(expr) => extract_value(expr),
        _ => None,
    }
}

/// Text of a string or number literal; `None` for NULL.
fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    parse_text_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    parse_date(&s).map_err(|_| SqlError::Parse(format!("bad date {s:?} (expected YYYY-MM-DD)")))
}

fn parse_time(s: &str) -> Result<TimeOfDay, SqlError> {
    s.parse().map_err(|e: InvalidTime| SqlError::Parse(e.to_string()))
}

fn parse_time_expr(expr: &Expr) -> Result<TimeOfDay, SqlError> {
    parse_time(&parse_text(expr)?)
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    match parse_text_or_null(expr)? {
        None => Ok(None),
        Some(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    parse_u32_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String, String),
    WrongArity(usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl SqlError {
    fn in_row(self, row: usize) -> SqlError {
        SqlError::Parse(format!("row {row}: {self}"))
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} on {t}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn parse_insert_appointment() {
        let sql = "INSERT INTO appointments (date, start_time, duration, service, full_name, email, phone) \
                   VALUES ('2030-01-07', '10:00', 90, 'Colour', 'Ana Silva', 'ana@example.com', '+1 234 567 8900')";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::InsertAppointment(req) => {
                assert_eq!(req.date, d("2030-01-07"));
                assert_eq!(req.start_time, t("10:00"));
                assert_eq!(req.duration_minutes, 90);
                assert_eq!(req.service, "Colour");
                assert_eq!(req.customer.full_name, "Ana Silva");
                assert_eq!(req.customer.email.as_deref(), Some("ana@example.com"));
                assert_eq!(req.customer.phone.as_deref(), Some("+1 234 567 8900"));
            }
            _ => panic!("expected InsertAppointment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_appointment_defaults() {
        let sql = "INSERT INTO appointments (date, start_time, full_name, email) \
                   VALUES ('2030-01-07', '9:30', 'Ana Silva', NULL)";
        match parse_sql(sql).unwrap() {
            Command::InsertAppointment(req) => {
                assert_eq!(req.duration_minutes, DEFAULT_DURATION_MINUTES);
                assert_eq!(req.start_time, t("09:30"));
                assert_eq!(req.service, "");
                assert_eq!(req.customer.email, None);
                assert_eq!(req.customer.phone, None);
            }
            other => panic!("expected InsertAppointment, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_appointment_needs_name_and_time() {
        let sql = "INSERT INTO appointments (date, full_name) VALUES ('2030-01-07', 'Ana')";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingColumn("start_time"))));
        let sql = "INSERT INTO appointments (date, start_time, full_name, colour) VALUES ('2030-01-07', '10:00', 'Ana', 'red')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(..))));
        let sql = "INSERT INTO appointments (date, start_time, full_name) VALUES ('2030-01-07', '25:00', 'Ana')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_casts_are_unwrapped() {
        let sql = "SELECT * FROM available_slots WHERE date = '2030-01-07'::date AND duration = '45'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailableSlots { date: d("2030-01-07"), duration: Some(45) }
        );
    }

    #[test]
    fn parse_select_available_slots() {
        let sql = "SELECT * FROM available_slots WHERE date = '2030-01-07'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailableSlots { date: d("2030-01-07"), duration: None }
        );
        let sql = "SELECT * FROM available_slots";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("date"))));
        let sql = "SELECT * FROM available_slots WHERE date = '2030-01-07' AND stylist = 'x'";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(..))));
    }

    #[test]
    fn parse_select_bookable_date() {
        let sql = "SELECT * FROM bookable_dates WHERE date = '2030-01-07' AND duration = 30";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectBookableDate { date: d("2030-01-07"), duration: Some(30) }
        );
    }

    #[test]
    fn parse_select_appointments() {
        assert_eq!(
            parse_sql("SELECT * FROM appointments").unwrap(),
            Command::SelectAppointments(AppointmentFilter::All)
        );
        assert_eq!(
            parse_sql("SELECT * FROM appointments WHERE date = '2030-01-07'").unwrap(),
            Command::SelectAppointments(AppointmentFilter::Date(d("2030-01-07")))
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM appointments WHERE id = '{ID}'")).unwrap(),
            Command::SelectAppointments(AppointmentFilter::Id(Ulid::from_string(ID).unwrap()))
        );
    }

    #[test]
    fn parse_update_appointment_reschedule() {
        let sql = format!(
            "UPDATE appointments SET date = '2030-01-08', start_time = '14:00' WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateAppointment { id, reschedule, details } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(reschedule.date, Some(d("2030-01-08")));
                assert_eq!(reschedule.start_time, Some(t("14:00")));
                assert_eq!(reschedule.duration_minutes, None);
                assert!(details.is_empty());
            }
            other => panic!("expected UpdateAppointment, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_appointment_details() {
        let sql = format!("UPDATE appointments SET service = 'Colour', phone = NULL WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateAppointment { reschedule, details, .. } => {
                assert!(reschedule.is_empty());
                assert_eq!(details.service.as_deref(), Some("Colour"));
                assert_eq!(details.phone, Some(None));
                assert_eq!(details.email, None);
            }
            other => panic!("expected UpdateAppointment, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE appointments SET start_time = '10:00'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
        let sql = format!("UPDATE appointments SET created_at = 0 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(..))));
    }

    #[test]
    fn parse_delete_appointment() {
        let sql = format!("DELETE FROM appointments WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DeleteAppointment { id: Ulid::from_string(ID).unwrap() }
        );
    }

    #[test]
    fn parse_schedule_writes() {
        assert_eq!(
            parse_sql("UPDATE schedule SET slot_duration = 30").unwrap(),
            Command::UpdateSchedule(SchedulePatch {
                slot_duration_minutes: Some(30),
                ..Default::default()
            })
        );

        let sql = "INSERT INTO weekly_hours (day, open, close) VALUES (0, '10:00', '14:00'), (1, NULL, NULL)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::UpdateSchedule(SchedulePatch {
                weekly_hours: vec![(0, Some(Hours::new(t("10:00"), t("14:00")))), (1, None)],
                ..Default::default()
            })
        );

        assert_eq!(
            parse_sql("DELETE FROM weekly_hours WHERE day = 6").unwrap(),
            Command::UpdateSchedule(SchedulePatch {
                weekly_hours: vec![(6, None)],
                ..Default::default()
            })
        );

        let sql = "INSERT INTO date_overrides VALUES ('2030-12-25', NULL, NULL)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::UpdateSchedule(SchedulePatch {
                date_overrides: vec![(d("2030-12-25"), OverrideChange::Set(None))],
                ..Default::default()
            })
        );

        assert_eq!(
            parse_sql("DELETE FROM date_overrides WHERE date = '2030-12-25'").unwrap(),
            Command::UpdateSchedule(SchedulePatch {
                date_overrides: vec![(d("2030-12-25"), OverrideChange::Remove)],
                ..Default::default()
            })
        );
    }

    #[test]
    fn parse_half_open_hours_rejected() {
        let sql = "INSERT INTO weekly_hours (day, open, close) VALUES (2, '09:00', NULL)";
        assert!(parse_sql(sql).is_err());
    }

    #[test]
    fn parse_schedule_reads() {
        assert_eq!(parse_sql("SELECT * FROM schedule").unwrap(), Command::SelectSchedule);
        assert_eq!(parse_sql("SELECT * FROM weekly_hours").unwrap(), Command::SelectWeeklyHours);
        assert_eq!(parse_sql("SELECT * FROM date_overrides").unwrap(), Command::SelectDateOverrides);
    }

    #[test]
    fn parse_listen_and_unlisten() {
        assert_eq!(
            parse_sql("LISTEN appointments;").unwrap(),
            Command::Listen { channel: "appointments".into() }
        );
        assert_eq!(
            parse_sql("UNLISTEN appointments").unwrap(),
            Command::Unlisten { channel: Some("appointments".into()) }
        );
        assert_eq!(parse_sql("UNLISTEN *").unwrap(), Command::Unlisten { channel: None });
        assert_eq!(
            parse_sql("listen appointments").unwrap(),
            Command::Listen { channel: "appointments".into() }
        );
    }

    #[test]
    fn listen_prefix_is_ascii_only() {
        // `ı` and `ſ` uppercase to ASCII letters of a different byte length.
        assert!(!matches!(parse_sql("lıſten appointments"), Ok(Command::Listen { .. })));
        assert!(!matches!(parse_sql("unlıſten é"), Ok(Command::Unlisten { .. })));
        assert!(parse_sql("é").is_err());
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM stylists"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
