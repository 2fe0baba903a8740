use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::auth::SalondAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify::{BookingNotice, NOTICE_CHANNEL};
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, AppointmentFilter, Command, SqlError};
use crate::tenant::TenantManager;

/// One handler per connection: it owns that connection's LISTEN state.
pub struct SalondHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SalondQueryParser>,
    listener: Mutex<Option<broadcast::Receiver<BookingNotice>>>,
}

impl SalondHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SalondQueryParser),
            listener: Mutex::new(None),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            user_error("08006", format!("tenant error: {e}"))
        })
    }

    /// Parse, execute and record one statement.
    async fn run_statement(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::SelectAvailableSlots { date, duration } => {
                let slots = engine
                    .get_available_slots(date, duration)
                    .map_err(engine_err)?;
                Ok(vec![rows(slots_schema(), slots, |enc, slot| {
                    enc.encode_field(&slot.to_string())
                })])
            }
            Command::SelectBookableDate { date, duration } => {
                let bookable = engine.is_date_bookable(date, duration).map_err(engine_err)?;
                Ok(vec![rows(bookable_schema(), vec![(date, bookable)], |enc, (date, ok)| {
                    enc.encode_field(&date.to_string())?;
                    enc.encode_field(ok)
                })])
            }
            Command::SelectAppointments(filter) => {
                let appointments = match filter {
                    AppointmentFilter::All => engine.list_appointments(None),
                    AppointmentFilter::Date(date) => engine.list_appointments(Some(date)),
                    AppointmentFilter::Id(id) => match engine.get_appointment(id) {
                        Ok(appointment) => vec![appointment],
                        Err(EngineError::NotFound(_)) => Vec::new(),
                        Err(e) => return Err(engine_err(e)),
                    },
                };
                Ok(vec![appointment_rows(engine, appointments)])
            }
            Command::InsertAppointment(request) => {
                let created = engine.create_appointment(request).await.map_err(engine_err)?;
                Ok(vec![appointment_rows(engine, vec![created])])
            }
            Command::UpdateAppointment {
                id,
                reschedule,
                details,
            } => {
                engine
                    .update_appointment(id, reschedule, details)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteAppointment { id } => {
                engine.cancel_appointment(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectSchedule => {
                let config = engine.get_schedule();
                let timezone = engine.clock().timezone().name().to_string();
                Ok(vec![rows(
                    schedule_schema(),
                    vec![(config.slot_duration_minutes, timezone)],
                    |enc, (minutes, tz)| {
                        enc.encode_field(&i64::from(*minutes))?;
                        enc.encode_field(tz)
                    },
                )])
            }
            Command::SelectWeeklyHours => {
                let config = engine.get_schedule();
                let days: Vec<(i64, Option<Hours>)> = config
                    .weekly_hours
                    .iter()
                    .enumerate()
                    .map(|(day, hours)| (day as i64, *hours))
                    .collect();
                Ok(vec![rows(weekly_hours_schema(), days, |enc, (day, hours)| {
                    enc.encode_field(day)?;
                    encode_hours(enc, hours)
                })])
            }
            Command::SelectDateOverrides => {
                let config = engine.get_schedule();
                let overrides: Vec<_> = config.date_overrides.into_iter().collect();
                Ok(vec![rows(date_overrides_schema(), overrides, |enc, (date, hours)| {
                    enc.encode_field(&date.to_string())?;
                    encode_hours(enc, hours)
                })])
            }
            Command::UpdateSchedule(patch) => {
                let changed = patch.weekly_hours.len()
                    + patch.date_overrides.len()
                    + usize::from(patch.slot_duration_minutes.is_some());
                engine.update_schedule(&patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(changed))])
            }
            Command::Listen { channel } => {
                if channel != NOTICE_CHANNEL {
                    return Err(user_error(
                        "22023",
                        format!("unknown channel: {channel} (expected {NOTICE_CHANNEL})"),
                    ));
                }
                let mut listener = self.lock_listener();
                if listener.is_none() {
                    *listener = Some(engine.notify.subscribe());
                }
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                if channel.is_none() || channel.as_deref() == Some(NOTICE_CHANNEL) {
                    *self.lock_listener() = None;
                }
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<broadcast::Receiver<BookingNotice>>> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending_notices(&self) -> Vec<BookingNotice> {
        let mut listener = self.lock_listener();
        let Some(rx) = listener.as_mut() else {
            return Vec::new();
        };
        let mut notices = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(notice) => notices.push(notice),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "listener fell behind, notices dropped");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    *listener = None;
                    break;
                }
            }
        }
        notices
    }

    /// Flush notices that arrived since this connection's last statement.
    async fn deliver_notices<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        for notice in self.pending_notices() {
            let message = NotificationResponse::new(
                std::process::id() as i32,
                NOTICE_CHANNEL.to_string(),
                notice.to_json(),
            );
            client
                .send(PgWireBackendMessage::NotificationResponse(message))
                .await?;
        }
        Ok(())
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![text_field("slot")]
}

fn bookable_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        FieldInfo::new("bookable".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn appointment_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("date"),
        text_field("start_time"),
        text_field("end_time"),
        int_field("duration"),
        text_field("service"),
        text_field("full_name"),
        text_field("email"),
        text_field("phone"),
        int_field("created_at"),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![int_field("slot_duration"), text_field("timezone")]
}

fn weekly_hours_schema() -> Vec<FieldInfo> {
    vec![int_field("day"), text_field("open"), text_field("close")]
}

fn date_overrides_schema() -> Vec<FieldInfo> {
    vec![text_field("date"), text_field("open"), text_field("close")]
}

/// Result columns for a statement, judged from the table it names. Used to
/// answer Describe before any parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.trim_start().to_lowercase();
    let is_select = lower.starts_with("select");
    if lower.starts_with("insert") && lower.contains("appointments") {
        return appointment_schema();
    }
    if !is_select {
        return vec![];
    }
    if lower.contains("available_slots") {
        slots_schema()
    } else if lower.contains("bookable_dates") {
        bookable_schema()
    } else if lower.contains("appointments") {
        appointment_schema()
    } else if lower.contains("weekly_hours") {
        weekly_hours_schema()
    } else if lower.contains("date_overrides") {
        date_overrides_schema()
    } else if lower.contains("schedule") {
        schedule_schema()
    } else {
        vec![]
    }
}

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let data: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(data)))
}

fn appointment_rows(engine: &Engine, appointments: Vec<Appointment>) -> Response {
    let clock = *engine.clock();
    rows(appointment_schema(), appointments, move |enc, a| {
        enc.encode_field(&a.id.to_string())?;
        enc.encode_field(&clock.local_date(a.start).to_string())?;
        enc.encode_field(&clock.local_time(a.start).to_string())?;
        enc.encode_field(&clock.local_time(a.end).to_string())?;
        enc.encode_field(&i64::from(a.span().duration_minutes()))?;
        enc.encode_field(&a.service)?;
        enc.encode_field(&a.customer.full_name)?;
        enc.encode_field(&a.customer.email)?;
        enc.encode_field(&a.customer.phone)?;
        enc.encode_field(&a.created_at)
    })
}

fn encode_hours(enc: &mut DataRowEncoder, hours: &Option<Hours>) -> PgWireResult<()> {
    enc.encode_field(&hours.map(|h| h.open.to_string()))?;
    enc.encode_field(&hours.map(|h| h.close.to_string()))
}

#[async_trait]
impl SimpleQueryHandler for SalondHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let result = self.run_statement(&engine, query).await;
        self.deliver_notices(client).await?;
        result
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SalondQueryParser;

#[async_trait]
impl QueryParser for SalondQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SalondHandler {
    type Statement = String;
    type QueryParser = SalondQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let result = self.run_statement(&engine, &sql).await;
        self.deliver_notices(client).await?;
        Ok(result?.pop().unwrap_or(Response::EmptyQuery))
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SalondFactory {
    handler: Arc<SalondHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SalondAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SalondFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SalondAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SalondHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SalondFactory {
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

/// Serve one client connection until it closes. Each connection gets its own
/// handler so LISTEN state is never shared.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = SalondFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Overlap(_) => "23P01",
        EngineError::NotFound(_) => "P0002",
        EngineError::Validation(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Contention => "40001",
        EngineError::Storage(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
