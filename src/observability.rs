use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "salond_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "salond_query_duration_seconds";

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: appointments created.
pub const APPOINTMENTS_BOOKED_TOTAL: &str = "salond_appointments_booked_total";

/// Counter: appointments cancelled.
pub const APPOINTMENTS_CANCELLED_TOTAL: &str = "salond_appointments_cancelled_total";

/// Counter: commits that lost a race and were retried or given up. Labels: op.
pub const TXN_CONFLICTS_TOTAL: &str = "salond_txn_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "salond_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "salond_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "salond_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "salond_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "salond_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "salond_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const COMPACTIONS_TOTAL: &str = "salond_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectAvailableSlots { .. } => "select_available_slots",
        Command::SelectBookableDate { .. } => "select_bookable_date",
        Command::SelectAppointments(_) => "select_appointments",
        Command::InsertAppointment(_) => "insert_appointment",
        Command::UpdateAppointment { .. } => "update_appointment",
        Command::DeleteAppointment { .. } => "delete_appointment",
        Command::SelectSchedule => "select_schedule",
        Command::SelectWeeklyHours => "select_weekly_hours",
        Command::SelectDateOverrides => "select_date_overrides",
        Command::UpdateSchedule(_) => "update_schedule",
        Command::Listen { .. } => "listen",
        Command::Unlisten { channel: Some(_) } => "unlisten",
        Command::Unlisten { channel: None } => "unlisten_all",
    }
}
