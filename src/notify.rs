use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::clock::SalonClock;
use crate::model::{Appointment, Customer};

const CHANNEL_CAPACITY: usize = 256;

/// LISTEN channel that carries booking notices.
pub const NOTICE_CHANNEL: &str = "appointments";

/// The facts an email collaborator needs after a booking change. Dates and
/// times are salon-local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingNotice {
    Booked {
        id: Ulid,
        customer: Customer,
        service: String,
        date: NaiveDate,
        time: String,
    },
    Rescheduled {
        id: Ulid,
        customer: Customer,
        service: String,
        old_date: NaiveDate,
        old_time: String,
        date: NaiveDate,
        time: String,
    },
    Cancelled {
        id: Ulid,
        customer: Customer,
        service: String,
        date: NaiveDate,
        time: String,
    },
}

impl BookingNotice {
    pub fn booked(appointment: &Appointment, clock: &SalonClock) -> Self {
        BookingNotice::Booked {
            id: appointment.id,
            customer: appointment.customer.clone(),
            service: appointment.service.clone(),
            date: clock.local_date(appointment.start),
            time: clock.local_time(appointment.start).to_string(),
        }
    }

    pub fn rescheduled(before: &Appointment, after: &Appointment, clock: &SalonClock) -> Self {
        BookingNotice::Rescheduled {
            id: after.id,
            customer: after.customer.clone(),
            service: after.service.clone(),
            old_date: clock.local_date(before.start),
            old_time: clock.local_time(before.start).to_string(),
            date: clock.local_date(after.start),
            time: clock.local_time(after.start).to_string(),
        }
    }

    pub fn cancelled(appointment: &Appointment, clock: &SalonClock) -> Self {
        BookingNotice::Cancelled {
            id: appointment.id,
            customer: appointment.customer.clone(),
            service: appointment.service.clone(),
            date: clock.local_date(appointment.start),
            time: clock.local_time(appointment.start).to_string(),
        }
    }

    pub fn id(&self) -> Ulid {
        match self {
            BookingNotice::Booked { id, .. }
            | BookingNotice::Rescheduled { id, .. }
            | BookingNotice::Cancelled { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BookingNotice::Booked { .. } => "booked",
            BookingNotice::Rescheduled { .. } => "rescheduled",
            BookingNotice::Cancelled { .. } => "cancelled",
        }
    }

    pub fn to_json(&self) -> String {
        // Plain strings, ids and dates only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Per-salon broadcast of booking notices.
pub struct NotifyHub {
    sender: broadcast::Sender<BookingNotice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingNotice> {
        self.sender.subscribe()
    }

    /// No-op if nobody is listening. Never fails the caller.
    pub fn send(&self, notice: BookingNotice) {
        let _ = self.sender.send(notice);
    }
}

/// Record every notice for the salon. Runs until the hub is dropped.
pub async fn run_notice_log(tenant: String, mut rx: broadcast::Receiver<BookingNotice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => tracing::info!(
                tenant = %tenant,
                kind = notice.kind(),
                id = %notice.id(),
                payload = %notice.to_json(),
                "booking notice"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(tenant = %tenant, skipped, "notice log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
