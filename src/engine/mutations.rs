use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::{SalonClock, now_ms};
use crate::limits::*;
use crate::model::*;
use crate::notify::BookingNotice;
use crate::schedule::{SchedulePatch, apply_patch};
use crate::store::Txn;

use super::conflict::{
    booking_span, check_no_overlap, validate_customer, validate_email, validate_phone,
    validate_service,
};
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub duration_minutes: u32,
    pub service: String,
    pub customer: Customer,
}

/// Where to move an appointment. Missing parts keep their current values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescheduleTo {
    pub date: Option<NaiveDate>,
    pub start_time: Option<TimeOfDay>,
    pub duration_minutes: Option<u32>,
}

impl RescheduleTo {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.start_time.is_none() && self.duration_minutes.is_none()
    }
}

/// Service and contact changes. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailsPatch {
    pub service: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
}

impl DetailsPatch {
    pub fn is_empty(&self) -> bool {
        self.service.is_none()
            && self.full_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
    }

    /// Field checks that need no stored state. The full name is checked
    /// against the merged customer instead.
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if let Some(service) = &self.service {
            validate_service(service)?;
        }
        if let Some(Some(email)) = &self.email {
            validate_email(email)?;
        }
        if let Some(Some(phone)) = &self.phone {
            validate_phone(phone)?;
        }
        Ok(())
    }

    fn apply(&self, appointment: &mut Appointment) {
        if let Some(service) = &self.service {
            appointment.service = service.clone();
        }
        if let Some(name) = &self.full_name {
            appointment.customer.full_name = name.clone();
        }
        if let Some(email) = &self.email {
            appointment.customer.email = email.clone();
        }
        if let Some(phone) = &self.phone {
            appointment.customer.phone = phone.clone();
        }
    }
}

fn ensure_room(day: &DayIndex, id: &Ulid) -> Result<(), EngineError> {
    if !day.contains(id) && day.slots.len() >= MAX_APPOINTMENTS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many appointments on one day"));
    }
    Ok(())
}

/// Re-place `current` in the day indexes per `to` and return its new range.
/// Reads both days before writing either.
fn move_in_index(
    txn: &mut Txn<'_>,
    clock: &SalonClock,
    current: &Appointment,
    to: RescheduleTo,
) -> Result<Span, EngineError> {
    let id = current.id;
    let old_date = clock.local_date(current.start);
    let new_date = to.date.unwrap_or(old_date);
    let start_time = to
        .start_time
        .unwrap_or_else(|| clock.local_time(current.start));
    let duration = to
        .duration_minutes
        .unwrap_or_else(|| current.span().duration_minutes());
    let span = booking_span(clock, new_date, start_time, duration)?;

    let mut new_day = txn.read_day(new_date)?;
    let old_day = if old_date != new_date {
        Some(txn.read_day(old_date)?)
    } else {
        None
    };

    check_no_overlap(&new_day, &span, Some(id))?;
    ensure_room(&new_day, &id)?;
    new_day.upsert(DaySlot { id, span });
    txn.put_day(new_date, new_day);
    if let Some(mut old_day) = old_day {
        old_day.remove(&id);
        txn.put_day(old_date, old_day);
    }
    Ok(span)
}

impl Engine {
    /// Book `[start, start + duration)` on `request.date`. Fails with
    /// `Overlap` if anything already on that day intersects the range.
    pub async fn create_appointment(
        &self,
        request: BookingRequest,
    ) -> Result<Appointment, EngineError> {
        validate_service(&request.service)?;
        validate_customer(&request.customer)?;
        let span = booking_span(
            &self.clock,
            request.date,
            request.start_time,
            request.duration_minutes,
        )?;

        let appointment = Appointment {
            id: Ulid::new(),
            start: span.start,
            end: span.end,
            service: request.service,
            customer: request.customer,
            created_at: now_ms(),
        };
        let date = request.date;

        let created = self
            .run_txn("create", |txn| {
                let mut day = txn.read_day(date)?;
                check_no_overlap(&day, &span, None)?;
                ensure_room(&day, &appointment.id)?;
                day.upsert(DaySlot { id: appointment.id, span });
                txn.put_appointment(appointment.clone());
                txn.put_day(date, day);
                Ok(appointment.clone())
            })
            .await?;

        metrics::counter!(crate::observability::APPOINTMENTS_BOOKED_TOTAL).increment(1);
        tracing::info!(id = %created.id, %date, start = %request.start_time, "appointment booked");
        self.notify.send(BookingNotice::booked(&created, &self.clock));
        Ok(created)
    }

    /// Move an appointment, possibly to another date. Its own current range
    /// never counts as a conflict. Returns `(before, after)`.
    pub async fn reschedule_appointment(
        &self,
        id: Ulid,
        to: RescheduleTo,
    ) -> Result<(Appointment, Appointment), EngineError> {
        self.update_appointment(id, to, DetailsPatch::default()).await
    }

    /// Move an appointment and patch its details in one transaction. The
    /// patch is validated before anything is read, so a bad field leaves
    /// the appointment exactly as it was. Returns `(before, after)`.
    pub async fn update_appointment(
        &self,
        id: Ulid,
        to: RescheduleTo,
        patch: DetailsPatch,
    ) -> Result<(Appointment, Appointment), EngineError> {
        patch.validate()?;
        let clock = self.clock;
        let op = if to.is_empty() { "update_details" } else { "reschedule" };
        let (before, after) = self
            .run_txn(op, |txn| {
                let current = txn.read_appointment(id)?.ok_or(EngineError::NotFound(id))?;
                let mut updated = current.clone();
                if !to.is_empty() {
                    let span = move_in_index(txn, &clock, &current, to)?;
                    updated.start = span.start;
                    updated.end = span.end;
                }
                patch.apply(&mut updated);
                validate_customer(&updated.customer)?;
                txn.put_appointment(updated.clone());
                Ok((current, updated))
            })
            .await?;

        if !to.is_empty() {
            tracing::info!(
                %id,
                from = %clock.local_date(before.start),
                to = %clock.local_date(after.start),
                "appointment rescheduled"
            );
            self.notify
                .send(BookingNotice::rescheduled(&before, &after, &clock));
        }
        if !patch.is_empty() {
            tracing::info!(%id, "appointment details updated");
        }
        Ok((before, after))
    }

    /// Delete the appointment and its day-index entry. Returns what was removed.
    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let clock = self.clock;
        let cancelled = self
            .run_txn("cancel", |txn| {
                let appointment = txn.read_appointment(id)?.ok_or(EngineError::NotFound(id))?;
                let date = clock.local_date(appointment.start);
                let mut day = txn.read_day(date)?;
                day.remove(&id);
                txn.delete(DocKey::Appointment(id));
                txn.put_day(date, day);
                Ok(appointment)
            })
            .await?;

        metrics::counter!(crate::observability::APPOINTMENTS_CANCELLED_TOTAL).increment(1);
        tracing::info!(%id, "appointment cancelled");
        self.notify.send(BookingNotice::cancelled(&cancelled, &clock));
        Ok(cancelled)
    }

    /// Change service or contact details. Timing is untouched, so there is
    /// nothing to re-check against the day index.
    pub async fn update_details(
        &self,
        id: Ulid,
        patch: DetailsPatch,
    ) -> Result<Appointment, EngineError> {
        let (_, updated) = self
            .update_appointment(id, RescheduleTo::default(), patch)
            .await?;
        Ok(updated)
    }

    /// Apply a schedule patch atomically. Existing appointments are never
    /// touched; only future availability changes.
    pub async fn update_schedule(
        &self,
        patch: &SchedulePatch,
    ) -> Result<ScheduleConfig, EngineError> {
        if patch.is_empty() {
            return Ok(self.get_schedule());
        }
        let config = self
            .run_txn("update_schedule", |txn| {
                let current = txn.read_schedule()?.unwrap_or_default();
                let updated = apply_patch(current, patch)?;
                txn.put_schedule(updated.clone());
                Ok(updated)
            })
            .await?;
        tracing::info!(
            slot_duration = config.slot_duration_minutes,
            overrides = config.date_overrides.len(),
            "schedule updated"
        );
        Ok(config)
    }
}
