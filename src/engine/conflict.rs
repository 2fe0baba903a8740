use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use ulid::Ulid;

use crate::clock::SalonClock;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[\d\s\-()]{10,20}$").expect("valid phone regex"));
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// First slot in `day` that overlaps `span`, skipping `ignore` (the
/// appointment being rescheduled).
pub(crate) fn check_no_overlap(
    day: &DayIndex,
    span: &Span,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    match day
        .slots
        .iter()
        .find(|slot| Some(slot.id) != ignore && slot.span.overlaps(span))
    {
        Some(slot) => Err(EngineError::Overlap(slot.id)),
        None => Ok(()),
    }
}

pub(crate) fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&date.year()) {
        return Err(EngineError::Validation(format!(
            "date {date} outside {MIN_YEAR}-{MAX_YEAR}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_duration(minutes: u32) -> Result<(), EngineError> {
    if minutes == 0 || minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::Validation(format!(
            "duration must be 1-{MAX_DURATION_MINUTES} minutes, got {minutes}"
        )));
    }
    Ok(())
}

/// Validate date and duration, then place the range on the salon clock.
/// The range must end by the next local midnight: a booking is only ever
/// indexed under its start date.
pub(crate) fn booking_span(
    clock: &SalonClock,
    date: NaiveDate,
    start_time: TimeOfDay,
    duration_minutes: u32,
) -> Result<Span, EngineError> {
    validate_date(date)?;
    validate_duration(duration_minutes)?;
    let span = clock
        .span(date, start_time, duration_minutes)
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "{date} {start_time} does not exist in {}",
                clock.timezone()
            ))
        })?;
    if clock.local_date(span.end - 1) != date {
        return Err(EngineError::Validation(format!(
            "{date} {start_time} + {duration_minutes} min runs past midnight"
        )));
    }
    Ok(span)
}

pub(crate) fn validate_service(service: &str) -> Result<(), EngineError> {
    if service.chars().count() > MAX_SERVICE_LEN {
        return Err(EngineError::Validation(format!(
            "service must be at most {MAX_SERVICE_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_full_name(name: &str) -> Result<(), EngineError> {
    let len = name.trim().chars().count();
    if !(MIN_FULL_NAME_LEN..=MAX_FULL_NAME_LEN).contains(&len) {
        return Err(EngineError::Validation(format!(
            "full name must be {MIN_FULL_NAME_LEN}-{MAX_FULL_NAME_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), EngineError> {
    if email.len() > MAX_EMAIL_LEN || !EMAIL_RE.is_match(email) {
        return Err(EngineError::Validation(format!("invalid email address {email:?}")));
    }
    Ok(())
}

pub(crate) fn validate_phone(phone: &str) -> Result<(), EngineError> {
    if !PHONE_RE.is_match(phone) {
        return Err(EngineError::Validation(format!(
            "invalid phone number {phone:?} (use international format, e.g. +1 234 567 8900)"
        )));
    }
    Ok(())
}

pub(crate) fn validate_customer(customer: &Customer) -> Result<(), EngineError> {
    validate_full_name(&customer.full_name)?;
    if let Some(email) = &customer.email {
        validate_email(email)?;
    }
    if let Some(phone) = &customer.phone {
        validate_phone(phone)?;
    }
    Ok(())
}
