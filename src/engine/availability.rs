use chrono::NaiveDate;

use crate::clock::SalonClock;
use crate::model::*;
use crate::schedule::slots_for_date;

// ── Availability ─────────────────────────────────────────────────

/// Bookable start times on `date`: candidate slots from the schedule whose
/// `[start, start + duration)` is clear of every `occupied` range and has
/// not already ended at `now`.
///
/// Candidates step by the schedule's slot duration; `duration_minutes` only
/// sizes the overlap window. `occupied` is expected to be the date's day
/// index, so it is never re-filtered by date here.
pub fn available_slots(
    config: &ScheduleConfig,
    date: NaiveDate,
    occupied: &[Span],
    duration_minutes: u32,
    clock: &SalonClock,
    now: Ms,
) -> Vec<TimeOfDay> {
    slots_for_date(config, date)
        .into_iter()
        .filter(|&start| {
            // A wall time lost to a DST jump can't be booked.
            let Some(window) = clock.span(date, start, duration_minutes) else {
                return false;
            };
            window.end > now && !occupied.iter().any(|busy| busy.overlaps(&window))
        })
        .collect()
}

/// Advisory: `Create` re-checks overlap on its own.
pub fn is_date_bookable(
    config: &ScheduleConfig,
    date: NaiveDate,
    occupied: &[Span],
    duration_minutes: u32,
    clock: &SalonClock,
    now: Ms,
) -> bool {
    !available_slots(config, date, occupied, duration_minutes, clock, now).is_empty()
}
