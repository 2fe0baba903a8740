//! Business hours: weekly pattern, per-date overrides, slot granularity.
//! Pure data and derivations, no I/O.

use chrono::NaiveDate;

use crate::clock::weekday_index;
use crate::limits::*;
use crate::model::{Hours, ScheduleConfig, TimeOfDay};

/// Hours in effect on `date`. An override wins, including an explicit
/// closed override; otherwise the weekday's hours; otherwise closed.
pub fn effective_hours(config: &ScheduleConfig, date: NaiveDate) -> Option<Hours> {
    if let Some(over) = config.date_overrides.get(&date) {
        return *over;
    }
    config.weekly_hours.get(weekday_index(date)).copied().flatten()
}

/// Start times from `open`, stepping by `slot_duration_minutes`, while the
/// slot still ends by `close`. Malformed hours or a zero step give nothing.
pub fn candidate_slots(hours: Hours, slot_duration_minutes: u32) -> Vec<TimeOfDay> {
    let mut slots = Vec::new();
    if slot_duration_minutes == 0 || !hours.is_valid() {
        return slots;
    }
    let close = hours.close.minutes();
    let mut current = hours.open.minutes();
    while current + slot_duration_minutes <= close {
        if let Some(t) = TimeOfDay::from_minutes(current) {
            slots.push(t);
        }
        current += slot_duration_minutes;
    }
    slots
}

/// Candidate slots for a calendar date under `config`.
pub fn slots_for_date(config: &ScheduleConfig, date: NaiveDate) -> Vec<TimeOfDay> {
    match effective_hours(config, date) {
        Some(hours) => candidate_slots(hours, config.slot_duration_minutes),
        None => Vec::new(),
    }
}

// ── Admin operations ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideChange {
    /// Custom hours, or `None` to close the date.
    Set(Option<Hours>),
    /// Drop the override; the date reverts to its weekly hours.
    Remove,
}

/// A partial schedule update. Fields left empty are untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePatch {
    pub slot_duration_minutes: Option<u32>,
    pub weekly_hours: Vec<(u8, Option<Hours>)>,
    pub date_overrides: Vec<(NaiveDate, OverrideChange)>,
}

impl SchedulePatch {
    pub fn is_empty(&self) -> bool {
        self.slot_duration_minutes.is_none()
            && self.weekly_hours.is_empty()
            && self.date_overrides.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    InvalidWeekday(u8),
    InvalidHours(Hours),
    InvalidSlotDuration(u32),
    TooManyOverrides,
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::InvalidWeekday(d) => write!(f, "weekday must be 0-6, got {d}"),
            ScheduleError::InvalidHours(h) => {
                write!(f, "opening time {} must be before closing time {}", h.open, h.close)
            }
            ScheduleError::InvalidSlotDuration(m) => write!(
                f,
                "slot duration must be 1-{MAX_SLOT_DURATION_MINUTES} minutes, got {m}"
            ),
            ScheduleError::TooManyOverrides => {
                write!(f, "too many date overrides (max {MAX_DATE_OVERRIDES})")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

fn check_hours(hours: Option<Hours>) -> Result<(), ScheduleError> {
    match hours {
        Some(h) if !h.is_valid() => Err(ScheduleError::InvalidHours(h)),
        _ => Ok(()),
    }
}

pub fn set_weekly_hours(
    mut config: ScheduleConfig,
    weekday: u8,
    hours: Option<Hours>,
) -> Result<ScheduleConfig, ScheduleError> {
    check_hours(hours)?;
    let slot = config
        .weekly_hours
        .get_mut(weekday as usize)
        .ok_or(ScheduleError::InvalidWeekday(weekday))?;
    *slot = hours;
    Ok(config)
}

/// Only future availability changes; booked appointments keep their spans.
pub fn set_slot_duration(
    mut config: ScheduleConfig,
    minutes: u32,
) -> Result<ScheduleConfig, ScheduleError> {
    if minutes == 0 || minutes > MAX_SLOT_DURATION_MINUTES {
        return Err(ScheduleError::InvalidSlotDuration(minutes));
    }
    config.slot_duration_minutes = minutes;
    Ok(config)
}

pub fn set_date_override(
    mut config: ScheduleConfig,
    date: NaiveDate,
    change: OverrideChange,
) -> Result<ScheduleConfig, ScheduleError> {
    match change {
        OverrideChange::Remove => {
            config.date_overrides.remove(&date);
        }
        OverrideChange::Set(hours) => {
            check_hours(hours)?;
            if !config.date_overrides.contains_key(&date)
                && config.date_overrides.len() >= MAX_DATE_OVERRIDES
            {
                return Err(ScheduleError::TooManyOverrides);
            }
            config.date_overrides.insert(date, hours);
        }
    }
    Ok(config)
}

/// Apply every part of `patch` in order. All-or-nothing: the first invalid
/// part fails the whole patch and `config` is not returned modified.
pub fn apply_patch(
    config: ScheduleConfig,
    patch: &SchedulePatch,
) -> Result<ScheduleConfig, ScheduleError> {
    let mut config = config;
    if let Some(minutes) = patch.slot_duration_minutes {
        config = set_slot_duration(config, minutes)?;
    }
    for &(day, hours) in &patch.weekly_hours {
        config = set_weekly_hours(config, day, hours)?;
    }
    for &(date, change) in &patch.date_overrides {
        config = set_date_override(config, date, change)?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_date;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn hours(open: &str, close: &str) -> Hours {
        Hours::new(t(open), t(close))
    }

    fn render(slots: &[TimeOfDay]) -> Vec<String> {
        slots.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn candidate_slots_hourly() {
        let slots = candidate_slots(hours("09:00", "18:00"), 60);
        assert_eq!(
            render(&slots),
            vec!["09:00", "10:00", "11:00", "12:00", "13:00", "14:00", "15:00", "16:00", "17:00"]
        );
    }

    #[test]
    fn candidate_slots_last_slot_must_fit() {
        let slots = candidate_slots(hours("09:00", "10:45"), 30);
        assert_eq!(render(&slots), vec!["09:00", "09:30", "10:00"]);
    }

    #[test]
    fn candidate_slots_malformed_is_empty() {
        assert!(candidate_slots(hours("18:00", "09:00"), 60).is_empty());
        assert!(candidate_slots(hours("09:00", "09:00"), 60).is_empty());
        assert!(candidate_slots(hours("09:00", "18:00"), 0).is_empty());
        assert!(candidate_slots(hours("09:00", "09:30"), 60).is_empty());
    }

    #[test]
    fn effective_hours_weekly_fallback() {
        let cfg = ScheduleConfig::default();
        assert_eq!(effective_hours(&cfg, d("2025-01-06")), Some(hours("09:00", "18:00")));
        assert_eq!(effective_hours(&cfg, d("2025-01-05")), None); // Sunday
        assert_eq!(effective_hours(&cfg, d("2025-01-11")), Some(hours("10:00", "16:00")));
    }

    #[test]
    fn effective_hours_override_wins() {
        let cfg = ScheduleConfig::default();
        let cfg = set_date_override(cfg, d("2025-01-08"), OverrideChange::Set(None)).unwrap();
        let cfg = set_date_override(cfg, d("2025-01-05"), OverrideChange::Set(Some(hours("12:00", "14:00"))))
            .unwrap();
        assert_eq!(effective_hours(&cfg, d("2025-01-08")), None);
        assert_eq!(effective_hours(&cfg, d("2025-01-05")), Some(hours("12:00", "14:00")));
        assert_eq!(render(&slots_for_date(&cfg, d("2025-01-05"))), vec!["12:00", "13:00"]);
    }

    #[test]
    fn removing_override_reverts_to_weekly() {
        let cfg = ScheduleConfig::default();
        let cfg = set_date_override(cfg, d("2025-01-08"), OverrideChange::Set(None)).unwrap();
        let cfg = set_date_override(cfg, d("2025-01-08"), OverrideChange::Remove).unwrap();
        assert_eq!(effective_hours(&cfg, d("2025-01-08")), Some(hours("09:00", "18:00")));
        assert!(cfg.date_overrides.is_empty());
    }

    #[test]
    fn weekly_hours_validation() {
        let cfg = ScheduleConfig::default();
        assert_eq!(
            set_weekly_hours(cfg.clone(), 7, None),
            Err(ScheduleError::InvalidWeekday(7))
        );
        assert!(matches!(
            set_weekly_hours(cfg.clone(), 1, Some(hours("18:00", "09:00"))),
            Err(ScheduleError::InvalidHours(_))
        ));
        let cfg = set_weekly_hours(cfg, 0, Some(hours("10:00", "14:00"))).unwrap();
        assert_eq!(cfg.weekly_hours[0], Some(hours("10:00", "14:00")));
    }

    #[test]
    fn slot_duration_validation() {
        let cfg = ScheduleConfig::default();
        assert!(set_slot_duration(cfg.clone(), 0).is_err());
        assert!(set_slot_duration(cfg.clone(), MAX_SLOT_DURATION_MINUTES + 1).is_err());
        assert_eq!(set_slot_duration(cfg, 30).unwrap().slot_duration_minutes, 30);
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let cfg = ScheduleConfig::default();
        let patch = SchedulePatch {
            slot_duration_minutes: Some(30),
            weekly_hours: vec![(9, None)],
            date_overrides: vec![],
        };
        assert!(apply_patch(cfg.clone(), &patch).is_err());

        let patch = SchedulePatch {
            slot_duration_minutes: Some(30),
            weekly_hours: vec![(0, Some(hours("10:00", "12:00")))],
            date_overrides: vec![(d("2025-12-25"), OverrideChange::Set(None))],
        };
        let updated = apply_patch(cfg, &patch).unwrap();
        assert_eq!(updated.slot_duration_minutes, 30);
        assert_eq!(updated.weekly_hours[0], Some(hours("10:00", "12:00")));
        assert_eq!(updated.date_overrides.get(&d("2025-12-25")), Some(&None));
    }
}
