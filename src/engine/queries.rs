use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::now_ms;
use crate::model::*;

use super::availability::{available_slots, is_date_bookable};
use super::conflict::{validate_date, validate_duration};
use super::{Engine, EngineError};

impl Engine {
    /// The stored schedule, or the default salon week if none was saved.
    pub fn get_schedule(&self) -> ScheduleConfig {
        self.store.read_schedule().unwrap_or_default()
    }

    pub fn get_available_slots(
        &self,
        date: NaiveDate,
        duration_minutes: Option<u32>,
    ) -> Result<Vec<TimeOfDay>, EngineError> {
        self.available_slots_at(date, duration_minutes, now_ms())
    }

    pub fn is_date_bookable(
        &self,
        date: NaiveDate,
        duration_minutes: Option<u32>,
    ) -> Result<bool, EngineError> {
        self.date_bookable_at(date, duration_minutes, now_ms())
    }

    /// Reads outside any transaction: may miss a booking that commits
    /// concurrently. `create_appointment` catches that.
    pub fn available_slots_at(
        &self,
        date: NaiveDate,
        duration_minutes: Option<u32>,
        now: Ms,
    ) -> Result<Vec<TimeOfDay>, EngineError> {
        let (config, occupied, duration) = self.availability_inputs(date, duration_minutes)?;
        Ok(available_slots(&config, date, &occupied, duration, self.clock(), now))
    }

    pub fn date_bookable_at(
        &self,
        date: NaiveDate,
        duration_minutes: Option<u32>,
        now: Ms,
    ) -> Result<bool, EngineError> {
        let (config, occupied, duration) = self.availability_inputs(date, duration_minutes)?;
        Ok(is_date_bookable(&config, date, &occupied, duration, self.clock(), now))
    }

    fn availability_inputs(
        &self,
        date: NaiveDate,
        duration_minutes: Option<u32>,
    ) -> Result<(ScheduleConfig, Vec<Span>, u32), EngineError> {
        validate_date(date)?;
        let config = self.get_schedule();
        let duration = duration_minutes.unwrap_or(config.slot_duration_minutes);
        validate_duration(duration)?;
        let occupied = self
            .store
            .read_day_index(date)
            .map(|day| day.spans())
            .unwrap_or_default();
        Ok((config, occupied, duration))
    }

    pub fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.store
            .read_appointment(id)
            .ok_or(EngineError::NotFound(id))
    }

    /// Appointments ordered by start, optionally only those on one date.
    pub fn list_appointments(&self, date: Option<NaiveDate>) -> Vec<Appointment> {
        let mut appointments = match date {
            Some(date) => self
                .store
                .read_day_index(date)
                .map(|day| {
                    day.slots
                        .iter()
                        .filter_map(|slot| self.store.read_appointment(slot.id))
                        .collect()
                })
                .unwrap_or_default(),
            None => self.store.appointments(),
        };
        appointments.sort_by_key(|a| (a.start, a.id));
        appointments
    }
}
