use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{DocStore, StoreError};

/// An optimistic transaction. Reads record the version they saw; writes are
/// buffered until `DocStore::commit`.
pub struct Txn<'a> {
    store: &'a DocStore,
    reads: HashMap<DocKey, u64>,
    writes: Vec<DocWrite>,
}

impl<'a> Txn<'a> {
    pub(super) fn new(store: &'a DocStore) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            writes: Vec::new(),
        }
    }

    pub(super) fn into_parts(self) -> (HashMap<DocKey, u64>, Vec<DocWrite>) {
        (self.reads, self.writes)
    }

    pub fn read(&mut self, key: DocKey) -> Result<Option<Doc>, StoreError> {
        if !self.writes.is_empty() {
            return Err(StoreError::ReadAfterWrite(key));
        }
        let (version, doc) = self.store.read_versioned(&key);
        // The first read pins the version that commit validates against.
        self.reads.entry(key).or_insert(version);
        Ok(doc)
    }

    /// An absent day reads as an empty index.
    pub fn read_day(&mut self, date: NaiveDate) -> Result<DayIndex, StoreError> {
        let key = DocKey::Day(date);
        match self.read(key)? {
            Some(Doc::Day(day)) => Ok(day),
            None => Ok(DayIndex::default()),
            Some(_) => Err(StoreError::Corrupt(key)),
        }
    }

    pub fn read_appointment(&mut self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        let key = DocKey::Appointment(id);
        match self.read(key)? {
            Some(Doc::Appointment(a)) => Ok(Some(a)),
            None => Ok(None),
            Some(_) => Err(StoreError::Corrupt(key)),
        }
    }

    pub fn read_schedule(&mut self) -> Result<Option<ScheduleConfig>, StoreError> {
        match self.read(DocKey::Schedule)? {
            Some(Doc::Schedule(cfg)) => Ok(Some(cfg)),
            None => Ok(None),
            Some(_) => Err(StoreError::Corrupt(DocKey::Schedule)),
        }
    }

    fn stage(&mut self, key: DocKey, doc: Option<Doc>) {
        self.writes.retain(|w| w.key != key);
        self.writes.push(DocWrite { key, doc });
    }

    pub fn put(&mut self, key: DocKey, doc: Doc) {
        self.stage(key, Some(doc));
    }

    pub fn delete(&mut self, key: DocKey) {
        self.stage(key, None);
    }

    /// Store `day`, or drop the document once it holds no slots.
    pub fn put_day(&mut self, date: NaiveDate, day: DayIndex) {
        if day.is_empty() {
            self.delete(DocKey::Day(date));
        } else {
            self.put(DocKey::Day(date), Doc::Day(day));
        }
    }

    pub fn put_appointment(&mut self, appointment: Appointment) {
        self.put(DocKey::Appointment(appointment.id), Doc::Appointment(appointment));
    }

    pub fn put_schedule(&mut self, config: ScheduleConfig) {
        self.put(DocKey::Schedule, Doc::Schedule(config));
    }
}
