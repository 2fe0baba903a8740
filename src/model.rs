use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> u32 {
        (self.duration_ms() / MINUTE_MS) as u32
    }

    /// The one conflict predicate: `s1 < e2 && e1 > s2`. Touching endpoints
    /// do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }
}

// ── Wall-clock time of day ───────────────────────────────────────

/// Minutes since local midnight, rendered as `HH:mm`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MINUTES_PER_DAY: u32 = 24 * 60;

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes < Self::MINUTES_PER_DAY).then_some(Self(minutes as u16))
    }

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Self::from_minutes(hour * 60 + minute)
    }

    pub fn minutes(self) -> u32 {
        self.0 as u32
    }

    pub fn hour(self) -> u32 {
        self.minutes() / 60
    }

    pub fn minute(self) -> u32 {
        self.minutes() % 60
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTime(pub String);

impl fmt::Display for InvalidTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day {:?} (expected HH:mm)", self.0)
    }
}

impl std::error::Error for InvalidTime {}

impl FromStr for TimeOfDay {
    type Err = InvalidTime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidTime(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(err());
        }
        let hour: u32 = h.parse().map_err(|_| err())?;
        let minute: u32 = m.parse().map_err(|_| err())?;
        Self::from_hm(hour, minute).ok_or_else(err)
    }
}

// ── Schedule ─────────────────────────────────────────────────────

/// Opening hours for one day. `None` in any `Option<Hours>` slot means closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hours {
    pub open: TimeOfDay,
    pub close: TimeOfDay,
}

impl Hours {
    pub fn new(open: TimeOfDay, close: TimeOfDay) -> Self {
        Self { open, close }
    }

    pub fn is_valid(&self) -> bool {
        self.open < self.close
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub slot_duration_minutes: u32,
    /// Indexed by weekday, 0 = Sunday … 6 = Saturday.
    pub weekly_hours: [Option<Hours>; 7],
    /// Salon-local date → hours, or `None` for an explicit closure.
    pub date_overrides: BTreeMap<NaiveDate, Option<Hours>>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let hm = |h: u16, m: u16| TimeOfDay(h * 60 + m);
        let weekday = Some(Hours::new(hm(9, 0), hm(18, 0)));
        Self {
            slot_duration_minutes: 60,
            weekly_hours: [
                None,
                weekday,
                weekday,
                weekday,
                weekday,
                weekday,
                Some(Hours::new(hm(10, 0), hm(16, 0))),
            ],
            date_overrides: BTreeMap::new(),
        }
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub service: String,
    pub customer: Customer,
    pub created_at: Ms,
}

impl Appointment {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// One occupied range inside a day index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySlot {
    pub id: Ulid,
    pub span: Span,
}

/// Every appointment whose start falls on one salon-local date. Bounds the
/// overlap scan to that day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayIndex {
    pub slots: Vec<DaySlot>,
}

impl DayIndex {
    /// Insert or replace the entry for `slot.id`.
    pub fn upsert(&mut self, slot: DaySlot) {
        self.remove(&slot.id);
        self.slots.push(slot);
    }

    pub fn remove(&mut self, id: &Ulid) -> Option<DaySlot> {
        let pos = self.slots.iter().position(|s| s.id == *id)?;
        Some(self.slots.swap_remove(pos))
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.slots.iter().any(|s| s.id == *id)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn spans(&self) -> Vec<Span> {
        self.slots.iter().map(|s| s.span).collect()
    }
}

// ── Store documents ──────────────────────────────────────────────

/// Document key in the transactional store. `Ord` gives the lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DocKey {
    Schedule,
    Day(NaiveDate),
    Appointment(Ulid),
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKey::Schedule => write!(f, "schedule"),
            DocKey::Day(date) => write!(f, "days/{date}"),
            DocKey::Appointment(id) => write!(f, "appointments/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Doc {
    Schedule(ScheduleConfig),
    Day(DayIndex),
    Appointment(Appointment),
}

/// A staged write: `None` deletes the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocWrite {
    pub key: DocKey,
    pub doc: Option<Doc>,
}

/// WAL record. One committed transaction = one record, so a crash can never
/// leave half a transaction on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Committed { seq: u64, writes: Vec<DocWrite> },
}
