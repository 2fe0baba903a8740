use chrono::{DateTime, Datelike, LocalResult, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::{Ms, Span, TimeOfDay, MINUTE_MS};

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
}

/// 0 = Sunday … 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> usize {
    date.weekday().num_days_from_sunday() as usize
}

/// The salon's time zone. Instants are stored as UTC milliseconds; this is
/// only used to turn local `(date, HH:mm)` pairs into instants and to decide
/// which calendar date an instant belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SalonClock {
    tz: Tz,
}

impl Default for SalonClock {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl SalonClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Local wall time → UTC instant. `None` when the wall time does not
    /// exist (skipped by a DST jump); an ambiguous time resolves to the
    /// earlier instant.
    pub fn instant(&self, date: NaiveDate, time: TimeOfDay) -> Option<Ms> {
        let naive = date.and_hms_opt(time.hour(), time.minute(), 0)?;
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt.timestamp_millis()),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp_millis()),
            LocalResult::None => None,
        }
    }

    /// `[instant(date, time), + duration)`.
    pub fn span(&self, date: NaiveDate, time: TimeOfDay, duration_minutes: u32) -> Option<Span> {
        if duration_minutes == 0 {
            return None;
        }
        let start = self.instant(date, time)?;
        Some(Span::new(start, start + duration_minutes as Ms * MINUTE_MS))
    }

    fn local(&self, ms: Ms) -> DateTime<Tz> {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .unwrap_or_default()
            .with_timezone(&self.tz)
    }

    pub fn local_date(&self, ms: Ms) -> NaiveDate {
        self.local(ms).date_naive()
    }

    pub fn local_time(&self, ms: Ms) -> TimeOfDay {
        let local = self.local(ms);
        TimeOfDay::from_hm(local.hour(), local.minute()).unwrap_or_default()
    }

    pub fn today(&self, now: Ms) -> NaiveDate {
        self.local_date(now)
    }
}
