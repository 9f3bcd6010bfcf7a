//! Wall-clock readings in a fixed named timezone.
//!
//! Bulletin identifiers are derived from the time as it reads on a clock in
//! the broadcaster's zone, so everything goes through the IANA database via
//! `chrono-tz`.  No offsets are hardcoded; NZST/NZDT switches fall out of the
//! zone rules.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Zone the bulletin services publish in.
pub const BULLETIN_ZONE: Tz = chrono_tz::Pacific::Auckland;

/// Source of "now".  Production code uses [`SystemClock`]; tests pin the
/// instant with [`FixedClock`].
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Calendar/clock fields as they read in a given zone at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockReading {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl ClockReading {
    fn from_naive(dt: NaiveDateTime) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
        }
    }

    fn to_naive(self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?
            .and_hms_opt(self.hour, self.minute, self.second)
    }

    /// Step the reading back by whole hours using plain calendar arithmetic,
    /// borrowing across day, month and year boundaries.
    pub fn minus_hours(self, hours: u32) -> Self {
        match self.to_naive() {
            Some(dt) => Self::from_naive(dt - Duration::hours(i64::from(hours))),
            None => self,
        }
    }

    /// Two-digit 24-hour field, as used in bulletin labels.
    pub fn hour_label(&self) -> String {
        format!("{:02}", self.hour)
    }
}

/// Project `instant` onto the wall clock of `zone`.
pub fn reading_at(instant: DateTime<Utc>, zone: Tz) -> ClockReading {
    ClockReading::from_naive(instant.with_timezone(&zone).naive_local())
}

/// Wall-clock reading for the current instant in `zone`.
pub fn now_in_zone(zone: Tz) -> ClockReading {
    reading_at(Utc::now(), zone)
}

/// Parse an IANA zone name, falling back to [`BULLETIN_ZONE`].
pub fn parse_zone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(e) => {
            tracing::warn!("unknown timezone '{}' ({}), using {}", name, e, BULLETIN_ZONE);
            BULLETIN_ZONE
        }
    }
}
