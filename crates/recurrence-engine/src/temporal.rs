//! Temporal values -- the three kinds of DTSTART/RDATE/EXDATE/UNTIL value.
//!
//! iCalendar distinguishes DATE values, "floating" local DATE-TIME values and
//! DATE-TIME values bound to a timezone (including UTC). A recurring series
//! stores all its values in one kind; [`Temporal::compare`] refuses to compare
//! across kinds instead of guessing a conversion.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{RecurrenceError, Result};

/// The kind of a [`Temporal`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TemporalKind {
    /// Calendar date with no time of day (`VALUE=DATE`).
    Date,
    /// Date and time of day with no zone ("floating" time).
    Local,
    /// Date and time of day in an IANA timezone or UTC.
    Zoned,
}

impl fmt::Display for TemporalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TemporalKind::Date => "date",
            TemporalKind::Local => "local date-time",
            TemporalKind::Zoned => "zoned date-time",
        };
        f.write_str(name)
    }
}

/// A DATE, floating DATE-TIME or zoned DATE-TIME value.
///
/// The derived `Ord` orders by kind first and is only meaningful inside one
/// kind; it exists so homogeneous values can live in ordered collections.
/// Zoned values compare and hash by absolute instant, so the same instant
/// written in two zones is one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Temporal {
    Date(NaiveDate),
    Local(NaiveDateTime),
    Zoned(DateTime<Tz>),
}

impl Temporal {
    pub fn kind(&self) -> TemporalKind {
        match self {
            Temporal::Date(_) => TemporalKind::Date,
            Temporal::Local(_) => TemporalKind::Local,
            Temporal::Zoned(_) => TemporalKind::Zoned,
        }
    }

    pub fn same_kind(&self, other: &Temporal) -> bool {
        self.kind() == other.kind()
    }

    /// Fails with `TypeMismatch` unless this value is of the `expected` kind.
    pub fn ensure_kind(&self, expected: TemporalKind) -> Result<()> {
        if self.kind() == expected {
            Ok(())
        } else {
            Err(RecurrenceError::TypeMismatch {
                expected,
                found: self.kind(),
            })
        }
    }

    /// Compare two values of the same kind.
    ///
    /// Dates compare by calendar day, local date-times by wall clock and zoned
    /// date-times by instant.
    ///
    /// # Errors
    /// Returns `RecurrenceError::TypeMismatch` when the kinds differ.
    pub fn compare(&self, other: &Temporal) -> Result<Ordering> {
        other.ensure_kind(self.kind())?;
        Ok(self.cmp(other))
    }

    pub fn is_before(&self, other: &Temporal) -> Result<bool> {
        Ok(self.compare(other)? == Ordering::Less)
    }

    pub fn is_after(&self, other: &Temporal) -> Result<bool> {
        Ok(self.compare(other)? == Ordering::Greater)
    }

    /// Shift by `days` calendar days, keeping the time of day.
    ///
    /// Zoned values keep their wall-clock time; a result that lands in a DST
    /// gap falls back to adding exact 24-hour days.
    pub fn shift_days(&self, days: i64) -> Result<Temporal> {
        let delta = Duration::try_days(days)
            .ok_or_else(|| RecurrenceError::InvalidTemporal(format!("{days} days is out of range")))?;
        let shifted = match self {
            Temporal::Date(d) => d.checked_add_signed(delta).map(Temporal::Date),
            Temporal::Local(dt) => dt.checked_add_signed(delta).map(Temporal::Local),
            Temporal::Zoned(dt) => dt
                .naive_local()
                .checked_add_signed(delta)
                .and_then(|civil| self.with_civil(civil))
                .or_else(|| dt.checked_add_signed(delta).map(Temporal::Zoned)),
        };
        shifted.ok_or_else(|| {
            RecurrenceError::InvalidTemporal(format!("{self} shifted by {days} days is out of range"))
        })
    }

    /// The latest value strictly before this one at iCalendar resolution:
    /// the previous day for dates, one second earlier otherwise.
    pub fn step_back(&self) -> Result<Temporal> {
        let stepped = match self {
            Temporal::Date(d) => d.pred_opt().map(Temporal::Date),
            Temporal::Local(dt) => dt.checked_sub_signed(Duration::seconds(1)).map(Temporal::Local),
            Temporal::Zoned(dt) => dt.checked_sub_signed(Duration::seconds(1)).map(Temporal::Zoned),
        };
        stepped.ok_or_else(|| RecurrenceError::InvalidTemporal(format!("no value precedes {self}")))
    }

    /// Add an elapsed duration. Dates advance by whole days of the duration.
    pub fn plus_duration(&self, duration: Duration) -> Result<Temporal> {
        let moved = match self {
            Temporal::Date(d) => d
                .checked_add_signed(Duration::days(duration.num_days()))
                .map(Temporal::Date),
            Temporal::Local(dt) => dt.checked_add_signed(duration).map(Temporal::Local),
            Temporal::Zoned(dt) => dt.checked_add_signed(duration).map(Temporal::Zoned),
        };
        moved.ok_or_else(|| RecurrenceError::InvalidTemporal(format!("{self} plus {duration} is out of range")))
    }

    /// Subtract an elapsed duration. Dates move back by whole days.
    pub fn minus_duration(&self, duration: Duration) -> Result<Temporal> {
        self.plus_duration(-duration)
    }

    /// The zone of a zoned value.
    pub fn timezone(&self) -> Option<Tz> {
        match self {
            Temporal::Zoned(dt) => Some(dt.timezone()),
            _ => None,
        }
    }

    /// Wall-clock projection used by the rule expander. Dates sit at midnight.
    pub(crate) fn civil(&self) -> NaiveDateTime {
        match self {
            Temporal::Date(d) => d.and_time(chrono::NaiveTime::MIN),
            Temporal::Local(dt) => *dt,
            Temporal::Zoned(dt) => dt.naive_local(),
        }
    }

    /// Wall-clock projection of this value as seen from `reference`'s zone.
    pub(crate) fn civil_in(&self, reference: &Temporal) -> NaiveDateTime {
        match (self, reference) {
            (Temporal::Zoned(dt), Temporal::Zoned(r)) => dt.with_timezone(&r.timezone()).naive_local(),
            _ => self.civil(),
        }
    }

    /// Build a value of this value's kind (and zone) from a wall-clock time.
    ///
    /// Returns `None` for wall-clock times that do not exist in the zone.
    /// Ambiguous times resolve to the earlier offset.
    pub(crate) fn with_civil(&self, civil: NaiveDateTime) -> Option<Temporal> {
        match self {
            Temporal::Date(_) => Some(Temporal::Date(civil.date())),
            Temporal::Local(_) => Some(Temporal::Local(civil)),
            Temporal::Zoned(dt) => dt
                .timezone()
                .from_local_datetime(&civil)
                .earliest()
                .map(Temporal::Zoned),
        }
    }

    /// Parse an iCalendar value, optionally with the `TZID` parameter that
    /// accompanied it on the content line.
    ///
    /// Accepts `20151109`, `20151109T100000`, `20151109T100000Z` and the same
    /// forms with ISO punctuation (`2015-11-09T10:00:00`).
    pub fn parse_with_tzid(value: &str, tzid: Option<&str>) -> Result<Temporal> {
        let compact: String = value
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != ':')
            .collect();
        let (body, utc) = match compact.strip_suffix(['Z', 'z']) {
            Some(body) => (body, true),
            None => (compact.as_str(), false),
        };

        if !body.contains(['T', 't']) {
            if utc || tzid.is_some() {
                return Err(RecurrenceError::InvalidTemporal(format!(
                    "date value '{value}' cannot carry a timezone"
                )));
            }
            let date = NaiveDate::parse_from_str(body, "%Y%m%d")
                .map_err(|e| RecurrenceError::InvalidTemporal(format!("'{value}': {e}")))?;
            return Ok(Temporal::Date(date));
        }

        let body = body.replace('t', "T");
        let naive = NaiveDateTime::parse_from_str(&body, "%Y%m%dT%H%M%S")
            .or_else(|_| NaiveDateTime::parse_from_str(&body, "%Y%m%dT%H%M"))
            .map_err(|e| RecurrenceError::InvalidTemporal(format!("'{value}': {e}")))?;

        match (utc, tzid) {
            (true, Some(id)) => Err(RecurrenceError::InvalidTemporal(format!(
                "'{value}' is UTC but also names TZID={id}"
            ))),
            (true, None) => Ok(Temporal::Zoned(Tz::UTC.from_utc_datetime(&naive))),
            (false, Some(id)) => {
                let tz: Tz = id
                    .parse()
                    .map_err(|_| RecurrenceError::InvalidTimezone(id.to_string()))?;
                tz.from_local_datetime(&naive)
                    .earliest()
                    .map(Temporal::Zoned)
                    .ok_or_else(|| {
                        RecurrenceError::InvalidTemporal(format!("'{value}' does not exist in {id}"))
                    })
            }
            (false, None) => Ok(Temporal::Local(naive)),
        }
    }
}

impl fmt::Display for Temporal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Temporal::Date(d) => write!(f, "{}", d.format("%Y%m%d")),
            Temporal::Local(dt) => write!(f, "{}", dt.format("%Y%m%dT%H%M%S")),
            Temporal::Zoned(dt) if dt.timezone() == Tz::UTC => {
                write!(f, "{}", dt.naive_utc().format("%Y%m%dT%H%M%SZ"))
            }
            Temporal::Zoned(dt) => write!(
                f,
                "TZID={}:{}",
                dt.timezone().name(),
                dt.naive_local().format("%Y%m%dT%H%M%S")
            ),
        }
    }
}

impl FromStr for Temporal {
    type Err = RecurrenceError;

    /// Parses the [`Display`](fmt::Display) form, including the
    /// `TZID=<zone>:<value>` prefix for zoned values.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.strip_prefix("TZID=") {
            Some(rest) => {
                let (tzid, value) = rest.split_once(':').ok_or_else(|| {
                    RecurrenceError::InvalidTemporal(format!("'{s}' is missing ':' after TZID"))
                })?;
                Temporal::parse_with_tzid(value, Some(tzid))
            }
            None => Temporal::parse_with_tzid(s, None),
        }
    }
}

impl TryFrom<String> for Temporal {
    type Error = RecurrenceError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Temporal> for String {
    fn from(value: Temporal) -> Self {
        value.to_string()
    }
}

impl From<NaiveDate> for Temporal {
    fn from(value: NaiveDate) -> Self {
        Temporal::Date(value)
    }
}

impl From<NaiveDateTime> for Temporal {
    fn from(value: NaiveDateTime) -> Self {
        Temporal::Local(value)
    }
}

impl From<DateTime<Tz>> for Temporal {
    fn from(value: DateTime<Tz>) -> Self {
        Temporal::Zoned(value)
    }
}
