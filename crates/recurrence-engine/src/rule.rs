//! Recurrence rules -- the decoded form of an RFC 5545 RRULE value.
//!
//! A [`RecurrenceRule`] is plain data: frequency, interval, termination and
//! the BY* constraint parts. It is validated once when built, so the expander
//! never meets an invalid combination while streaming. Expansion lives in
//! [`crate::expander`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{RecurrenceError, Result};
use crate::temporal::Temporal;

/// The FREQ rule part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Secondly => "SECONDLY",
            Frequency::Minutely => "MINUTELY",
            Frequency::Hourly => "HOURLY",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }

    /// True for frequencies finer than a day.
    pub fn is_sub_daily(&self) -> bool {
        matches!(
            self,
            Frequency::Secondly | Frequency::Minutely | Frequency::Hourly
        )
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SECONDLY" => Ok(Frequency::Secondly),
            "MINUTELY" => Ok(Frequency::Minutely),
            "HOURLY" => Ok(Frequency::Hourly),
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            other => Err(RecurrenceError::InvalidRule(format!(
                "unknown frequency '{other}'"
            ))),
        }
    }
}

/// One BYDAY entry: a weekday, optionally with an ordinal (`2TU`, `-1FR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByWeekday {
    Any(Weekday),
    Numbered { nth: i8, weekday: Weekday },
}

impl ByWeekday {
    pub fn weekday(&self) -> Weekday {
        match self {
            ByWeekday::Any(wd) | ByWeekday::Numbered { weekday: wd, .. } => *wd,
        }
    }

    pub fn nth(&self) -> Option<i8> {
        match self {
            ByWeekday::Any(_) => None,
            ByWeekday::Numbered { nth, .. } => Some(*nth),
        }
    }

    fn sort_key(&self) -> (i8, u32) {
        (
            self.nth().unwrap_or(i8::MIN),
            self.weekday().num_days_from_monday(),
        )
    }
}

impl PartialOrd for ByWeekday {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByWeekday {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Display for ByWeekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByWeekday::Any(wd) => f.write_str(weekday_code(*wd)),
            ByWeekday::Numbered { nth, weekday } => write!(f, "{nth}{}", weekday_code(*weekday)),
        }
    }
}

impl FromStr for ByWeekday {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || RecurrenceError::InvalidRule(format!("invalid BYDAY value '{s}'"));
        if s.len() < 2 || !s.is_char_boundary(s.len() - 2) {
            return Err(invalid());
        }
        let (ordinal, code) = s.split_at(s.len() - 2);
        let weekday = parse_weekday(code).ok_or_else(invalid)?;
        if ordinal.is_empty() {
            return Ok(ByWeekday::Any(weekday));
        }
        let nth: i8 = ordinal
            .strip_prefix('+')
            .unwrap_or(ordinal)
            .parse()
            .map_err(|_| invalid())?;
        Ok(ByWeekday::Numbered { nth, weekday })
    }
}

/// Two-letter iCalendar weekday code.
pub fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

pub fn parse_weekday(code: &str) -> Option<Weekday> {
    match code.to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

/// How a rule ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Termination {
    #[default]
    Never,
    /// Exactly this many occurrences, counted from the series start.
    Count(u32),
    /// No occurrence after this value (inclusive bound).
    Until(Temporal),
}

/// A validated RFC 5545 recurrence rule.
///
/// BY* lists are stored sorted and deduplicated. Rules have value semantics:
/// edits produce modified copies via [`RecurrenceRule::with_termination`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecurrenceRule {
    freq: Frequency,
    interval: u32,
    termination: Termination,
    week_start: Weekday,
    by_month: Vec<u32>,
    by_week_no: Vec<i32>,
    by_year_day: Vec<i32>,
    by_month_day: Vec<i32>,
    by_day: Vec<ByWeekday>,
    by_hour: Vec<u32>,
    by_minute: Vec<u32>,
    by_second: Vec<u32>,
    by_set_pos: Vec<i32>,
}

impl RecurrenceRule {
    /// Start building a rule. Frequency is the only required part.
    pub fn builder(freq: Frequency) -> RecurrenceRuleBuilder {
        RecurrenceRuleBuilder::new(freq)
    }

    pub fn freq(&self) -> Frequency {
        self.freq
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn termination(&self) -> &Termination {
        &self.termination
    }

    pub fn count(&self) -> Option<u32> {
        match self.termination {
            Termination::Count(n) => Some(n),
            _ => None,
        }
    }

    pub fn until(&self) -> Option<&Temporal> {
        match &self.termination {
            Termination::Until(t) => Some(t),
            _ => None,
        }
    }

    pub fn week_start(&self) -> Weekday {
        self.week_start
    }

    pub fn by_month(&self) -> &[u32] {
        &self.by_month
    }

    pub fn by_week_no(&self) -> &[i32] {
        &self.by_week_no
    }

    pub fn by_year_day(&self) -> &[i32] {
        &self.by_year_day
    }

    pub fn by_month_day(&self) -> &[i32] {
        &self.by_month_day
    }

    pub fn by_day(&self) -> &[ByWeekday] {
        &self.by_day
    }

    pub fn by_hour(&self) -> &[u32] {
        &self.by_hour
    }

    pub fn by_minute(&self) -> &[u32] {
        &self.by_minute
    }

    pub fn by_second(&self) -> &[u32] {
        &self.by_second
    }

    pub fn by_set_pos(&self) -> &[i32] {
        &self.by_set_pos
    }

    /// True when any BYHOUR/BYMINUTE/BYSECOND part is present.
    pub fn has_time_parts(&self) -> bool {
        !self.by_hour.is_empty() || !self.by_minute.is_empty() || !self.by_second.is_empty()
    }

    /// A copy of this rule with a different termination.
    ///
    /// # Errors
    /// Returns `RecurrenceError::Configuration` for `Count(0)`.
    pub fn with_termination(&self, termination: Termination) -> Result<RecurrenceRule> {
        if termination == Termination::Count(0) {
            return Err(RecurrenceError::Configuration(
                "COUNT must be at least 1".to_string(),
            ));
        }
        Ok(RecurrenceRule {
            termination,
            ..self.clone()
        })
    }

    /// A builder pre-filled with every part of this rule.
    pub fn to_builder(&self) -> RecurrenceRuleBuilder {
        let (count, until) = match self.termination {
            Termination::Never => (None, None),
            Termination::Count(n) => (Some(i64::from(n)), None),
            Termination::Until(t) => (None, Some(t)),
        };
        RecurrenceRuleBuilder {
            freq: self.freq,
            interval: i64::from(self.interval),
            count,
            until,
            week_start: self.week_start,
            by_month: self.by_month.iter().map(|&v| v as i32).collect(),
            by_week_no: self.by_week_no.clone(),
            by_year_day: self.by_year_day.clone(),
            by_month_day: self.by_month_day.clone(),
            by_day: self.by_day.clone(),
            by_hour: self.by_hour.iter().map(|&v| v as i32).collect(),
            by_minute: self.by_minute.iter().map(|&v| v as i32).collect(),
            by_second: self.by_second.iter().map(|&v| v as i32).collect(),
            by_set_pos: self.by_set_pos.clone(),
        }
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: fmt::Display>(values: &[T]) -> String {
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",")
        }

        write!(f, "FREQ={}", self.freq)?;
        if self.interval != 1 {
            write!(f, ";INTERVAL={}", self.interval)?;
        }
        match &self.termination {
            Termination::Never => {}
            Termination::Count(n) => write!(f, ";COUNT={n}")?,
            // Zoned UNTIL values are always written in UTC.
            Termination::Until(Temporal::Zoned(dt)) => {
                write!(f, ";UNTIL={}", Temporal::Zoned(dt.with_timezone(&Tz::UTC)))?
            }
            Termination::Until(t) => write!(f, ";UNTIL={t}")?,
        }
        let parts: [(&str, String); 9] = [
            ("BYSECOND", join(&self.by_second)),
            ("BYMINUTE", join(&self.by_minute)),
            ("BYHOUR", join(&self.by_hour)),
            ("BYDAY", join(&self.by_day)),
            ("BYMONTHDAY", join(&self.by_month_day)),
            ("BYYEARDAY", join(&self.by_year_day)),
            ("BYWEEKNO", join(&self.by_week_no)),
            ("BYMONTH", join(&self.by_month)),
            ("BYSETPOS", join(&self.by_set_pos)),
        ];
        for (name, value) in parts {
            if !value.is_empty() {
                write!(f, ";{name}={value}")?;
            }
        }
        if self.week_start != Weekday::Mon {
            write!(f, ";WKST={}", weekday_code(self.week_start))?;
        }
        Ok(())
    }
}

impl FromStr for RecurrenceRule {
    type Err = RecurrenceError;

    /// Parse an RRULE value such as `FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE,FR`.
    /// A leading `RRULE:` is accepted.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix("RRULE:").unwrap_or(s);
        if s.is_empty() {
            return Err(RecurrenceError::InvalidRule("empty RRULE string".to_string()));
        }

        let mut parts = Vec::new();
        for part in s.split(';').filter(|p| !p.trim().is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                RecurrenceError::InvalidRule(format!("'{part}' is not NAME=VALUE"))
            })?;
            let name = name.trim().to_ascii_uppercase();
            if parts.iter().any(|(seen, _): &(String, &str)| *seen == name) {
                return Err(RecurrenceError::InvalidRule(format!("duplicate {name} part")));
            }
            parts.push((name, value.trim()));
        }

        let freq = parts
            .iter()
            .find(|(name, _)| name == "FREQ")
            .map(|(_, value)| value.parse::<Frequency>())
            .transpose()?
            .ok_or_else(|| RecurrenceError::InvalidRule("missing FREQ part".to_string()))?;

        let mut builder = RecurrenceRule::builder(freq);
        for (name, value) in parts {
            builder = match name.as_str() {
                "FREQ" => builder,
                "INTERVAL" => builder.interval(parse_number(&name, value)?),
                "COUNT" => builder.count(parse_number(&name, value)?),
                "UNTIL" => builder.until(value.parse()?),
                "WKST" => builder.week_start(parse_weekday(value).ok_or_else(|| {
                    RecurrenceError::InvalidRule(format!("invalid WKST value '{value}'"))
                })?),
                "BYSECOND" => builder.by_second(parse_list(&name, value)?),
                "BYMINUTE" => builder.by_minute(parse_list(&name, value)?),
                "BYHOUR" => builder.by_hour(parse_list(&name, value)?),
                "BYDAY" => builder.by_day(
                    value
                        .split(',')
                        .map(str::parse)
                        .collect::<Result<Vec<ByWeekday>>>()?,
                ),
                "BYMONTHDAY" => builder.by_month_day(parse_list(&name, value)?),
                "BYYEARDAY" => builder.by_year_day(parse_list(&name, value)?),
                "BYWEEKNO" => builder.by_week_no(parse_list(&name, value)?),
                "BYMONTH" => builder.by_month(parse_list(&name, value)?),
                "BYSETPOS" => builder.by_set_pos(parse_list(&name, value)?),
                other => {
                    return Err(RecurrenceError::InvalidRule(format!(
                        "unsupported rule part '{other}'"
                    )))
                }
            };
        }
        builder.build()
    }
}

fn parse_number(name: &str, value: &str) -> Result<i64> {
    value
        .trim()
        .strip_prefix('+')
        .unwrap_or(value.trim())
        .parse()
        .map_err(|_| RecurrenceError::InvalidRule(format!("{name} value '{value}' is not a number")))
}

fn parse_list(name: &str, value: &str) -> Result<Vec<i32>> {
    value
        .split(',')
        .map(|v| parse_number(name, v))
        .map(|n| {
            n.and_then(|n| {
                i32::try_from(n).map_err(|_| {
                    RecurrenceError::InvalidRule(format!("{name} value {n} is out of range"))
                })
            })
        })
        .collect()
}

/// Builder for a validated [`RecurrenceRule`].
///
/// Values are taken as wide integers and range-checked in [`build`](Self::build),
/// so every invalid combination surfaces as a `Configuration` error there.
#[derive(Debug, Clone)]
pub struct RecurrenceRuleBuilder {
    freq: Frequency,
    interval: i64,
    count: Option<i64>,
    until: Option<Temporal>,
    week_start: Weekday,
    by_month: Vec<i32>,
    by_week_no: Vec<i32>,
    by_year_day: Vec<i32>,
    by_month_day: Vec<i32>,
    by_day: Vec<ByWeekday>,
    by_hour: Vec<i32>,
    by_minute: Vec<i32>,
    by_second: Vec<i32>,
    by_set_pos: Vec<i32>,
}

impl RecurrenceRuleBuilder {
    fn new(freq: Frequency) -> Self {
        RecurrenceRuleBuilder {
            freq,
            interval: 1,
            count: None,
            until: None,
            week_start: Weekday::Mon,
            by_month: vec![],
            by_week_no: vec![],
            by_year_day: vec![],
            by_month_day: vec![],
            by_day: vec![],
            by_hour: vec![],
            by_minute: vec![],
            by_second: vec![],
            by_set_pos: vec![],
        }
    }

    pub fn interval(mut self, interval: i64) -> Self {
        self.interval = interval;
        self
    }

    pub fn count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn until(mut self, until: Temporal) -> Self {
        self.until = Some(until);
        self
    }

    /// Remove any COUNT or UNTIL part.
    pub fn forever(mut self) -> Self {
        self.count = None;
        self.until = None;
        self
    }

    pub fn week_start(mut self, weekday: Weekday) -> Self {
        self.week_start = weekday;
        self
    }

    pub fn by_month(mut self, months: impl IntoIterator<Item = i32>) -> Self {
        self.by_month.extend(months);
        self
    }

    pub fn by_week_no(mut self, weeks: impl IntoIterator<Item = i32>) -> Self {
        self.by_week_no.extend(weeks);
        self
    }

    pub fn by_year_day(mut self, days: impl IntoIterator<Item = i32>) -> Self {
        self.by_year_day.extend(days);
        self
    }

    pub fn by_month_day(mut self, days: impl IntoIterator<Item = i32>) -> Self {
        self.by_month_day.extend(days);
        self
    }

    pub fn by_day(mut self, days: impl IntoIterator<Item = ByWeekday>) -> Self {
        self.by_day.extend(days);
        self
    }

    /// Shorthand for BYDAY entries without ordinals.
    pub fn on_weekdays(self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.by_day(days.into_iter().map(ByWeekday::Any))
    }

    pub fn by_hour(mut self, hours: impl IntoIterator<Item = i32>) -> Self {
        self.by_hour.extend(hours);
        self
    }

    pub fn by_minute(mut self, minutes: impl IntoIterator<Item = i32>) -> Self {
        self.by_minute.extend(minutes);
        self
    }

    pub fn by_second(mut self, seconds: impl IntoIterator<Item = i32>) -> Self {
        self.by_second.extend(seconds);
        self
    }

    pub fn by_set_pos(mut self, positions: impl IntoIterator<Item = i32>) -> Self {
        self.by_set_pos.extend(positions);
        self
    }

    /// Validate and build the rule.
    ///
    /// # Errors
    /// Returns `RecurrenceError::Configuration` for a non-positive interval or
    /// count, both COUNT and UNTIL, out-of-range BY* values, or BY* parts that
    /// RFC 5545 forbids at the chosen frequency.
    pub fn build(self) -> Result<RecurrenceRule> {
        fn config(message: String) -> RecurrenceError {
            RecurrenceError::Configuration(message)
        }
        fn check<T: Copy + fmt::Display>(
            name: &str,
            values: &[T],
            valid: impl Fn(T) -> bool,
            range: &str,
        ) -> Result<()> {
            match values.iter().find(|v| !valid(**v)) {
                Some(v) => Err(config(format!(
                    "invalid {name} value {v} (values must be in range {range})"
                ))),
                None => Ok(()),
            }
        }
        fn sorted<T: Ord + Clone>(values: &[T]) -> Vec<T> {
            let mut values = values.to_vec();
            values.sort();
            values.dedup();
            values
        }
        fn unsigned(values: &[i32]) -> Vec<u32> {
            sorted(values).into_iter().map(|v| v.unsigned_abs()).collect()
        }

        let freq = self.freq;
        let interval = u32::try_from(self.interval)
            .ok()
            .filter(|i| *i >= 1)
            .ok_or_else(|| config(format!("INTERVAL must be a positive integer, got {}", self.interval)))?;

        let termination = match (self.count, self.until) {
            (Some(_), Some(_)) => {
                return Err(config("COUNT and UNTIL cannot both be set".to_string()))
            }
            (Some(n), None) => Termination::Count(
                u32::try_from(n)
                    .ok()
                    .filter(|n| *n >= 1)
                    .ok_or_else(|| config(format!("COUNT must be a positive integer, got {n}")))?,
            ),
            (None, Some(t)) => Termination::Until(t),
            (None, None) => Termination::Never,
        };

        let signed = |limit: i32| move |v: i32| (1..=limit).contains(&v.abs());
        check("BYMONTH", &self.by_month, |v| (1..=12).contains(&v), "1..=12")?;
        check("BYWEEKNO", &self.by_week_no, signed(53), "1..=53 or -53..=-1")?;
        check("BYYEARDAY", &self.by_year_day, signed(366), "1..=366 or -366..=-1")?;
        check("BYMONTHDAY", &self.by_month_day, signed(31), "1..=31 or -31..=-1")?;
        check("BYHOUR", &self.by_hour, |v| (0..=23).contains(&v), "0..=23")?;
        check("BYMINUTE", &self.by_minute, |v| (0..=59).contains(&v), "0..=59")?;
        check("BYSECOND", &self.by_second, |v| (0..=59).contains(&v), "0..=59")?;
        check("BYSETPOS", &self.by_set_pos, signed(366), "1..=366 or -366..=-1")?;

        for day in &self.by_day {
            let Some(nth) = day.nth() else { continue };
            if !matches!(freq, Frequency::Yearly | Frequency::Monthly) {
                return Err(config(format!(
                    "numbered weekday {day} is only allowed at YEARLY or MONTHLY frequency"
                )));
            }
            if freq == Frequency::Yearly && !self.by_week_no.is_empty() {
                return Err(config(format!(
                    "numbered weekday {day} cannot be combined with BYWEEKNO"
                )));
            }
            let limit = if freq == Frequency::Yearly && self.by_month.is_empty() {
                53
            } else {
                5
            };
            if !(1..=limit).contains(&i32::from(nth).abs()) {
                return Err(config(format!(
                    "invalid BYDAY value {day} (ordinal must be in range 1..={limit} or -{limit}..=-1)"
                )));
            }
        }

        if !self.by_week_no.is_empty() && freq != Frequency::Yearly {
            return Err(config(format!("BYWEEKNO cannot be used with FREQ={freq}")));
        }
        if !self.by_year_day.is_empty()
            && matches!(freq, Frequency::Monthly | Frequency::Weekly | Frequency::Daily)
        {
            return Err(config(format!("BYYEARDAY cannot be used with FREQ={freq}")));
        }
        if !self.by_month_day.is_empty() && freq == Frequency::Weekly {
            return Err(config("BYMONTHDAY cannot be used with FREQ=WEEKLY".to_string()));
        }
        if !self.by_set_pos.is_empty()
            && self.by_month.is_empty()
            && self.by_week_no.is_empty()
            && self.by_year_day.is_empty()
            && self.by_month_day.is_empty()
            && self.by_day.is_empty()
            && self.by_hour.is_empty()
            && self.by_minute.is_empty()
            && self.by_second.is_empty()
        {
            return Err(config(
                "BYSETPOS requires at least one other BY* part".to_string(),
            ));
        }

        Ok(RecurrenceRule {
            freq,
            interval,
            termination,
            week_start: self.week_start,
            by_month: unsigned(&self.by_month),
            by_week_no: sorted(&self.by_week_no),
            by_year_day: sorted(&self.by_year_day),
            by_month_day: sorted(&self.by_month_day),
            by_day: sorted(&self.by_day),
            by_hour: unsigned(&self.by_hour),
            by_minute: unsigned(&self.by_minute),
            by_second: unsigned(&self.by_second),
            by_set_pos: sorted(&self.by_set_pos),
        })
    }
}
