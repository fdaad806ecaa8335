//! RRULE expansion -- lazily turns a [`RecurrenceRule`] and a start value into
//! an ascending stream of occurrences.
//!
//! Expansion walks the rule's periods (a year, a month, a week, ...). Period
//! `k` starts at `start + k * interval` in wall-clock terms, so month-end and
//! leap-day anchors never drift. Each period is expanded with the BY* parts
//! into a candidate set, the candidates are realized in the start value's
//! zone, BYSETPOS is applied, and the survivors are queued for emission.
//!
//! Iteration can begin mid-stream from a [`ReentryPoint`]: the expander jumps
//! straight to the period containing the point, which is what makes the
//! window cache in [`crate::cache`] pay off.

use std::collections::VecDeque;

use chrono::{
    Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday,
};

use crate::cache::ReentryPoint;
use crate::error::{RecurrenceError, Result};
use crate::recurrence_set::RecurrenceSet;
use crate::rule::{ByWeekday, Frequency, RecurrenceRule};
use crate::temporal::{Temporal, TemporalKind};

/// Latest year the expander produces values for.
const MAX_YEAR: i32 = 9999;

impl RecurrenceRule {
    /// Lazily expand this rule from `start`.
    ///
    /// The first period is the one containing `start`; values before `start`
    /// are never produced. `start` itself is only produced when the rule
    /// matches it.
    ///
    /// # Errors
    /// Returns `RecurrenceError::TypeMismatch` when UNTIL is of a different
    /// kind than `start`, and `RecurrenceError::Configuration` when a date
    /// start is combined with a sub-daily frequency or BYHOUR/BYMINUTE/BYSECOND.
    pub fn occurrences(&self, start: &Temporal) -> Result<RuleIter<'_>> {
        check_start(self, start)?;
        Ok(RuleIter::new(self, *start, 0, *start, 0, None))
    }

    /// Lazily expand this rule, yielding only occurrences at or after `from`.
    ///
    /// Without COUNT the expander jumps directly to the period containing
    /// `from`. With COUNT it walks from `start` so occurrences before `from`
    /// are still counted against the limit.
    pub fn occurrences_from(&self, start: &Temporal, from: &Temporal) -> Result<RuleIter<'_>> {
        check_start(self, start)?;
        from.ensure_kind(start.kind())?;
        if from <= start {
            return Ok(RuleIter::new(self, *start, 0, *start, 0, None));
        }
        if self.count().is_some() {
            return Ok(RuleIter::new(self, *start, 0, *start, 0, Some(*from)));
        }
        let period = period_containing(self, &start.civil(), &from.civil_in(start));
        Ok(RuleIter::new(self, *start, period, *from, 0, None))
    }

    /// Resume expansion at a known occurrence.
    ///
    /// `point.instant` must be an occurrence of this rule from `start` and
    /// `point.ordinal` its zero-based index; the iterator yields `point.instant`
    /// first and keeps counting from `point.ordinal`.
    pub fn resume(&self, start: &Temporal, point: &ReentryPoint) -> Result<RuleIter<'_>> {
        check_start(self, start)?;
        point.instant.ensure_kind(start.kind())?;
        if point.instant <= *start {
            return Ok(RuleIter::new(self, *start, 0, *start, 0, None));
        }
        let period = period_containing(self, &start.civil(), &point.instant.civil_in(start));
        Ok(RuleIter::new(
            self,
            *start,
            period,
            point.instant,
            point.ordinal,
            None,
        ))
    }
}

/// Checks that `rule` can be expanded from `start`.
pub(crate) fn check_start(rule: &RecurrenceRule, start: &Temporal) -> Result<()> {
    if let Some(until) = rule.until() {
        until.ensure_kind(start.kind())?;
    }
    if start.kind() == TemporalKind::Date && (rule.freq().is_sub_daily() || rule.has_time_parts()) {
        return Err(RecurrenceError::Configuration(format!(
            "a date start cannot be combined with FREQ={} or BYHOUR/BYMINUTE/BYSECOND",
            rule.freq()
        )));
    }
    Ok(())
}

/// Expand an RRULE string with RDATE additions and EXDATE exclusions.
///
/// # Arguments
/// - `rrule` -- RFC 5545 RRULE value (e.g., "FREQ=WEEKLY;BYDAY=TU,TH")
/// - `dtstart` -- start value (e.g., "20260217T140000" or "TZID=Europe/Berlin:20260217T140000")
/// - `rdates` -- additional occurrences, same kind as `dtstart`
/// - `exdates` -- occurrences to remove, same kind as `dtstart`
/// - `from` -- optional lower bound (inclusive)
/// - `limit` -- maximum number of values returned
///
/// # Errors
/// Returns `RecurrenceError::InvalidRule` for an unparseable RRULE,
/// `RecurrenceError::InvalidTemporal`/`InvalidTimezone` for unparseable
/// values and `RecurrenceError::TypeMismatch` when value kinds are mixed.
pub fn expand_rrule(
    rrule: &str,
    dtstart: &str,
    rdates: &[&str],
    exdates: &[&str],
    from: Option<&str>,
    limit: usize,
) -> Result<Vec<Temporal>> {
    let start: Temporal = dtstart.parse()?;
    let mut set = RecurrenceSet::new(start);
    set.set_rule(Some(rrule.parse()?))?;
    for rdate in rdates {
        set.add_addition(rdate.parse()?)?;
    }
    for exdate in exdates {
        set.add_exclusion(exdate.parse()?)?;
    }
    let from: Option<Temporal> = from.map(str::parse).transpose()?;
    Ok(set.occurrences_uncached(from.as_ref())?.take(limit).collect())
}

/// Lazy iterator over the occurrences of a single rule.
///
/// Yields values in strictly ascending order. The iterator is fused.
#[derive(Debug, Clone)]
pub struct RuleIter<'r> {
    rule: &'r RecurrenceRule,
    start: Temporal,
    anchor: NaiveDateTime,
    until: Option<NaiveDateTime>,
    /// Values below this are dropped without being counted.
    floor: Temporal,
    /// Values below this are counted against COUNT but not yielded.
    skip_before: Option<Temporal>,
    period: u64,
    /// First period of the current run of periods without candidates.
    barren_from: u64,
    pending: VecDeque<Temporal>,
    emitted: u64,
    last: Option<Temporal>,
    finished: bool,
}

impl<'r> RuleIter<'r> {
    fn new(
        rule: &'r RecurrenceRule,
        start: Temporal,
        period: u64,
        floor: Temporal,
        emitted: u64,
        skip_before: Option<Temporal>,
    ) -> Self {
        let floor = if floor < start { start } else { floor };
        RuleIter {
            rule,
            anchor: start.civil(),
            until: rule.until().map(|u| u.civil_in(&start)),
            start,
            floor,
            skip_before,
            period,
            barren_from: period,
            pending: VecDeque::new(),
            emitted,
            last: None,
            finished: false,
        }
    }

    /// Number of rule occurrences consumed so far, counted from the series
    /// start. After yielding a value this is that value's ordinal plus one.
    pub fn consumed(&self) -> u64 {
        self.emitted
    }

    pub fn rule(&self) -> &RecurrenceRule {
        self.rule
    }

    pub fn start(&self) -> &Temporal {
        &self.start
    }

    fn finish(&mut self) {
        self.finished = true;
        self.pending.clear();
    }

    /// Expand periods until one produces at least one value or the rule ends.
    fn fill(&mut self) {
        while self.pending.is_empty() && !self.finished {
            let k = self.period;
            if k.saturating_sub(self.barren_from) >= repeat_periods(self.rule) {
                // A whole calendar cycle went by without a candidate, so
                // every later period is empty too.
                tracing::debug!(rule = %self.rule, "rule can never match, ending expansion");
                self.finish();
                return;
            }
            let cur = match period_start(self.rule, &self.anchor, k) {
                PeriodStart::OutOfRange => {
                    self.finish();
                    return;
                }
                PeriodStart::Skipped => {
                    self.advance_to(k.saturating_add(1));
                    continue;
                }
                PeriodStart::Valid(cur) => cur,
            };

            if let Some(until) = self.until {
                // One day of slack keeps DST folds from ending the stream early.
                let floor = period_floor(self.rule, cur);
                if floor > until + Duration::days(1) {
                    self.finish();
                    return;
                }
            }

            let mut candidates = CandidateSet::new();
            let expander = Expander {
                rule: self.rule,
                anchor: self.anchor,
                cur,
            };
            expander.expand(&mut candidates);
            if !candidates.civil.is_empty() {
                self.barren_from = k.saturating_add(1);
            }

            let mut realized: Vec<Temporal> = candidates
                .civil
                .iter()
                .filter_map(|civil| self.start.with_civil(*civil))
                .collect();
            realized.sort();
            realized.dedup();
            if !self.rule.by_set_pos().is_empty() {
                let len = realized.len();
                realized = realized
                    .into_iter()
                    .enumerate()
                    .filter(|(position, _)| satisfies_by_set_pos(self.rule, *position, len))
                    .map(|(_, value)| value)
                    .collect();
            }
            let floor = self.floor;
            self.pending.extend(realized.into_iter().filter(|v| *v >= floor));

            let next = expander.next_period(k);
            self.advance_to(next);
        }
    }

    fn advance_to(&mut self, period: u64) {
        if period <= self.period {
            self.finish();
        } else {
            self.period = period;
        }
    }
}

impl Iterator for RuleIter<'_> {
    type Item = Temporal;

    fn next(&mut self) -> Option<Temporal> {
        loop {
            if let Some(count) = self.rule.count() {
                if self.emitted >= u64::from(count) {
                    self.finish();
                    return None;
                }
            }
            let Some(candidate) = self.pending.pop_front() else {
                if self.finished {
                    return None;
                }
                self.fill();
                continue;
            };
            if let Some(until) = self.rule.until() {
                if candidate > *until {
                    self.finish();
                    return None;
                }
            }
            if self.last.is_some_and(|last| candidate <= last) {
                continue;
            }
            self.last = Some(candidate);
            self.emitted += 1;
            if self.skip_before.is_some_and(|skip| candidate < skip) {
                continue;
            }
            return Some(candidate);
        }
    }
}

impl std::iter::FusedIterator for RuleIter<'_> {}

enum PeriodStart {
    Valid(NaiveDateTime),
    /// The period's anchor day does not exist (Feb 29 in a common year, the
    /// 31st in a short month) and nothing else chooses the day.
    Skipped,
    OutOfRange,
}

fn period_start(rule: &RecurrenceRule, anchor: &NaiveDateTime, k: u64) -> PeriodStart {
    let Some(steps) = k.checked_mul(u64::from(rule.interval())) else {
        return PeriodStart::OutOfRange;
    };
    let next = match rule.freq() {
        Frequency::Yearly | Frequency::Monthly => {
            let months = if rule.freq() == Frequency::Yearly {
                steps.checked_mul(12)
            } else {
                Some(steps)
            };
            let Some(months) = months.and_then(|m| u32::try_from(m).ok()) else {
                return PeriodStart::OutOfRange;
            };
            let Some(next) = anchor.checked_add_months(Months::new(months)) else {
                return PeriodStart::OutOfRange;
            };
            if next.day() != anchor.day() && !chooses_day(rule) {
                return if next.year() > MAX_YEAR {
                    PeriodStart::OutOfRange
                } else {
                    PeriodStart::Skipped
                };
            }
            Some(next)
        }
        freq => i64::try_from(steps)
            .ok()
            .and_then(|steps| steps.checked_mul(fixed_step_seconds(freq)))
            .and_then(Duration::try_seconds)
            .and_then(|delta| anchor.checked_add_signed(delta)),
    };
    match next {
        Some(next) if next.year() <= MAX_YEAR => PeriodStart::Valid(next),
        _ => PeriodStart::OutOfRange,
    }
}

/// True when some BY* part picks the day, so a clamped period start is still
/// a usable base for expansion.
fn chooses_day(rule: &RecurrenceRule) -> bool {
    match rule.freq() {
        Frequency::Yearly => {
            !rule.by_month().is_empty()
                || !rule.by_week_no().is_empty()
                || !rule.by_year_day().is_empty()
                || !rule.by_month_day().is_empty()
                || !rule.by_day().is_empty()
        }
        Frequency::Monthly => !rule.by_day().is_empty() || !rule.by_month_day().is_empty(),
        _ => true,
    }
}

/// Number of periods after which the wall-clock pattern of a rule repeats.
///
/// The Gregorian calendar repeats every 400 years, which is a whole number
/// of months, weeks, days and smaller units.
fn repeat_periods(rule: &RecurrenceRule) -> u64 {
    const DAYS: u64 = 146_097;
    let units = match rule.freq() {
        Frequency::Yearly => 400,
        Frequency::Monthly => 4_800,
        Frequency::Weekly => DAYS / 7,
        Frequency::Daily => DAYS,
        Frequency::Hourly => DAYS * 24,
        Frequency::Minutely => DAYS * 1_440,
        Frequency::Secondly => DAYS * 86_400,
    };
    units / gcd(units, u64::from(rule.interval()))
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Length in seconds of one step of a fixed-length frequency.
fn fixed_step_seconds(freq: Frequency) -> i64 {
    match freq {
        Frequency::Weekly => 7 * 86_400,
        Frequency::Daily => 86_400,
        Frequency::Hourly => 3_600,
        Frequency::Minutely => 60,
        Frequency::Secondly => 1,
        Frequency::Yearly | Frequency::Monthly => 0,
    }
}

/// Earliest wall-clock value a period starting at `cur` can produce.
fn period_floor(rule: &RecurrenceRule, cur: NaiveDateTime) -> NaiveDateTime {
    let date = cur.date();
    match rule.freq() {
        Frequency::Yearly => NaiveDate::from_ymd_opt(date.year(), 1, 1)
            .unwrap_or(date)
            .and_time(NaiveTime::MIN),
        Frequency::Monthly => date.with_day(1).unwrap_or(date).and_time(NaiveTime::MIN),
        Frequency::Weekly => week_start_of(date, rule.week_start())
            .unwrap_or(date)
            .and_time(NaiveTime::MIN),
        Frequency::Daily => date.and_time(NaiveTime::MIN),
        Frequency::Hourly => truncate(cur, 3_600),
        Frequency::Minutely => truncate(cur, 60),
        Frequency::Secondly => cur,
    }
}

fn truncate(dt: NaiveDateTime, unit_seconds: u32) -> NaiveDateTime {
    let seconds = dt.num_seconds_from_midnight();
    let kept = seconds - seconds % unit_seconds;
    dt.date().and_time(NaiveTime::MIN) + Duration::seconds(i64::from(kept))
}

/// Index of the period whose span contains `seed`, clamped to the first one.
fn period_containing(rule: &RecurrenceRule, anchor: &NaiveDateTime, seed: &NaiveDateTime) -> u64 {
    let interval = i64::from(rule.interval());
    let units = match rule.freq() {
        Frequency::Yearly => i64::from(seed.year() - anchor.year()),
        Frequency::Monthly => {
            i64::from(seed.year() - anchor.year()) * 12 + i64::from(seed.month())
                - i64::from(anchor.month())
        }
        freq => {
            let from = period_floor(rule, *anchor);
            let to = period_floor(rule, *seed);
            (to - from).num_seconds().div_euclid(fixed_step_seconds(freq))
        }
    };
    u64::try_from(units.div_euclid(interval)).unwrap_or(0)
}

fn satisfies_by_set_pos(rule: &RecurrenceRule, position: usize, len: usize) -> bool {
    let (Ok(position), Ok(len)) = (i32::try_from(position), i32::try_from(len)) else {
        return false;
    };
    let positive = position + 1;
    let negative = positive - 1 - len;
    rule.by_set_pos().binary_search(&positive).is_ok()
        || rule.by_set_pos().binary_search(&negative).is_ok()
}

/// Scratch space for the wall-clock candidates of one period.
#[derive(Debug, Default)]
struct CandidateSet {
    civil: Vec<NaiveDateTime>,
}

impl CandidateSet {
    fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, dt: NaiveDateTime) {
        self.civil.push(dt);
    }

    fn retain(&mut self, predicate: impl FnMut(&NaiveDateTime) -> bool) {
        self.civil.retain(predicate);
    }

    /// Replace every candidate with its expansion.
    fn expand<E, I>(&mut self, expand: E)
    where
        E: Fn(NaiveDateTime) -> I,
        I: Iterator<Item = NaiveDateTime>,
    {
        let len = self.civil.len();
        for i in 0..len {
            let expanded: Vec<NaiveDateTime> = expand(self.civil[i]).collect();
            self.civil.extend(expanded);
        }
        self.civil.drain(..len);
    }

    fn canonicalize(&mut self) {
        self.civil.sort();
        self.civil.dedup();
    }
}

/// Expands one period of a rule into wall-clock candidates.
///
/// Which BY* parts expand and which limit depends on the frequency (RFC 5545
/// section 3.3.10, the table under "BYxxx rule parts").
struct Expander<'r> {
    rule: &'r RecurrenceRule,
    anchor: NaiveDateTime,
    cur: NaiveDateTime,
}

impl Expander<'_> {
    fn expand(&self, set: &mut CandidateSet) {
        match self.rule.freq() {
            Frequency::Yearly => self.yearly(set),
            Frequency::Monthly => self.monthly(set),
            Frequency::Weekly => self.weekly(set),
            Frequency::Daily => self.daily(set),
            Frequency::Hourly | Frequency::Minutely | Frequency::Secondly => self.sub_daily(set),
        }
        set.canonicalize();
    }

    fn yearly(&self, set: &mut CandidateSet) {
        set.insert(self.cur);
        if self.has_by_week_no() {
            self.expand_by_week_no(set);
            if self.has_by_day() {
                set.retain(|dt| self.satisfies_by_day(*dt));
            }
            self.limit_by_month(set);
            self.limit_by_year_day(set);
            self.limit_by_month_day(set);
        } else if self.has_by_day() {
            if self.has_by_month() {
                self.expand_by_month(set);
                self.expand_by_day_monthly(set);
            } else {
                self.expand_by_day_yearly(set);
            }
            self.limit_by_year_day(set);
            self.limit_by_month_day(set);
        } else if self.has_by_month() && self.has_by_year_day() && !self.has_by_month_day() {
            self.expand_by_year_day(set);
            self.limit_by_month(set);
        } else if self.has_by_month() {
            self.expand_by_month(set);
            self.expand_by_month_day(set);
            self.limit_by_year_day(set);
        } else if self.has_by_month_day() {
            set.expand(|dt| (1..=12).filter_map(move |month| with_month(dt, month, 1)));
            self.expand_by_month_day(set);
            self.limit_by_year_day(set);
        } else if self.has_by_year_day() {
            self.expand_by_year_day(set);
        }
        self.expand_time_parts(set);
    }

    fn monthly(&self, set: &mut CandidateSet) {
        if !self.satisfies_by_month(self.cur) {
            return;
        }
        set.insert(self.cur);
        if self.has_by_day() {
            self.expand_by_day_monthly(set);
            self.limit_by_month_day(set);
        } else {
            self.expand_by_month_day(set);
        }
        self.expand_time_parts(set);
    }

    fn weekly(&self, set: &mut CandidateSet) {
        set.insert(self.cur);
        if self.has_by_day() {
            let wkst = self.rule.week_start();
            set.expand(|dt| {
                let week = week_start_of(dt.date(), wkst);
                (0..7u64)
                    .filter_map(move |n| week?.checked_add_days(Days::new(n)))
                    .map(move |date| date.and_time(dt.time()))
            });
            set.retain(|dt| self.satisfies_by_day(*dt));
        }
        self.limit_by_month(set);
        self.expand_time_parts(set);
    }

    fn daily(&self, set: &mut CandidateSet) {
        if !self.date_matches(self.cur) {
            return;
        }
        set.insert(self.cur);
        self.expand_time_parts(set);
    }

    /// HOURLY, MINUTELY and SECONDLY: every BY* part at or above the
    /// frequency limits, the ones below it expand.
    fn sub_daily(&self, set: &mut CandidateSet) {
        let freq = self.rule.freq();
        if !self.date_matches(self.cur) || !self.satisfies_by_hour(self.cur) {
            return;
        }
        if freq != Frequency::Hourly && !self.satisfies_by_minute(self.cur) {
            return;
        }
        if freq == Frequency::Secondly && !self.satisfies_by_second(self.cur) {
            return;
        }
        set.insert(self.cur);
        if freq == Frequency::Hourly {
            self.expand_by_minute(set);
        }
        if freq != Frequency::Secondly {
            self.expand_by_second(set);
        }
    }

    /// Next period worth expanding after period `k`.
    ///
    /// Sub-daily rules whose current day (or hour, or minute) is filtered out
    /// skip straight to the first period of the next day (hour, minute).
    fn next_period(&self, k: u64) -> u64 {
        let next = k.saturating_add(1);
        let freq = self.rule.freq();
        if !freq.is_sub_daily() {
            return next;
        }
        let cur = self.cur;
        let boundary = if !self.date_matches(cur) {
            cur.date().succ_opt().map(|d| d.and_time(NaiveTime::MIN))
        } else if !self.satisfies_by_hour(cur) {
            Some(truncate(cur, 3_600) + Duration::hours(1))
        } else if freq == Frequency::Secondly && !self.satisfies_by_minute(cur) {
            Some(truncate(cur, 60) + Duration::minutes(1))
        } else {
            None
        };
        match boundary {
            Some(boundary) => {
                let mut target = period_containing(self.rule, &self.anchor, &boundary);
                if let PeriodStart::Valid(start) = period_start(self.rule, &self.anchor, target) {
                    if period_floor(self.rule, start) < boundary {
                        target = target.saturating_add(1);
                    }
                }
                target.max(next)
            }
            None => next,
        }
    }

    fn date_matches(&self, dt: NaiveDateTime) -> bool {
        self.satisfies_by_month(dt)
            && self.satisfies_by_year_day(dt)
            && self.satisfies_by_month_day(dt)
            && self.satisfies_by_day(dt)
    }

    fn expand_time_parts(&self, set: &mut CandidateSet) {
        self.expand_by_hour(set);
        self.expand_by_minute(set);
        self.expand_by_second(set);
    }

    fn has_by_month(&self) -> bool {
        !self.rule.by_month().is_empty()
    }

    fn has_by_week_no(&self) -> bool {
        !self.rule.by_week_no().is_empty()
    }

    fn has_by_year_day(&self) -> bool {
        !self.rule.by_year_day().is_empty()
    }

    fn has_by_month_day(&self) -> bool {
        !self.rule.by_month_day().is_empty()
    }

    fn has_by_day(&self) -> bool {
        !self.rule.by_day().is_empty()
    }

    fn satisfies_by_month(&self, dt: NaiveDateTime) -> bool {
        !self.has_by_month() || self.rule.by_month().contains(&dt.month())
    }

    fn satisfies_by_year_day(&self, dt: NaiveDateTime) -> bool {
        if !self.has_by_year_day() {
            return true;
        }
        let positive = dt.ordinal() as i32;
        // -1 is the last day of the year.
        let negative = positive - 1 - days_in_year(dt.year()) as i32;
        self.rule.by_year_day().binary_search(&positive).is_ok()
            || self.rule.by_year_day().binary_search(&negative).is_ok()
    }

    fn satisfies_by_month_day(&self, dt: NaiveDateTime) -> bool {
        if !self.has_by_month_day() {
            return true;
        }
        let positive = dt.day() as i32;
        let negative = positive - 1 - days_in_month(dt.year(), dt.month()) as i32;
        self.rule.by_month_day().binary_search(&positive).is_ok()
            || self.rule.by_month_day().binary_search(&negative).is_ok()
    }

    /// Weekday filter. Only plain weekdays reach this; numbered ones are
    /// rejected at any frequency that limits by BYDAY.
    fn satisfies_by_day(&self, dt: NaiveDateTime) -> bool {
        !self.has_by_day() || self.rule.by_day().iter().any(|d| d.weekday() == dt.weekday())
    }

    fn satisfies_by_hour(&self, dt: NaiveDateTime) -> bool {
        self.rule.by_hour().is_empty() || self.rule.by_hour().contains(&dt.hour())
    }

    fn satisfies_by_minute(&self, dt: NaiveDateTime) -> bool {
        self.rule.by_minute().is_empty() || self.rule.by_minute().contains(&dt.minute())
    }

    fn satisfies_by_second(&self, dt: NaiveDateTime) -> bool {
        self.rule.by_second().is_empty() || self.rule.by_second().contains(&dt.second())
    }

    fn limit_by_month(&self, set: &mut CandidateSet) {
        if self.has_by_month() {
            set.retain(|dt| self.satisfies_by_month(*dt));
        }
    }

    fn limit_by_year_day(&self, set: &mut CandidateSet) {
        if self.has_by_year_day() {
            set.retain(|dt| self.satisfies_by_year_day(*dt));
        }
    }

    fn limit_by_month_day(&self, set: &mut CandidateSet) {
        if self.has_by_month_day() {
            set.retain(|dt| self.satisfies_by_month_day(*dt));
        }
    }

    /// BYMONTH at YEARLY. The start's day of month is kept unless a later
    /// part replaces the day anyway, in which case the 1st is used so short
    /// months are not lost.
    fn expand_by_month(&self, set: &mut CandidateSet) {
        let day = if self.has_by_day() || self.has_by_month_day() {
            1
        } else {
            self.anchor.day()
        };
        let months = self.rule.by_month();
        set.expand(move |dt| {
            months
                .iter()
                .filter_map(move |month| with_month(dt, *month, day))
        });
    }

    /// Every day of the selected weeks that falls inside the period's year.
    fn expand_by_week_no(&self, set: &mut CandidateSet) {
        let wkst = self.rule.week_start();
        let weeks = self.rule.by_week_no();
        set.expand(|dt| {
            let year = dt.year();
            let mut days = Vec::new();
            // Week 1 of next year and the last weeks of the previous year can
            // spill into this calendar year.
            for week_year in [year - 1, year, year + 1] {
                let (Some(first), Some(count)) =
                    (week_one_start(week_year, wkst), weeks_in_year(week_year, wkst))
                else {
                    continue;
                };
                for week in weeks {
                    let week = if *week < 0 { count as i32 + week + 1 } else { *week };
                    if week < 1 || week > count as i32 {
                        continue;
                    }
                    let Some(monday) = first.checked_add_days(Days::new(7 * (week as u64 - 1)))
                    else {
                        continue;
                    };
                    days.extend(
                        (0..7u64)
                            .filter_map(|n| monday.checked_add_days(Days::new(n)))
                            .filter(|d| d.year() == year)
                            .map(|d| d.and_time(dt.time())),
                    );
                }
            }
            days.into_iter()
        });
    }

    fn expand_by_year_day(&self, set: &mut CandidateSet) {
        let days = self.rule.by_year_day();
        set.expand(move |dt| {
            let len = days_in_year(dt.year()) as i32;
            days.iter().filter_map(move |day| {
                let day = if *day < 0 { len + day + 1 } else { *day };
                let ordinal = u32::try_from(day).ok()?;
                NaiveDate::from_yo_opt(dt.year(), ordinal).map(|d| d.and_time(dt.time()))
            })
        });
    }

    fn expand_by_month_day(&self, set: &mut CandidateSet) {
        if !self.has_by_month_day() {
            return;
        }
        let days = self.rule.by_month_day();
        set.expand(move |dt| {
            let len = days_in_month(dt.year(), dt.month()) as i32;
            days.iter().filter_map(move |day| {
                let day = if *day < 0 { len + day + 1 } else { *day };
                let day = u32::try_from(day).ok()?;
                dt.date().with_day(day).map(|d| d.and_time(dt.time()))
            })
        });
    }

    /// BYDAY relative to the whole year of each candidate.
    fn expand_by_day_yearly(&self, set: &mut CandidateSet) {
        let by_day = self.rule.by_day();
        set.expand(|dt| {
            let year = dt.year();
            let first = NaiveDate::from_ymd_opt(year, 1, 1);
            let last = NaiveDate::from_ymd_opt(year, 12, 31);
            weekdays_in_range(by_day, first, last, dt)
        });
    }

    /// BYDAY relative to the month of each candidate.
    fn expand_by_day_monthly(&self, set: &mut CandidateSet) {
        let by_day = self.rule.by_day();
        set.expand(|dt| {
            let first = dt.date().with_day(1);
            let last = dt
                .date()
                .with_day(days_in_month(dt.year(), dt.month()));
            weekdays_in_range(by_day, first, last, dt)
        });
    }

    fn expand_by_hour(&self, set: &mut CandidateSet) {
        let hours = self.rule.by_hour();
        if hours.is_empty() {
            return;
        }
        set.expand(move |dt| hours.iter().filter_map(move |h| dt.with_hour(*h)));
    }

    fn expand_by_minute(&self, set: &mut CandidateSet) {
        let minutes = self.rule.by_minute();
        if minutes.is_empty() {
            return;
        }
        set.expand(move |dt| minutes.iter().filter_map(move |m| dt.with_minute(*m)));
    }

    fn expand_by_second(&self, set: &mut CandidateSet) {
        let seconds = self.rule.by_second();
        if seconds.is_empty() {
            return;
        }
        set.expand(move |dt| seconds.iter().filter_map(move |s| dt.with_second(*s)));
    }
}

/// Dates in `first..=last` matching any BYDAY entry, at `dt`'s time of day.
/// Numbered entries count from the start (positive) or end (negative) of the
/// range.
fn weekdays_in_range(
    by_day: &[ByWeekday],
    first: Option<NaiveDate>,
    last: Option<NaiveDate>,
    dt: NaiveDateTime,
) -> std::vec::IntoIter<NaiveDateTime> {
    let (Some(first), Some(last)) = (first, last) else {
        return Vec::new().into_iter();
    };
    let mut dates = Vec::new();
    for entry in by_day {
        match *entry {
            ByWeekday::Any(weekday) => {
                let mut day = first_on_or_after(first, weekday);
                while let Some(d) = day.filter(|d| *d <= last) {
                    dates.push(d);
                    day = d.checked_add_days(Days::new(7));
                }
            }
            ByWeekday::Numbered { nth, weekday } => {
                if let Some(d) = nth_weekday(first, last, i32::from(nth), weekday) {
                    dates.push(d);
                }
            }
        }
    }
    let times: Vec<NaiveDateTime> = dates.into_iter().map(|d| d.and_time(dt.time())).collect();
    times.into_iter()
}

fn first_on_or_after(date: NaiveDate, weekday: Weekday) -> Option<NaiveDate> {
    let ahead = (7 + weekday.num_days_from_monday() - date.weekday().num_days_from_monday()) % 7;
    date.checked_add_days(Days::new(u64::from(ahead)))
}

fn last_on_or_before(date: NaiveDate, weekday: Weekday) -> Option<NaiveDate> {
    let back = (7 + date.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    date.checked_sub_days(Days::new(u64::from(back)))
}

fn nth_weekday(first: NaiveDate, last: NaiveDate, nth: i32, weekday: Weekday) -> Option<NaiveDate> {
    let weeks = Days::new(7 * (u64::from(nth.unsigned_abs()) - 1));
    let date = if nth > 0 {
        first_on_or_after(first, weekday)?.checked_add_days(weeks)?
    } else {
        last_on_or_before(last, weekday)?.checked_sub_days(weeks)?
    };
    (first..=last).contains(&date).then_some(date)
}

fn with_month(dt: NaiveDateTime, month: u32, day: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(dt.year(), month, day).map(|d| d.and_time(dt.time()))
}

pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(31, |d| d.day())
}

pub(crate) fn days_in_year(year: i32) -> u32 {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366
    } else {
        365
    }
}

/// First day of the week containing `date`, for weeks starting on `wkst`.
pub(crate) fn week_start_of(date: NaiveDate, wkst: Weekday) -> Option<NaiveDate> {
    last_on_or_before(date, wkst)
}

/// Start of week 1: the first week with at least four days in `year`, which
/// is always the week containing January 4th.
fn week_one_start(year: i32, wkst: Weekday) -> Option<NaiveDate> {
    week_start_of(NaiveDate::from_ymd_opt(year, 1, 4)?, wkst)
}

fn weeks_in_year(year: i32, wkst: Weekday) -> Option<u32> {
    let this = week_one_start(year, wkst)?;
    let next = week_one_start(year + 1, wkst)?;
    u32::try_from((next - this).num_days() / 7).ok()
}
