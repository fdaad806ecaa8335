//! Editable recurring components.
//!
//! A [`Series`] is a calendar component (event, todo, journal entry) reduced to
//! what recurrence needs: a UID, a [`RecurrenceSet`], the duration of each
//! instance and the single-instance overrides that replace some of its
//! occurrences. Edits live in [`crate::edit`].

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::error::{RecurrenceError, Result};
use crate::recurrence_set::RecurrenceSet;
use crate::rule::RecurrenceRule;
use crate::temporal::Temporal;

/// Source of fresh UIDs for series created by splits.
pub trait UidGenerator {
    fn next_uid(&mut self) -> String;
}

impl<F> UidGenerator for F
where
    F: FnMut() -> String,
{
    fn next_uid(&mut self) -> String {
        self()
    }
}

/// Generates `<session>-<n>@<domain>` UIDs with a per-generator counter.
#[derive(Debug, Clone)]
pub struct SessionUidGenerator {
    session: String,
    domain: String,
    counter: u64,
}

impl SessionUidGenerator {
    /// A generator whose session prefix is the current UTC time.
    pub fn new(domain: impl Into<String>) -> Self {
        let session = Utc::now().format("%Y%m%dT%H%M%S").to_string();
        Self::with_session(session, domain)
    }

    pub fn with_session(session: impl Into<String>, domain: impl Into<String>) -> Self {
        SessionUidGenerator {
            session: session.into(),
            domain: domain.into(),
            counter: 0,
        }
    }
}

impl UidGenerator for SessionUidGenerator {
    fn next_uid(&mut self) -> String {
        let uid = format!("{}-{}@{}", self.session, self.counter, self.domain);
        self.counter += 1;
        uid
    }
}

/// Where a series is in its edit life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeriesState {
    /// No rule: a single occurrence (plus any additions).
    Individual,
    Repeating,
    /// Repeating with at least one single-instance override.
    RepeatingWithOverrides,
}

/// One materialized occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub uid: String,
    pub start: Temporal,
    pub end: Temporal,
    /// The original occurrence this instance replaces, for override instances.
    pub recurrence_id: Option<Temporal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub(crate) uid: String,
    pub(crate) related_to: Option<String>,
    pub(crate) sequence: u32,
    pub(crate) duration: Duration,
    pub(crate) recurrence: RecurrenceSet,
    pub(crate) recurrence_id: Option<Temporal>,
    /// UID of the series this override belongs to.
    pub(crate) parent: Option<String>,
    /// Overrides ordered by recurrence-id.
    pub(crate) overrides: Vec<Series>,
}

impl Series {
    /// # Errors
    /// Returns `RecurrenceError::Configuration` for a negative duration.
    pub fn new(uid: impl Into<String>, recurrence: RecurrenceSet, duration: Duration) -> Result<Self> {
        if duration < Duration::zero() {
            return Err(RecurrenceError::Configuration(format!(
                "instance duration must not be negative, got {duration}"
            )));
        }
        Ok(Series {
            uid: uid.into(),
            related_to: None,
            sequence: 0,
            duration,
            recurrence,
            recurrence_id: None,
            parent: None,
            overrides: Vec::new(),
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn related_to(&self) -> Option<&str> {
        self.related_to.as_deref()
    }

    pub fn set_related_to(&mut self, related_to: Option<String>) {
        self.related_to = related_to;
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn start(&self) -> &Temporal {
        self.recurrence.start()
    }

    pub fn recurrence(&self) -> &RecurrenceSet {
        &self.recurrence
    }

    pub fn recurrence_mut(&mut self) -> &mut RecurrenceSet {
        &mut self.recurrence
    }

    pub fn recurrence_id(&self) -> Option<&Temporal> {
        self.recurrence_id.as_ref()
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn overrides(&self) -> &[Series] {
        &self.overrides
    }

    pub fn overrides_mut(&mut self) -> &mut [Series] {
        &mut self.overrides
    }

    pub fn state(&self) -> SeriesState {
        match (self.recurrence.rule(), self.overrides.is_empty()) {
            (None, _) => SeriesState::Individual,
            (Some(_), true) => SeriesState::Repeating,
            (Some(_), false) => SeriesState::RepeatingWithOverrides,
        }
    }

    /// Make an individual series repeat.
    ///
    /// # Errors
    /// Returns `RecurrenceError::InvalidEdit` when the series already has a
    /// rule, and the set's own errors when the rule does not fit the start.
    pub fn attach_rule(&mut self, rule: RecurrenceRule) -> Result<()> {
        if self.state() != SeriesState::Individual {
            return Err(RecurrenceError::InvalidEdit(format!(
                "series {} already repeats",
                self.uid
            )));
        }
        let mut recurrence = self.recurrence.clone();
        recurrence.set_rule(Some(rule))?;
        recurrence.validate()?;
        self.recurrence = recurrence;
        self.sequence += 1;
        tracing::debug!(uid = %self.uid, "rule attached");
        Ok(())
    }

    /// Instances overlapping `[range_start, range_end)`, override instances
    /// included, sorted by start.
    ///
    /// Expansion starts one duration before `range_start` so instances that
    /// began earlier but are still running are included.
    pub fn instances(&mut self, range_start: &Temporal, range_end: &Temporal) -> Result<Vec<Instance>> {
        let kind = self.start().kind();
        range_start.ensure_kind(kind)?;
        range_end.ensure_kind(kind)?;

        let duration = self.duration;
        let from = range_start.minus_duration(duration)?;
        let mut instances = Vec::new();
        for start in self.recurrence.occurrences(Some(&from))? {
            if start >= *range_end {
                break;
            }
            let end = start.plus_duration(duration)?;
            if end > *range_start || start >= *range_start {
                instances.push(Instance {
                    uid: self.uid.clone(),
                    start,
                    end,
                    recurrence_id: self.recurrence_id,
                });
            }
        }
        for child in &mut self.overrides {
            instances.extend(child.instances(range_start, range_end)?);
        }
        instances.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.uid.cmp(&b.uid)));
        Ok(instances)
    }
}
