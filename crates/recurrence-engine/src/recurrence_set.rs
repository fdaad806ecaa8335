//! Recurrence set assembly -- start + RRULE + RDATE additions - EXDATE
//! exclusions, as one lazy ascending sequence.
//!
//! A [`RecurrenceSet`] owns a [`WindowCache`] that is created on the first
//! cached query and thrown away whenever the start or the rule changes. All
//! stored values must share the start's [`TemporalKind`](crate::TemporalKind);
//! every mutator checks this before changing anything.

use std::collections::btree_set;
use std::collections::BTreeSet;
use std::iter::Peekable;

use crate::cache::{CacheConfig, ReentryPoint, WindowCache};
use crate::error::{RecurrenceError, Result};
use crate::expander::{check_start, RuleIter};
use crate::rule::RecurrenceRule;
use crate::temporal::Temporal;

#[derive(Debug, Clone)]
pub struct RecurrenceSet {
    start: Temporal,
    rule: Option<RecurrenceRule>,
    additions: Option<BTreeSet<Temporal>>,
    exclusions: Option<BTreeSet<Temporal>>,
    cache_config: CacheConfig,
    cache: Option<WindowCache>,
}

impl PartialEq for RecurrenceSet {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
            && self.rule == other.rule
            && self.additions == other.additions
            && self.exclusions == other.exclusions
    }
}

impl RecurrenceSet {
    /// A non-recurring set: the single occurrence `start`.
    pub fn new(start: Temporal) -> Self {
        RecurrenceSet {
            start,
            rule: None,
            additions: None,
            exclusions: None,
            cache_config: CacheConfig::default(),
            cache: None,
        }
    }

    /// Shorthand for `new` followed by `set_rule`.
    pub fn with_rule(start: Temporal, rule: RecurrenceRule) -> Result<Self> {
        let mut set = RecurrenceSet::new(start);
        set.set_rule(Some(rule))?;
        Ok(set)
    }

    pub fn with_cache_config(mut self, config: CacheConfig) -> Result<Self> {
        self.set_cache_config(config)?;
        Ok(self)
    }

    pub fn start(&self) -> &Temporal {
        &self.start
    }

    pub fn rule(&self) -> Option<&RecurrenceRule> {
        self.rule.as_ref()
    }

    pub fn additions(&self) -> Option<&BTreeSet<Temporal>> {
        self.additions.as_ref()
    }

    pub fn exclusions(&self) -> Option<&BTreeSet<Temporal>> {
        self.exclusions.as_ref()
    }

    pub fn cache_config(&self) -> CacheConfig {
        self.cache_config
    }

    /// The reentry cache, if a cached query has created one.
    pub fn cache(&self) -> Option<&WindowCache> {
        self.cache.as_ref()
    }

    pub fn set_cache_config(&mut self, config: CacheConfig) -> Result<()> {
        config.validate()?;
        if config != self.cache_config {
            self.cache_config = config;
            self.discard_cache();
        }
        Ok(())
    }

    /// # Errors
    /// Returns `RecurrenceError::TypeMismatch` when the stored additions,
    /// exclusions or UNTIL are of a different kind than `start`.
    pub fn set_start(&mut self, start: Temporal) -> Result<()> {
        if let Some(rule) = &self.rule {
            check_start(rule, &start)?;
        }
        for value in self.stored_values() {
            start.ensure_kind(value.kind())?;
        }
        if start != self.start {
            self.start = start;
            self.discard_cache();
        }
        Ok(())
    }

    /// Replace the rule. `None` makes the set non-recurring.
    pub fn set_rule(&mut self, rule: Option<RecurrenceRule>) -> Result<()> {
        if let Some(rule) = &rule {
            check_start(rule, &self.start)?;
        }
        if rule != self.rule {
            self.rule = rule;
            self.discard_cache();
        }
        Ok(())
    }

    pub fn add_addition(&mut self, value: Temporal) -> Result<()> {
        value.ensure_kind(self.start.kind())?;
        self.additions.get_or_insert_with(BTreeSet::new).insert(value);
        Ok(())
    }

    /// Returns whether the value was present. An emptied set becomes `None`.
    pub fn remove_addition(&mut self, value: &Temporal) -> bool {
        remove_value(&mut self.additions, value)
    }

    pub fn set_additions(&mut self, values: impl IntoIterator<Item = Temporal>) -> Result<()> {
        self.additions = self.checked_set(values)?;
        Ok(())
    }

    pub fn add_exclusion(&mut self, value: Temporal) -> Result<()> {
        value.ensure_kind(self.start.kind())?;
        self.exclusions.get_or_insert_with(BTreeSet::new).insert(value);
        Ok(())
    }

    pub fn remove_exclusion(&mut self, value: &Temporal) -> bool {
        remove_value(&mut self.exclusions, value)
    }

    pub fn set_exclusions(&mut self, values: impl IntoIterator<Item = Temporal>) -> Result<()> {
        self.exclusions = self.checked_set(values)?;
        Ok(())
    }

    fn checked_set(
        &self,
        values: impl IntoIterator<Item = Temporal>,
    ) -> Result<Option<BTreeSet<Temporal>>> {
        let values: BTreeSet<Temporal> = values.into_iter().collect();
        for value in &values {
            value.ensure_kind(self.start.kind())?;
        }
        Ok((!values.is_empty()).then_some(values))
    }

    fn stored_values(&self) -> impl Iterator<Item = &Temporal> {
        self.additions
            .iter()
            .flatten()
            .chain(self.exclusions.iter().flatten())
            .chain(self.rule.as_ref().and_then(|r| r.until()))
    }

    fn discard_cache(&mut self) {
        if let Some(cache) = self.cache.take() {
            tracing::debug!(entries = cache.len(), "discarding reentry cache");
        }
    }

    fn clamp_from(&self, from: Option<&Temporal>) -> Result<Temporal> {
        match from {
            Some(from) => {
                from.ensure_kind(self.start.kind())?;
                Ok(if *from < self.start { self.start } else { *from })
            }
            None => Ok(self.start),
        }
    }

    /// The occurrences at or after `from` (clamped to the start), resuming
    /// rule expansion from the reentry cache.
    ///
    /// # Errors
    /// Returns `RecurrenceError::TypeMismatch` when `from` is of a different
    /// kind than the start.
    pub fn occurrences(&mut self, from: Option<&Temporal>) -> Result<Occurrences<'_>> {
        if !self.cache_config.is_enabled() || self.rule.is_none() {
            return self.occurrences_uncached(from);
        }
        let from = self.clamp_from(from)?;
        let RecurrenceSet {
            start,
            rule,
            additions,
            exclusions,
            cache_config,
            cache: cache_slot,
        } = self;
        let Some(rule) = rule.as_ref() else {
            return Err(RecurrenceError::Validation("recurrence set has no rule".to_string()));
        };

        let cache = match cache_slot.take() {
            Some(mut cache) => {
                cache.ensure_snapshot(start, Some(rule));
                cache
            }
            None => WindowCache::new(*cache_config, *start, Some(rule.clone()))?,
        };
        let cache = cache_slot.insert(cache);
        let point = cache
            .find_reentry_point(&from)
            .unwrap_or(ReentryPoint::new(*start, 0));
        let iter = rule.resume(start, &point)?;

        Ok(Occurrences::new(
            Source::Rule(iter),
            additions.as_ref(),
            exclusions.as_ref(),
            from,
            Some(cache),
        ))
    }

    /// Same sequence as [`occurrences`](Self::occurrences) without reading or
    /// updating the cache.
    pub fn occurrences_uncached(&self, from: Option<&Temporal>) -> Result<Occurrences<'_>> {
        let from = self.clamp_from(from)?;
        let source = match &self.rule {
            Some(rule) => Source::Rule(rule.occurrences_from(&self.start, &from)?),
            None => Source::Single(Some(self.start)),
        };
        Ok(Occurrences::new(
            source,
            self.additions.as_ref(),
            self.exclusions.as_ref(),
            from,
            None,
        ))
    }

    /// The cached point to resume rule expansion from for `query`, or the
    /// start with ordinal 0.
    pub fn find_reentry_point(&mut self, query: &Temporal) -> Result<ReentryPoint> {
        query.ensure_kind(self.start.kind())?;
        let seed = ReentryPoint::new(self.start, 0);
        if !self.cache_config.is_enabled() {
            return Ok(seed);
        }
        let Some(rule) = self.rule.as_ref() else {
            return Ok(seed);
        };
        match self.cache.as_mut() {
            Some(cache) => {
                cache.ensure_snapshot(&self.start, Some(rule));
                Ok(cache.find_reentry_point(query).unwrap_or(seed))
            }
            None => Ok(seed),
        }
    }

    /// First occurrence strictly after `after`.
    pub fn next_occurrence(&mut self, after: &Temporal) -> Result<Option<Temporal>> {
        let after = *after;
        Ok(self.occurrences(Some(&after))?.find(|value| *value > after))
    }

    /// Last occurrence strictly before `before`.
    ///
    /// Scans forward from the nearest cached point; when that yields nothing
    /// (for example because the cached point is excluded and nothing follows
    /// it before `before`) the whole set is scanned from the start.
    pub fn previous_occurrence(&mut self, before: &Temporal) -> Result<Option<Temporal>> {
        before.ensure_kind(self.start.kind())?;
        if *before <= self.start {
            return Ok(None);
        }
        let probe = before.step_back()?;
        let seed = self.find_reentry_point(&probe)?.instant;

        let before = *before;
        let found = self
            .occurrences(Some(&seed))?
            .take_while(|value| *value < before)
            .last();
        if found.is_some() || seed == self.start {
            return Ok(found);
        }
        tracing::trace!(before = %before, "previous occurrence not near cached point, rescanning");
        Ok(self
            .occurrences_uncached(None)?
            .take_while(|value| *value < before)
            .last())
    }

    /// True when `value` is a current occurrence of the set.
    pub fn contains(&mut self, value: &Temporal) -> Result<bool> {
        Ok(self.occurrences(Some(value))?.next() == Some(*value))
    }

    /// Zero-based index of `value` in the rule's own sequence, or `None` when
    /// the rule does not produce it. Additions and exclusions are ignored.
    pub fn rule_ordinal(&mut self, value: &Temporal) -> Result<Option<u64>> {
        let point = self.find_reentry_point(value)?;
        let Some(rule) = self.rule.as_ref() else {
            return Ok((*value == self.start).then_some(0));
        };
        let mut iter = rule.resume(&self.start, &point)?;
        while let Some(candidate) = iter.next() {
            if candidate == *value {
                return Ok(Some(iter.consumed() - 1));
            }
            if candidate > *value {
                break;
            }
        }
        Ok(None)
    }

    /// Check the set's structural invariants.
    ///
    /// The start must be the first value of rule and additions combined. It
    /// may itself be excluded.
    ///
    /// # Errors
    /// Returns `RecurrenceError::EmptyRecurrenceSet` when no occurrence is
    /// produced and `RecurrenceError::Validation` when the start is not the
    /// first occurrence.
    pub fn validate(&self) -> Result<()> {
        let rule_first = match &self.rule {
            Some(rule) => rule.occurrences(&self.start)?.next(),
            None => Some(self.start),
        };
        let addition_first = self.additions.as_ref().and_then(|a| a.first().copied());
        let first = match (rule_first, addition_first) {
            (Some(r), Some(a)) => Some(r.min(a)),
            (r, a) => r.or(a),
        };
        if let Some(first) = first.filter(|first| *first != self.start) {
            return Err(RecurrenceError::Validation(format!(
                "start {} is not the first occurrence (first is {first})",
                self.start
            )));
        }
        if self.occurrences_uncached(None)?.next().is_none() {
            return Err(RecurrenceError::EmptyRecurrenceSet);
        }
        Ok(())
    }
}

fn remove_value(values: &mut Option<BTreeSet<Temporal>>, value: &Temporal) -> bool {
    let Some(set) = values.as_mut() else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        *values = None;
    }
    removed
}

#[derive(Debug)]
enum Source<'a> {
    Rule(RuleIter<'a>),
    Single(Option<Temporal>),
}

/// Lazy ascending occurrences of a [`RecurrenceSet`].
///
/// Produced by [`RecurrenceSet::occurrences`] and
/// [`RecurrenceSet::occurrences_uncached`]. Unbounded when the rule is.
#[derive(Debug)]
pub struct Occurrences<'a> {
    source: Source<'a>,
    rule_peek: Option<Temporal>,
    additions: Option<Peekable<btree_set::Range<'a, Temporal>>>,
    exclusions: Option<&'a BTreeSet<Temporal>>,
    from: Temporal,
    cache: Option<&'a mut WindowCache>,
    last: Option<Temporal>,
}

impl<'a> Occurrences<'a> {
    fn new(
        source: Source<'a>,
        additions: Option<&'a BTreeSet<Temporal>>,
        exclusions: Option<&'a BTreeSet<Temporal>>,
        from: Temporal,
        cache: Option<&'a mut WindowCache>,
    ) -> Self {
        Occurrences {
            source,
            rule_peek: None,
            additions: additions.map(|set| set.range(from..).peekable()),
            exclusions,
            from,
            cache,
            last: None,
        }
    }

    /// Next rule value at or after `from`. Every value pulled from the rule
    /// is reported to the cache, including ones skipped here.
    fn pull_rule(&mut self) -> Option<Temporal> {
        match &mut self.source {
            Source::Single(start) => start.take().filter(|s| *s >= self.from),
            Source::Rule(iter) => loop {
                let value = iter.next()?;
                if let Some(cache) = self.cache.as_deref_mut() {
                    cache.record(ReentryPoint::new(value, iter.consumed().saturating_sub(1)));
                }
                if value >= self.from {
                    return Some(value);
                }
            },
        }
    }

    fn peek_addition(&mut self) -> Option<Temporal> {
        self.additions.as_mut().and_then(|a| a.peek().copied().copied())
    }

    fn advance_addition(&mut self) {
        if let Some(additions) = self.additions.as_mut() {
            additions.next();
        }
    }

    fn is_excluded(&self, value: &Temporal) -> bool {
        self.exclusions.is_some_and(|set| set.contains(value))
    }
}

impl Iterator for Occurrences<'_> {
    type Item = Temporal;

    fn next(&mut self) -> Option<Temporal> {
        loop {
            if self.rule_peek.is_none() {
                self.rule_peek = self.pull_rule();
            }
            let addition = self.peek_addition();
            let next = match (self.rule_peek, addition) {
                (None, None) => return None,
                (Some(rule), Some(add)) if add <= rule => {
                    self.advance_addition();
                    if add == rule {
                        self.rule_peek = None;
                    }
                    add
                }
                (Some(rule), _) => {
                    self.rule_peek = None;
                    rule
                }
                (None, Some(add)) => {
                    self.advance_addition();
                    add
                }
            };
            if self.last.is_some_and(|last| next <= last) {
                continue;
            }
            self.last = Some(next);
            if self.is_excluded(&next) {
                continue;
            }
            return Some(next);
        }
    }
}
