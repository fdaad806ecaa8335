//! Series edits: collapse to a single instance, split at an occurrence, edit
//! or delete one occurrence, delete an occurrence and everything after it.
//!
//! Every edit works on copies and only replaces the series once both halves
//! validate, so a failed edit leaves the series untouched.

use std::collections::BTreeSet;

use crate::error::{RecurrenceError, Result};
use crate::recurrence_set::RecurrenceSet;
use crate::rule::{RecurrenceRule, Termination};
use crate::series::{Series, UidGenerator};
use crate::temporal::Temporal;

impl Series {
    /// Turn a repeating series into a single instance at `instance_start`.
    ///
    /// Rule, additions and exclusions are cleared. The start only moves when
    /// a rule was actually removed.
    ///
    /// # Errors
    /// Returns `RecurrenceError::InvalidEdit` while overrides exist; those
    /// must be deleted individually first.
    pub fn collapse_to_individual(&mut self, instance_start: Temporal) -> Result<()> {
        instance_start.ensure_kind(self.start().kind())?;
        if !self.overrides.is_empty() {
            return Err(RecurrenceError::InvalidEdit(format!(
                "series {} has {} overridden instance(s)",
                self.uid,
                self.overrides.len()
            )));
        }
        let had_rule = self.recurrence.rule().is_some();
        let mut recurrence = self.recurrence.clone();
        recurrence.set_rule(None)?;
        recurrence.set_additions([])?;
        recurrence.set_exclusions([])?;
        if had_rule {
            recurrence.set_start(instance_start)?;
        }
        self.recurrence = recurrence;
        self.sequence += 1;
        tracing::debug!(uid = %self.uid, start = %self.start(), "collapsed to individual");
        Ok(())
    }

    /// Split the series at `boundary`: this series ends just before it and the
    /// returned series starts at it with the same rule parts.
    ///
    /// A COUNT rule is converted to UNTIL here; the new series gets the
    /// remaining count. Additions, exclusions and overrides at or after the
    /// boundary move to the new series.
    ///
    /// # Errors
    /// Returns `RecurrenceError::InvalidEdit` when the series has no rule or
    /// `boundary` is not a current rule occurrence after the start.
    pub fn split_this_and_future(
        &mut self,
        boundary: &Temporal,
        uids: &mut impl UidGenerator,
    ) -> Result<Series> {
        let (rule, ordinal) = self.check_boundary(boundary)?;

        let remaining = match rule.termination() {
            Termination::Count(count) => {
                let left = u64::from(*count).saturating_sub(ordinal);
                let left = u32::try_from(left)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| {
                        RecurrenceError::InvalidEdit(format!(
                            "{boundary} is past the last counted occurrence"
                        ))
                    })?;
                Termination::Count(left)
            }
            other => *other,
        };
        let head_rule = rule.with_termination(Termination::Until(boundary.step_back()?))?;
        let tail_rule = rule.with_termination(remaining)?;

        let (head_additions, tail_additions) = partition(self.recurrence.additions(), boundary);
        let (head_exclusions, tail_exclusions) = partition(self.recurrence.exclusions(), boundary);

        let mut head = self.recurrence.clone();
        head.set_rule(Some(head_rule))?;
        head.set_additions(head_additions)?;
        head.set_exclusions(head_exclusions)?;
        head.validate()?;

        let mut tail = RecurrenceSet::with_rule(*boundary, tail_rule)?
            .with_cache_config(self.recurrence.cache_config())?;
        tail.set_additions(tail_additions)?;
        tail.set_exclusions(tail_exclusions)?;
        tail.validate()?;

        let uid = uids.next_uid();
        let (kept, mut moved): (Vec<Series>, Vec<Series>) = std::mem::take(&mut self.overrides)
            .into_iter()
            .partition(|child| child.recurrence_id.is_some_and(|id| id < *boundary));
        for child in &mut moved {
            child.uid = uid.clone();
            child.parent = Some(uid.clone());
        }

        let mut future = Series::new(uid, tail, self.duration)?;
        future.related_to = Some(self.related_to.clone().unwrap_or_else(|| self.uid.clone()));
        future.overrides = moved;

        self.recurrence = head;
        self.overrides = kept;
        self.sequence += 1;
        tracing::debug!(
            uid = %self.uid,
            new_uid = %future.uid,
            boundary = %boundary,
            ordinal,
            "split this and future"
        );
        Ok(future)
    }

    /// Detach one occurrence into an override with its own start.
    ///
    /// The occurrence is excluded from this series and a non-recurring
    /// override (same UID, recurrence-id = `instant`) starting at
    /// `new_start` is stored among this series' overrides.
    pub fn split_one(&mut self, instant: &Temporal, new_start: Temporal) -> Result<&mut Series> {
        let kind = self.start().kind();
        instant.ensure_kind(kind)?;
        new_start.ensure_kind(kind)?;
        if self.recurrence.rule().is_none() {
            return Err(RecurrenceError::InvalidEdit(format!(
                "series {} does not repeat",
                self.uid
            )));
        }
        if !self.recurrence.contains(instant)? {
            return Err(RecurrenceError::InvalidEdit(format!(
                "{instant} is not an occurrence of series {}",
                self.uid
            )));
        }

        let mut recurrence = self.recurrence.clone();
        recurrence.add_exclusion(*instant)?;
        recurrence.validate()?;

        let mut child = Series::new(self.uid.clone(), RecurrenceSet::new(new_start), self.duration)?;
        child.recurrence_id = Some(*instant);
        child.parent = Some(self.uid.clone());

        self.recurrence = recurrence;
        self.sequence += 1;
        let index = self
            .overrides
            .partition_point(|existing| existing.recurrence_id < Some(*instant));
        self.overrides.insert(index, child);
        tracing::debug!(uid = %self.uid, recurrence_id = %instant, "split one instance");
        Ok(&mut self.overrides[index])
    }

    /// Delete one occurrence: drop the override replacing it, or exclude it.
    pub fn delete_one(&mut self, instant: &Temporal) -> Result<()> {
        instant.ensure_kind(self.start().kind())?;
        if let Some(index) = self
            .overrides
            .iter()
            .position(|child| child.recurrence_id.as_ref() == Some(instant))
        {
            self.overrides.remove(index);
            self.sequence += 1;
            tracing::debug!(uid = %self.uid, recurrence_id = %instant, "override deleted");
            return Ok(());
        }
        if self.recurrence.rule().is_none() {
            return Err(RecurrenceError::InvalidEdit(format!(
                "series {} has a single instance; delete the series instead",
                self.uid
            )));
        }
        if !self.recurrence.contains(instant)? {
            return Err(RecurrenceError::InvalidEdit(format!(
                "{instant} is not an occurrence of series {}",
                self.uid
            )));
        }
        let mut recurrence = self.recurrence.clone();
        recurrence.add_exclusion(*instant)?;
        recurrence.validate()?;
        self.recurrence = recurrence;
        self.sequence += 1;
        tracing::debug!(uid = %self.uid, instant = %instant, "occurrence excluded");
        Ok(())
    }

    /// Delete `boundary` and every later occurrence.
    pub fn delete_this_and_future(&mut self, boundary: &Temporal) -> Result<()> {
        let (rule, _) = self.check_boundary(boundary)?;
        let head_rule = rule.with_termination(Termination::Until(boundary.step_back()?))?;
        let (head_additions, _) = partition(self.recurrence.additions(), boundary);
        let (head_exclusions, _) = partition(self.recurrence.exclusions(), boundary);

        let mut head = self.recurrence.clone();
        head.set_rule(Some(head_rule))?;
        head.set_additions(head_additions)?;
        head.set_exclusions(head_exclusions)?;
        head.validate()?;

        self.recurrence = head;
        self.overrides
            .retain(|child| child.recurrence_id.is_some_and(|id| id < *boundary));
        self.sequence += 1;
        tracing::debug!(uid = %self.uid, boundary = %boundary, "deleted this and future");
        Ok(())
    }

    /// The rule and the boundary's ordinal in it, for edits that cut the
    /// series at `boundary`.
    fn check_boundary(&mut self, boundary: &Temporal) -> Result<(RecurrenceRule, u64)> {
        boundary.ensure_kind(self.start().kind())?;
        let rule = self.recurrence.rule().cloned().ok_or_else(|| {
            RecurrenceError::InvalidEdit(format!("series {} does not repeat", self.uid))
        })?;
        if boundary <= self.start() {
            return Err(RecurrenceError::InvalidEdit(format!(
                "{boundary} is not after the series start {}",
                self.start()
            )));
        }
        if self
            .recurrence
            .exclusions()
            .is_some_and(|set| set.contains(boundary))
        {
            return Err(RecurrenceError::InvalidEdit(format!(
                "{boundary} is excluded from series {}",
                self.uid
            )));
        }
        let ordinal = self.recurrence.rule_ordinal(boundary)?.ok_or_else(|| {
            RecurrenceError::InvalidEdit(format!(
                "{boundary} is not an occurrence of series {}",
                self.uid
            ))
        })?;
        Ok((rule, ordinal))
    }
}

/// Values before `boundary`, and the rest.
fn partition(values: Option<&BTreeSet<Temporal>>, boundary: &Temporal) -> (Vec<Temporal>, Vec<Temporal>) {
    values
        .into_iter()
        .flatten()
        .copied()
        .partition(|value| value < boundary)
}
