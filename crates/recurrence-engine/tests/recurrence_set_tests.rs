//! Tests for recurrence set assembly: rule + additions - exclusions, window
//! queries, neighbours, ordinals and validation.

use recurrence_engine::{RecurrenceError, RecurrenceRule, RecurrenceSet, Temporal, TemporalKind};

fn t(value: &str) -> Temporal {
    value.parse().unwrap()
}

fn rule(value: &str) -> RecurrenceRule {
    value.parse().unwrap()
}

fn render(values: impl IntoIterator<Item = Temporal>) -> Vec<String> {
    values.into_iter().map(|v| v.to_string()).collect()
}

/// Tuesdays at 09:00 from 2026-02-17.
fn tuesdays() -> RecurrenceSet {
    RecurrenceSet::with_rule(t("20260217T090000"), rule("FREQ=WEEKLY;BYDAY=TU")).unwrap()
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

#[test]
fn single_instance_without_rule() {
    let mut set = RecurrenceSet::new(t("20260301"));
    assert_eq!(render(set.occurrences(None).unwrap()), vec!["20260301"]);
    assert_eq!(set.occurrences(Some(&t("20260302"))).unwrap().next(), None);
    set.validate().unwrap();
}

#[test]
fn additions_merge_in_order() {
    let mut set = tuesdays();
    set.add_addition(t("20260220T090000")).unwrap();
    set.add_addition(t("20260226T120000")).unwrap();
    let got: Vec<Temporal> = set.occurrences(None).unwrap().take(5).collect();
    assert_eq!(
        render(got),
        vec![
            "20260217T090000",
            "20260220T090000",
            "20260224T090000",
            "20260226T120000",
            "20260303T090000",
        ]
    );
}

#[test]
fn addition_equal_to_rule_value_is_yielded_once() {
    let mut set = tuesdays();
    set.add_addition(t("20260224T090000")).unwrap();
    let got: Vec<Temporal> = set.occurrences(None).unwrap().take(3).collect();
    assert_eq!(
        render(got),
        vec!["20260217T090000", "20260224T090000", "20260303T090000"]
    );
}

#[test]
fn exclusions_remove_exact_matches_only() {
    let mut set = tuesdays();
    set.add_exclusion(t("20260224T090000")).unwrap();
    // Same day, different time: not an exact match.
    set.add_exclusion(t("20260303T100000")).unwrap();
    let got: Vec<Temporal> = set.occurrences(None).unwrap().take(3).collect();
    assert_eq!(
        render(got),
        vec!["20260217T090000", "20260303T090000", "20260310T090000"]
    );
}

#[test]
fn exclusions_also_remove_additions() {
    let mut set = tuesdays();
    set.add_addition(t("20260220T090000")).unwrap();
    set.add_exclusion(t("20260220T090000")).unwrap();
    let got: Vec<Temporal> = set.occurrences(None).unwrap().take(2).collect();
    assert_eq!(render(got), vec!["20260217T090000", "20260224T090000"]);
}

#[test]
fn zoned_exclusion_matches_same_instant_in_other_zone() {
    let mut set = RecurrenceSet::with_rule(
        t("TZID=Europe/Berlin:20260105T090000"),
        rule("FREQ=DAILY;COUNT=3"),
    )
    .unwrap();
    set.add_exclusion(t("20260106T080000Z")).unwrap();
    assert_eq!(
        render(set.occurrences(None).unwrap()),
        vec![
            "TZID=Europe/Berlin:20260105T090000",
            "TZID=Europe/Berlin:20260107T090000",
        ]
    );
}

#[test]
fn emptied_collections_become_absent() {
    let mut set = tuesdays();
    set.add_exclusion(t("20260224T090000")).unwrap();
    assert!(set.exclusions().is_some());
    assert!(set.remove_exclusion(&t("20260224T090000")));
    assert!(set.exclusions().is_none());
    assert!(!set.remove_exclusion(&t("20260224T090000")));

    set.set_additions([]).unwrap();
    assert!(set.additions().is_none());
}

// ---------------------------------------------------------------------------
// Kind checks
// ---------------------------------------------------------------------------

#[test]
fn values_of_other_kinds_are_rejected() {
    let mut set = tuesdays();
    let err = set.add_exclusion(t("20260224")).unwrap_err();
    assert_eq!(
        err,
        RecurrenceError::TypeMismatch {
            expected: TemporalKind::Local,
            found: TemporalKind::Date,
        }
    );
    assert!(set.exclusions().is_none());

    assert!(set
        .set_additions([t("20260220T090000"), t("20260221")])
        .is_err());
    assert!(set.additions().is_none());

    assert!(matches!(
        set.occurrences(Some(&t("20260301T090000Z"))),
        Err(RecurrenceError::TypeMismatch { .. })
    ));
}

#[test]
fn changing_start_kind_with_stored_values_fails() {
    let mut set = tuesdays();
    set.add_addition(t("20260220T090000")).unwrap();
    assert!(matches!(
        set.set_start(t("20260217")),
        Err(RecurrenceError::TypeMismatch { .. })
    ));
    assert_eq!(set.start(), &t("20260217T090000"));
}

// ---------------------------------------------------------------------------
// Window queries
// ---------------------------------------------------------------------------

#[test]
fn from_is_inclusive_and_clamped_to_start() {
    let mut set = tuesdays();
    let got: Vec<Temporal> = set.occurrences(Some(&t("20260303T090000"))).unwrap().take(2).collect();
    assert_eq!(render(got), vec!["20260303T090000", "20260310T090000"]);

    let early: Vec<Temporal> = set.occurrences(Some(&t("20250101T000000"))).unwrap().take(1).collect();
    assert_eq!(render(early), vec!["20260217T090000"]);
}

#[test]
fn additions_before_from_are_skipped() {
    let mut set = tuesdays();
    set.add_addition(t("20260220T090000")).unwrap();
    set.add_addition(t("20260305T090000")).unwrap();
    let got: Vec<Temporal> = set.occurrences(Some(&t("20260301T000000"))).unwrap().take(3).collect();
    assert_eq!(
        render(got),
        vec!["20260303T090000", "20260305T090000", "20260310T090000"]
    );
}

#[test]
fn moving_window_back_and_forth() {
    let mut set = tuesdays();
    let windows = ["20270101T000000", "20260401T000000", "20280615T000000", "20260217T090000"];
    for from in windows {
        let from = t(from);
        let cached: Vec<Temporal> = set.occurrences(Some(&from)).unwrap().take(10).collect();
        let uncached: Vec<Temporal> = set.occurrences_uncached(Some(&from)).unwrap().take(10).collect();
        assert_eq!(cached, uncached, "window from {from}");
        assert!(cached[0] >= from);
    }
}

// ---------------------------------------------------------------------------
// Neighbours, membership and ordinals
// ---------------------------------------------------------------------------

#[test]
fn next_and_previous_occurrence() {
    let mut set = tuesdays();
    set.add_exclusion(t("20260303T090000")).unwrap();

    assert_eq!(
        set.next_occurrence(&t("20260224T090000")).unwrap(),
        Some(t("20260310T090000"))
    );
    assert_eq!(
        set.previous_occurrence(&t("20260310T090000")).unwrap(),
        Some(t("20260224T090000"))
    );
    assert_eq!(set.previous_occurrence(&t("20260217T090000")).unwrap(), None);
    assert_eq!(
        set.previous_occurrence(&t("20260217T090001")).unwrap(),
        Some(t("20260217T090000"))
    );
}

#[test]
fn previous_occurrence_far_from_start() {
    let mut set = tuesdays();
    // Warm the cache around a far window first.
    let _ = set.occurrences(Some(&t("20300101T000000"))).unwrap().next();
    assert_eq!(
        set.previous_occurrence(&t("20290101T000000")).unwrap(),
        Some(t("20281226T090000"))
    );
}

#[test]
fn next_occurrence_past_the_end() {
    let mut set = RecurrenceSet::with_rule(t("20260217T090000"), rule("FREQ=WEEKLY;COUNT=2")).unwrap();
    assert_eq!(set.next_occurrence(&t("20260224T090000")).unwrap(), None);
}

#[test]
fn contains_and_rule_ordinal() {
    let mut set = tuesdays();
    set.add_addition(t("20260220T090000")).unwrap();
    set.add_exclusion(t("20260303T090000")).unwrap();

    assert!(set.contains(&t("20260224T090000")).unwrap());
    assert!(set.contains(&t("20260220T090000")).unwrap());
    assert!(!set.contains(&t("20260303T090000")).unwrap());
    assert!(!set.contains(&t("20260225T090000")).unwrap());

    // Ordinals count rule values only.
    assert_eq!(set.rule_ordinal(&t("20260224T090000")).unwrap(), Some(1));
    assert_eq!(set.rule_ordinal(&t("20260303T090000")).unwrap(), Some(2));
    assert_eq!(set.rule_ordinal(&t("20260220T090000")).unwrap(), None);
    assert_eq!(set.rule_ordinal(&t("20270105T090000")).unwrap(), Some(46));
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn start_must_be_first_occurrence() {
    // 2026-02-18 is a Wednesday.
    let set = RecurrenceSet::with_rule(t("20260218T090000"), rule("FREQ=WEEKLY;BYDAY=TU")).unwrap();
    assert!(matches!(set.validate(), Err(RecurrenceError::Validation(_))));

    let mut with_addition = tuesdays();
    with_addition.add_addition(t("20260216T090000")).unwrap();
    assert!(matches!(
        with_addition.validate(),
        Err(RecurrenceError::Validation(_))
    ));
}

#[test]
fn excluded_start_is_allowed() {
    let mut set = tuesdays();
    set.add_exclusion(t("20260217T090000")).unwrap();
    set.validate().unwrap();
    assert_eq!(
        set.occurrences(None).unwrap().next(),
        Some(t("20260224T090000"))
    );
}

#[test]
fn fully_excluded_set_is_empty() {
    let mut set = RecurrenceSet::with_rule(t("20260217T090000"), rule("FREQ=WEEKLY;COUNT=2")).unwrap();
    set.set_exclusions([t("20260217T090000"), t("20260224T090000")]).unwrap();
    assert_eq!(set.validate(), Err(RecurrenceError::EmptyRecurrenceSet));
}

#[test]
fn rule_that_never_matches_is_empty() {
    let set = RecurrenceSet::with_rule(t("20260115"), rule("FREQ=MONTHLY;INTERVAL=12;BYMONTH=2"))
        .unwrap();
    assert_eq!(set.validate(), Err(RecurrenceError::EmptyRecurrenceSet));
    assert_eq!(set.occurrences_uncached(None).unwrap().next(), None);
}

#[test]
fn equality_ignores_cache_state() {
    let mut a = tuesdays();
    let b = tuesdays();
    let _ = a.occurrences(Some(&t("20270101T000000"))).unwrap().next();
    assert!(a.cache().is_some());
    assert_eq!(a, b);
}
