//! Tests for rule expansion: period anchoring, COUNT/UNTIL accounting,
//! reentry, DST handling and the string-facing `expand_rrule` entry point.

use recurrence_engine::{
    expand_rrule, Frequency, RecurrenceError, RecurrenceRule, ReentryPoint, Temporal, TemporalKind,
};

fn t(value: &str) -> Temporal {
    value.parse().unwrap()
}

fn rule(value: &str) -> RecurrenceRule {
    value.parse().unwrap()
}

fn render(values: &[Temporal]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Basic frequencies
// ---------------------------------------------------------------------------

#[test]
fn daily_limit_five() {
    let r = rule("FREQ=DAILY");
    let got: Vec<Temporal> = r
        .occurrences(&t("20151109T100000"))
        .unwrap()
        .take(5)
        .collect();
    assert_eq!(
        render(&got),
        vec![
            "20151109T100000",
            "20151110T100000",
            "20151111T100000",
            "20151112T100000",
            "20151113T100000",
        ]
    );
}

#[test]
fn daily_interval_three_count_six() {
    let r = rule("FREQ=DAILY;INTERVAL=3;COUNT=6");
    let mut iter = r.occurrences(&t("20151109T100000")).unwrap();
    let got: Vec<Temporal> = iter.by_ref().take(6).collect();
    assert_eq!(
        render(&got),
        vec![
            "20151109T100000",
            "20151112T100000",
            "20151115T100000",
            "20151118T100000",
            "20151121T100000",
            "20151124T100000",
        ]
    );
    assert_eq!(iter.next(), None, "7th call must yield nothing");
    assert_eq!(iter.next(), None, "iterator is fused");
}

#[test]
fn monthly_negative_month_day() {
    let r = rule("FREQ=MONTHLY;BYMONTHDAY=-2");
    let got: Vec<Temporal> = r
        .occurrences(&t("20151109T100000"))
        .unwrap()
        .take(5)
        .collect();
    assert_eq!(
        render(&got),
        vec![
            "20151129T100000",
            "20151230T100000",
            "20160130T100000",
            "20160228T100000",
            "20160330T100000",
        ]
    );
}

#[test]
fn biweekly_mon_wed_fri_from_seed() {
    let r = rule("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE,FR");
    let got: Vec<Temporal> = r
        .occurrences_from(&t("20151109T100000"), &t("20151220T000000"))
        .unwrap()
        .take(4)
        .collect();
    assert_eq!(
        render(&got),
        vec![
            "20151221T100000",
            "20151223T100000",
            "20151225T100000",
            "20160104T100000",
        ]
    );
}

#[test]
fn hourly_and_minutely_step_wall_clock() {
    let hourly: Vec<Temporal> = rule("FREQ=HOURLY;INTERVAL=5")
        .occurrences(&t("20240101T220000"))
        .unwrap()
        .take(3)
        .collect();
    assert_eq!(
        render(&hourly),
        vec!["20240101T220000", "20240102T030000", "20240102T080000"]
    );

    let minutely: Vec<Temporal> = rule("FREQ=MINUTELY;INTERVAL=90;COUNT=3")
        .occurrences(&t("20240101T230000"))
        .unwrap()
        .collect();
    assert_eq!(
        render(&minutely),
        vec!["20240101T230000", "20240102T003000", "20240102T020000"]
    );
}

#[test]
fn secondly_with_filters_skips_ahead() {
    // Only seconds 0 and 30 of minute 5 of hour 9 qualify.
    let got: Vec<Temporal> = rule("FREQ=SECONDLY;BYHOUR=9;BYMINUTE=5;BYSECOND=0,30")
        .occurrences(&t("20240101T090500"))
        .unwrap()
        .take(4)
        .collect();
    assert_eq!(
        render(&got),
        vec![
            "20240101T090500",
            "20240101T090530",
            "20240102T090500",
            "20240102T090530",
        ]
    );
}

// ---------------------------------------------------------------------------
// Anchoring: periods are computed from the start, never accumulated
// ---------------------------------------------------------------------------

#[test]
fn monthly_on_the_31st_skips_short_months() {
    let got: Vec<Temporal> = rule("FREQ=MONTHLY;COUNT=4")
        .occurrences(&t("20250131T090000"))
        .unwrap()
        .collect();
    assert_eq!(
        render(&got),
        vec![
            "20250131T090000",
            "20250331T090000",
            "20250531T090000",
            "20250731T090000",
        ]
    );
}

#[test]
fn yearly_leap_day_only_in_leap_years() {
    let got: Vec<Temporal> = rule("FREQ=YEARLY;COUNT=3")
        .occurrences(&t("20240229"))
        .unwrap()
        .collect();
    assert_eq!(render(&got), vec!["20240229", "20280229", "20320229"]);
}

#[test]
fn monthly_by_day_still_fires_in_short_months() {
    // Anchor on the 31st but BYDAY picks the day, so February is not skipped.
    let got: Vec<Temporal> = rule("FREQ=MONTHLY;BYDAY=-1FR;COUNT=3")
        .occurrences(&t("20250131T120000"))
        .unwrap()
        .collect();
    assert_eq!(
        render(&got),
        vec!["20250131T120000", "20250228T120000", "20250328T120000"]
    );
}

#[test]
fn yearly_year_days_are_kept_inside_by_month() {
    // Days 60, 64 and 75 are Mar 1, 5 and 16 in a common year; in a leap
    // year day 60 is Feb 29 and falls outside BYMONTH.
    let r = rule("FREQ=YEARLY;BYMONTH=3;BYYEARDAY=60,64,75;COUNT=4");
    let got: Vec<Temporal> = r.occurrences(&t("20150105")).unwrap().collect();
    assert_eq!(
        render(&got),
        vec!["20150301", "20150305", "20150316", "20160304"]
    );

    let got: Vec<Temporal> = r.occurrences(&t("20240229")).unwrap().collect();
    assert_eq!(
        render(&got),
        vec!["20240304", "20240315", "20250301", "20250305"]
    );
}

#[test]
fn start_not_matching_rule_is_not_produced() {
    // 2015-11-10 is a Tuesday.
    let got: Vec<Temporal> = rule("FREQ=WEEKLY;BYDAY=MO")
        .occurrences(&t("20151110T100000"))
        .unwrap()
        .take(2)
        .collect();
    assert_eq!(render(&got), vec!["20151116T100000", "20151123T100000"]);
}

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

#[test]
fn until_is_inclusive() {
    let got: Vec<Temporal> = rule("FREQ=DAILY;UNTIL=20240103T090000")
        .occurrences(&t("20240101T090000"))
        .unwrap()
        .collect();
    assert_eq!(
        render(&got),
        vec!["20240101T090000", "20240102T090000", "20240103T090000"]
    );
}

#[test]
fn until_in_utc_bounds_zoned_series() {
    // 09:00 in New York is 13:00Z in summer; UNTIL sits between the 2nd and 3rd.
    let got: Vec<Temporal> = rule("FREQ=DAILY;UNTIL=20240702T140000Z")
        .occurrences(&t("TZID=America/New_York:20240701T090000"))
        .unwrap()
        .collect();
    assert_eq!(got.len(), 2);
    assert_eq!(got[1], t("20240702T130000Z"));
}

#[test]
fn until_of_other_kind_is_a_type_mismatch() {
    let r = rule("FREQ=DAILY;UNTIL=20240110");
    let err = r.occurrences(&t("20240101T090000")).unwrap_err();
    assert_eq!(
        err,
        RecurrenceError::TypeMismatch {
            expected: TemporalKind::Local,
            found: TemporalKind::Date,
        }
    );
}

#[test]
fn count_is_kept_when_seeded_after_start() {
    let r = rule("FREQ=DAILY;COUNT=5");
    let got: Vec<Temporal> = r
        .occurrences_from(&t("20240101"), &t("20240104"))
        .unwrap()
        .collect();
    assert_eq!(render(&got), vec!["20240104", "20240105"]);
}

#[test]
fn empty_periods_do_not_consume_count() {
    // Feb 30 never exists; only March-like months produce.
    let got: Vec<Temporal> = rule("FREQ=MONTHLY;BYMONTHDAY=30;COUNT=3")
        .occurrences(&t("20250130"))
        .unwrap()
        .collect();
    assert_eq!(render(&got), vec!["20250130", "20250330", "20250430"]);
}

#[test]
fn rules_that_never_match_end_without_values() {
    for (text, start) in [
        ("FREQ=MONTHLY;INTERVAL=12;BYMONTH=2", "20260115"),
        ("FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=30", "20260101"),
        ("FREQ=YEARLY;INTERVAL=400;BYMONTH=2;BYMONTHDAY=29", "20010101"),
        ("FREQ=DAILY;BYMONTH=4;BYMONTHDAY=31", "20260101"),
    ] {
        assert_eq!(rule(text).occurrences(&t(start)).unwrap().next(), None, "{text}");
    }
    let got = expand_rrule("FREQ=MONTHLY;INTERVAL=12;BYMONTH=2", "20260115", &[], &[], None, 5)
        .unwrap();
    assert!(got.is_empty());
}

#[test]
fn sparse_rules_are_not_cut_short() {
    let got: Vec<Temporal> = rule("FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=29")
        .occurrences(&t("20960101"))
        .unwrap()
        .take(2)
        .collect();
    // 2100 is not a leap year.
    assert_eq!(render(&got), vec!["20960229", "21040229"]);
}

#[test]
fn expansion_stops_after_year_9999() {
    let got: Vec<Temporal> = rule("FREQ=YEARLY;INTERVAL=1000")
        .occurrences(&t("79990101"))
        .unwrap()
        .collect();
    assert_eq!(render(&got), vec!["79990101", "89990101", "99990101"]);
}

// ---------------------------------------------------------------------------
// Reentry
// ---------------------------------------------------------------------------

#[test]
fn resume_continues_ordinals_for_count() {
    let r = rule("FREQ=WEEKLY;BYDAY=TU,TH;COUNT=6");
    let start = t("20260106T100000");
    let all: Vec<Temporal> = r.occurrences(&start).unwrap().collect();
    assert_eq!(all.len(), 6);

    let point = ReentryPoint::new(all[3], 3);
    let mut resumed = r.resume(&start, &point).unwrap();
    let rest: Vec<Temporal> = resumed.by_ref().collect();
    assert_eq!(rest, all[3..].to_vec());
    assert_eq!(resumed.consumed(), 6);
}

#[test]
fn consumed_reports_ordinal_plus_one() {
    let r = rule("FREQ=DAILY");
    let mut iter = r.occurrences(&t("20240101")).unwrap();
    iter.next();
    iter.next();
    assert_eq!(iter.consumed(), 2);
}

#[test]
fn restarting_from_same_seed_is_idempotent() {
    let r = rule("FREQ=MONTHLY;BYDAY=2TU,-1FR");
    let start = t("20240109T080000");
    let seed = t("20240601T000000");
    let a: Vec<Temporal> = r.occurrences_from(&start, &seed).unwrap().take(10).collect();
    let b: Vec<Temporal> = r.occurrences_from(&start, &seed).unwrap().take(10).collect();
    assert_eq!(a, b);
    assert!(a.iter().all(|v| *v >= seed));
}

// ---------------------------------------------------------------------------
// Time zones
// ---------------------------------------------------------------------------

#[test]
fn nonexistent_local_time_is_dropped_without_counting() {
    // 2026-03-08 02:30 does not exist in New York (spring forward).
    let got: Vec<Temporal> = rule("FREQ=DAILY;COUNT=4")
        .occurrences(&t("TZID=America/New_York:20260306T023000"))
        .unwrap()
        .collect();
    assert_eq!(
        render(&got),
        vec![
            "TZID=America/New_York:20260306T023000",
            "TZID=America/New_York:20260307T023000",
            "TZID=America/New_York:20260309T023000",
            "TZID=America/New_York:20260310T023000",
        ]
    );
}

#[test]
fn ambiguous_local_time_takes_earlier_offset() {
    // 2026-11-01 01:30 happens twice in New York; EDT (-04:00) comes first.
    let got: Vec<Temporal> = rule("FREQ=DAILY;COUNT=2")
        .occurrences(&t("TZID=America/New_York:20261031T013000"))
        .unwrap()
        .collect();
    assert_eq!(got[1], t("20261101T053000Z"));
}

#[test]
fn wall_clock_is_kept_across_dst() {
    let got: Vec<Temporal> = rule("FREQ=WEEKLY;COUNT=2")
        .occurrences(&t("TZID=Europe/Berlin:20250324T090000"))
        .unwrap()
        .collect();
    // 09:00 CET = 08:00Z, 09:00 CEST = 07:00Z.
    assert_eq!(got[0], t("20250324T080000Z"));
    assert_eq!(got[1], t("20250331T070000Z"));
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[test]
fn date_start_rejects_sub_daily_rules() {
    let hourly = RecurrenceRule::builder(Frequency::Hourly).build().unwrap();
    assert!(matches!(
        hourly.occurrences(&t("20240101")),
        Err(RecurrenceError::Configuration(_))
    ));
    let with_hours = rule("FREQ=DAILY;BYHOUR=9");
    assert!(matches!(
        with_hours.occurrences(&t("20240101")),
        Err(RecurrenceError::Configuration(_))
    ));
}

#[test]
fn seed_of_other_kind_is_rejected() {
    let r = rule("FREQ=DAILY");
    assert!(matches!(
        r.occurrences_from(&t("20240101"), &t("20240105T000000")),
        Err(RecurrenceError::TypeMismatch { .. })
    ));
}

// ---------------------------------------------------------------------------
// expand_rrule
// ---------------------------------------------------------------------------

#[test]
fn expand_rrule_merges_rdates_and_exdates() {
    let got = expand_rrule(
        "FREQ=WEEKLY;BYDAY=TU",
        "2026-02-17T09:00:00",
        &["2026-02-20T09:00:00"],
        &["2026-02-24T09:00:00"],
        None,
        4,
    )
    .unwrap();
    assert_eq!(
        render(&got),
        vec![
            "20260217T090000",
            "20260220T090000",
            "20260303T090000",
            "20260310T090000",
        ]
    );
}

#[test]
fn expand_rrule_honours_from_and_limit() {
    let got = expand_rrule(
        "FREQ=DAILY",
        "TZID=Asia/Tokyo:20260101T080000",
        &[],
        &[],
        Some("TZID=Asia/Tokyo:20260110T000000"),
        2,
    )
    .unwrap();
    assert_eq!(
        render(&got),
        vec![
            "TZID=Asia/Tokyo:20260110T080000",
            "TZID=Asia/Tokyo:20260111T080000",
        ]
    );
}

#[test]
fn expand_rrule_rejects_bad_input() {
    assert!(matches!(
        expand_rrule("", "20260101", &[], &[], None, 1),
        Err(RecurrenceError::InvalidRule(_))
    ));
    assert!(matches!(
        expand_rrule("FREQ=DAILY", "TZID=Mars/Olympus:20260101T000000", &[], &[], None, 1),
        Err(RecurrenceError::InvalidTimezone(_))
    ));
    assert!(matches!(
        expand_rrule("FREQ=DAILY", "20260101", &["20260102T000000"], &[], None, 1),
        Err(RecurrenceError::TypeMismatch { .. })
    ));
}
