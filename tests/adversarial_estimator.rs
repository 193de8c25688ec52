//! Adversarial Property-Based Tests for Uptime Estimation
//!
//! # Attack Plan
//!
//! 1. **Timezone Edges**: Reference instants straddling DST transitions in
//!    zones with 1h, 30min and no DST, and zones with odd offsets.
//!
//! 2. **Schedule Edges**: Overnight spans, zero-length spans (all day),
//!    overlapping spans, days with no rows at all.
//!
//! 3. **Sample Noise**: Duplicate timestamps, conflicting statuses at the
//!    same instant, polls far outside every window, other stores' polls.
//!
//! # Invariants
//!
//! - estimate() never panics
//! - uptime + downtime == business time, per window
//! - business time never exceeds the window length
//! - Input order of polls does not change the result
//! - Polls from other stores do not change the result

use proptest::prelude::*;

use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use storewatch::calendar::BusinessCalendar;
use storewatch::estimator::estimate;
use storewatch::model::{
    BusinessInterval, PollSample, Status, StoreId, StoreLookup, StoreProfile, WindowKind,
};

const DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

// ============================================================================
// ADVERSARIAL GENERATORS
// ============================================================================

fn zone() -> impl Strategy<Value = Tz> {
    prop_oneof![
        Just(Tz::UTC),
        Just(chrono_tz::America::Chicago),
        Just(chrono_tz::America::New_York),
        Just(chrono_tz::Europe::London),
        Just(chrono_tz::Australia::Lord_Howe), // 30 minute DST shift
        Just(chrono_tz::Asia::Kathmandu),      // +05:45
        Just(chrono_tz::Pacific::Chatham),     // +12:45 / +13:45
    ]
}

/// Instants around the 2023 US and EU spring/fall transitions
fn reference() -> impl Strategy<Value = DateTime<Utc>> {
    let anchors = [
        Utc.with_ymd_and_hms(2023, 3, 12, 8, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2023, 3, 26, 1, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2023, 4, 1, 15, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2023, 10, 29, 1, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2023, 11, 5, 7, 0, 0).unwrap(),
    ];
    (0usize..anchors.len(), -36i64 * 60..36 * 60)
        .prop_map(move |(i, minutes)| anchors[i] + TimeDelta::minutes(minutes))
}

fn local_time() -> impl Strategy<Value = NaiveTime> {
    (0u32..24, prop_oneof![Just(0u32), Just(15), Just(30), Just(59)])
        .prop_map(|(h, m)| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN))
}

fn calendar_for(store: &'static str) -> impl Strategy<Value = BusinessCalendar> {
    (
        zone(),
        prop::collection::vec((0usize..7, local_time(), local_time()), 0..12),
    )
        .prop_map(move |(tz, rows)| {
            let mut cal = BusinessCalendar::new();
            cal.insert_profile(StoreProfile {
                store_id: StoreId::new(store),
                timezone: tz,
            });
            for (day, open, close) in rows {
                cal.insert_interval(BusinessInterval {
                    store_id: StoreId::new(store),
                    day: DAYS[day],
                    open,
                    close,
                });
            }
            cal
        })
}

/// Polls within ±9 days of the reference, including duplicates
fn polls(store: &'static str, reference: DateTime<Utc>) -> impl Strategy<Value = Vec<PollSample>> {
    prop::collection::vec((-9i64 * 24 * 60..2 * 60, any::<bool>()), 0..50).prop_map(move |raw| {
        raw.into_iter()
            .map(|(minute, active)| PollSample {
                store_id: StoreId::new(store),
                timestamp_utc: reference + TimeDelta::minutes(minute),
                status: if active { Status::Active } else { Status::Inactive },
            })
            .collect()
    })
}

fn scenario() -> impl Strategy<Value = (BusinessCalendar, DateTime<Utc>, Vec<PollSample>)> {
    (calendar_for("s"), reference())
        .prop_flat_map(|(cal, reference)| (Just(cal), Just(reference), polls("s", reference)))
}

// ============================================================================
// INVARIANT: CONSERVATION AND BOUNDS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_tallies_are_conserved_and_bounded((cal, reference, samples) in scenario()) {
        let est = estimate(&StoreId::new("s"), &samples, &cal, reference);
        prop_assert_eq!(est.lookup, StoreLookup::Found);

        for kind in WindowKind::ALL {
            let tally = est.tally(kind);
            prop_assert!(tally.uptime >= TimeDelta::zero());
            prop_assert!(tally.downtime >= TimeDelta::zero());
            prop_assert_eq!(tally.uptime + tally.downtime, tally.business);
            prop_assert!(tally.business <= kind.length());
        }

        let report = est.to_report();
        prop_assert!(report.uptime_last_hour + report.downtime_last_hour <= 60.0 + 1e-9);
        prop_assert!(report.uptime_last_day + report.downtime_last_day <= 24.0 + 1e-9);
        prop_assert!(report.uptime_last_week + report.downtime_last_week <= 168.0 + 1e-9);
    }

    #[test]
    fn prop_poll_order_is_irrelevant((cal, reference, samples) in scenario()) {
        let forward = estimate(&StoreId::new("s"), &samples, &cal, reference);
        let mut reversed = samples.clone();
        reversed.reverse();
        let backward = estimate(&StoreId::new("s"), &reversed, &cal, reference);
        prop_assert_eq!(forward.to_report(), backward.to_report());
    }

    #[test]
    fn prop_other_stores_are_ignored(
        (cal, reference, samples) in scenario(),
        noise in prop::collection::vec((-9i64 * 24 * 60..60, any::<bool>()), 0..30),
    ) {
        let alone = estimate(&StoreId::new("s"), &samples, &cal, reference);

        let mut mixed = samples.clone();
        mixed.extend(noise.into_iter().map(|(minute, active)| PollSample {
            store_id: StoreId::new("other"),
            timestamp_utc: reference + TimeDelta::minutes(minute),
            status: if active { Status::Active } else { Status::Inactive },
        }));
        let together = estimate(&StoreId::new("s"), &mixed, &cal, reference);

        prop_assert_eq!(alone.to_report(), together.to_report());
    }

    #[test]
    fn prop_no_polls_means_fully_up((cal, reference, _samples) in scenario()) {
        let est = estimate(&StoreId::new("s"), &[], &cal, reference);
        for kind in WindowKind::ALL {
            let tally = est.tally(kind);
            prop_assert_eq!(tally.uptime, tally.business);
            prop_assert_eq!(tally.downtime, TimeDelta::zero());
        }
    }
}

// ============================================================================
// FIXED EDGE CASES
// ============================================================================

fn chicago_store(open: NaiveTime, close: NaiveTime) -> BusinessCalendar {
    let mut cal = BusinessCalendar::new();
    cal.insert_profile(StoreProfile {
        store_id: StoreId::new("c"),
        timezone: chrono_tz::America::Chicago,
    });
    for day in DAYS {
        cal.insert_interval(BusinessInterval {
            store_id: StoreId::new("c"),
            day,
            open,
            close,
        });
    }
    cal
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

#[test]
fn test_spring_forward_day_is_23_hours() {
    // Open all day; 2023-03-12 in Chicago has only 23 hours
    let cal = chicago_store(NaiveTime::MIN, NaiveTime::MIN);
    // Local midnight 2023-03-13 is 05:00 UTC (CDT)
    let reference = Utc.with_ymd_and_hms(2023, 3, 13, 5, 0, 0).unwrap();
    let est = estimate(&StoreId::new("c"), &[], &cal, reference);
    // The trailing day is a fixed 24 hours of wall time, all of it open
    assert_eq!(est.last_day.business, TimeDelta::hours(24));
}

#[test]
fn test_span_crossing_spring_gap_loses_an_hour() {
    // 01:00-04:00 local on the spring-forward night is two real hours
    let cal = chicago_store(hm(1, 0), hm(4, 0));
    // 01:00 CST is 07:00 UTC and 04:00 CDT is 09:00 UTC; the previous
    // night's span (07:00-10:00 UTC on the 11th) falls before the window
    let reference = Utc.with_ymd_and_hms(2023, 3, 12, 12, 0, 0).unwrap();
    let est = estimate(&StoreId::new("c"), &[], &cal, reference);
    assert_eq!(est.last_day.business, TimeDelta::hours(2));
}

#[test]
fn test_span_crossing_fall_back_gains_an_hour() {
    // 00:00-03:00 local on the fall-back night is four real hours
    let cal = chicago_store(hm(0, 0), hm(3, 0));
    // 03:00 CST on 2023-11-05 is 09:00 UTC
    let reference = Utc.with_ymd_and_hms(2023, 11, 5, 9, 0, 0).unwrap();
    let est = estimate(&StoreId::new("c"), &[], &cal, reference);
    assert_eq!(est.last_day.business, TimeDelta::hours(4));
}

#[test]
fn test_conflicting_polls_at_same_instant() {
    let cal = chicago_store(NaiveTime::MIN, NaiveTime::MIN);
    let at = Utc.with_ymd_and_hms(2023, 1, 25, 12, 0, 0).unwrap();
    let samples = vec![
        PollSample {
            store_id: StoreId::new("c"),
            timestamp_utc: at,
            status: Status::Inactive,
        },
        PollSample {
            store_id: StoreId::new("c"),
            timestamp_utc: at,
            status: Status::Active,
        },
    ];
    let reference = at + TimeDelta::minutes(30);
    let a = estimate(&StoreId::new("c"), &samples, &cal, reference);
    let b = estimate(
        &StoreId::new("c"),
        &samples.iter().rev().cloned().collect::<Vec<_>>(),
        &cal,
        reference,
    );
    assert_eq!(a.to_report(), b.to_report());
    assert_eq!(a.last_hour.uptime + a.last_hour.downtime, TimeDelta::hours(1));
}

#[test]
fn test_polls_outside_every_window_are_ignored() {
    let cal = chicago_store(NaiveTime::MIN, NaiveTime::MIN);
    let reference = Utc.with_ymd_and_hms(2023, 1, 25, 12, 0, 0).unwrap();
    let samples = vec![
        PollSample {
            store_id: StoreId::new("c"),
            timestamp_utc: reference - TimeDelta::days(30),
            status: Status::Inactive,
        },
        PollSample {
            store_id: StoreId::new("c"),
            timestamp_utc: reference + TimeDelta::hours(1),
            status: Status::Inactive,
        },
    ];
    let est = estimate(&StoreId::new("c"), &samples, &cal, reference);
    assert_eq!(est.last_week.uptime, TimeDelta::days(7));
    assert_eq!(est.last_week.downtime, TimeDelta::zero());
}
