//! End-to-end properties of the recompute engine, exercised through the public API

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use synheart_body::{
    BmiSource, DerivedMetric, InMemoryStore, MetricStore, RawMetric, RecomputeEngine, Sample,
    SharedEngine, StandardFormulas,
};

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + Duration::days(n)
}

fn engine() -> RecomputeEngine {
    RecomputeEngine::new(InMemoryStore::new(), StandardFormulas::default())
}

fn derived_series(engine: &RecomputeEngine, metric: DerivedMetric) -> Vec<Sample> {
    engine.store().query(metric.into()).unwrap()
}

fn derived_at(engine: &RecomputeEngine, at: DateTime<Utc>) -> Vec<Sample> {
    DerivedMetric::ALL
        .iter()
        .flat_map(|m| derived_series(engine, *m))
        .filter(|s| s.timestamp == at)
        .collect()
}

#[test]
fn recompute_twice_equals_once() {
    let mut engine = engine();
    engine.on_raw_changed(RawMetric::Height, 172.0, day(0)).unwrap();
    engine.on_raw_changed(RawMetric::BodyFat, 21.0, day(2)).unwrap();
    engine.on_raw_changed(RawMetric::Weight, 74.3, day(1)).unwrap();

    engine.recompute_for_date(day(1)).unwrap();
    let once: Vec<_> = DerivedMetric::ALL.iter().map(|m| derived_series(&engine, *m)).collect();

    engine.recompute_for_date(day(1)).unwrap();
    let twice: Vec<_> = DerivedMetric::ALL.iter().map(|m| derived_series(&engine, *m)).collect();

    assert_eq!(once, twice);
    assert_eq!(derived_at(&engine, day(1)).len(), DerivedMetric::ALL.len());
}

#[test]
fn rebuild_depends_only_on_final_raw_data() {
    let mut forward = engine();
    forward.on_raw_changed(RawMetric::Weight, 80.0, day(0)).unwrap();
    forward.on_raw_changed(RawMetric::Height, 180.0, day(0)).unwrap();
    forward.on_raw_changed(RawMetric::Weight, 79.0, day(3)).unwrap();
    forward.on_raw_changed(RawMetric::BodyFat, 22.0, day(4)).unwrap();
    forward.on_raw_changed(RawMetric::Weight, 78.0, day(9)).unwrap();
    forward.on_raw_changed(RawMetric::Waist, 88.0, day(9)).unwrap();

    let mut scrambled = engine();
    scrambled.on_raw_changed(RawMetric::Waist, 88.0, day(9)).unwrap();
    scrambled.on_raw_changed(RawMetric::Weight, 78.0, day(9)).unwrap();
    scrambled.on_raw_changed(RawMetric::BodyFat, 30.0, day(4)).unwrap();
    scrambled.on_raw_changed(RawMetric::Weight, 79.0, day(3)).unwrap();
    // Extra weight that is later deleted
    scrambled.on_raw_changed(RawMetric::Weight, 90.0, day(6)).unwrap();
    scrambled.on_raw_changed(RawMetric::Height, 180.0, day(0)).unwrap();
    scrambled.on_raw_changed(RawMetric::Weight, 80.0, day(0)).unwrap();
    scrambled
        .on_delete(RawMetric::Weight, &Sample::raw(RawMetric::Weight, 90.0, day(6)))
        .unwrap();
    scrambled
        .on_sample_edited(
            RawMetric::BodyFat,
            &Sample::raw(RawMetric::BodyFat, 30.0, day(4)),
            22.0,
            day(4),
        )
        .unwrap();

    let forward_summary = forward.rebuild_all().unwrap();
    let scrambled_summary = scrambled.rebuild_all().unwrap();
    assert_eq!(forward_summary, scrambled_summary);

    for metric in DerivedMetric::ALL {
        assert_eq!(
            derived_series(&forward, metric),
            derived_series(&scrambled, metric),
            "{metric:?} diverged"
        );
    }
}

#[test]
fn companion_falls_back_outside_window() {
    let mut engine = engine();
    engine.on_raw_changed(RawMetric::Weight, 70.0, day(0)).unwrap();
    engine.on_raw_changed(RawMetric::Height, 175.0, day(100)).unwrap();

    let height = engine.companion(RawMetric::Height, day(0)).unwrap().unwrap();
    assert_eq!(height.value, 175.0);
    assert_eq!(height.timestamp, day(100));
    assert!(!height.in_window);

    let bmi = derived_series(&engine, DerivedMetric::Bmi);
    assert_eq!(bmi.len(), 1);
    assert_eq!(bmi[0].timestamp, day(0));
    assert_eq!(
        bmi[0].source,
        Some(BmiSource {
            source_weight: 70.0,
            source_height: 175.0
        })
    );
}

#[test]
fn companion_prefers_closer_sample_in_window() {
    let mut engine = engine();
    engine.on_raw_changed(RawMetric::Height, 170.0, day(0)).unwrap();
    engine.on_raw_changed(RawMetric::Height, 180.0, day(2)).unwrap();

    let closer = engine
        .companion(RawMetric::Height, day(1) + Duration::hours(1))
        .unwrap()
        .unwrap();
    assert_eq!(closer.value, 180.0);
    assert!(closer.in_window);

    // Both exactly 24h away: the earlier sample wins
    let tied = engine.companion(RawMetric::Height, day(1)).unwrap().unwrap();
    assert_eq!(tied.value, 170.0);
    assert_eq!(tied.distance_secs, 24 * 3600);
    assert!(tied.in_window);
}

#[test]
fn weight_edit_leaves_other_dates_alone() {
    let mut engine = engine();
    engine.on_raw_changed(RawMetric::Height, 176.0, day(0)).unwrap();
    engine.on_raw_changed(RawMetric::BodyFat, 19.0, day(0)).unwrap();
    engine.on_raw_changed(RawMetric::Weight, 75.0, day(1)).unwrap();
    engine.on_raw_changed(RawMetric::Weight, 74.0, day(5)).unwrap();
    engine.on_raw_changed(RawMetric::Weight, 73.0, day(10)).unwrap();

    let before_day1 = derived_at(&engine, day(1));
    let before_day10 = derived_at(&engine, day(10));
    let before_day5 = derived_at(&engine, day(5));

    engine
        .on_sample_edited(
            RawMetric::Weight,
            &Sample::raw(RawMetric::Weight, 74.0, day(5)),
            76.5,
            day(5),
        )
        .unwrap();

    assert_eq!(derived_at(&engine, day(1)), before_day1);
    assert_eq!(derived_at(&engine, day(10)), before_day10);

    let after_day5 = derived_at(&engine, day(5));
    assert_eq!(after_day5.len(), before_day5.len());
    assert_ne!(after_day5, before_day5);
}

#[test]
fn deleting_only_weight_clears_its_date() {
    let mut engine = engine();
    engine.on_raw_changed(RawMetric::Height, 175.0, day(0)).unwrap();
    engine.on_raw_changed(RawMetric::BodyFat, 20.0, day(0)).unwrap();
    engine.on_raw_changed(RawMetric::Weight, 71.0, day(1)).unwrap();
    engine.on_raw_changed(RawMetric::Weight, 70.0, day(5)).unwrap();
    assert_eq!(derived_at(&engine, day(5)).len(), DerivedMetric::ALL.len());

    engine
        .on_delete(RawMetric::Weight, &Sample::raw(RawMetric::Weight, 70.0, day(5)))
        .unwrap();

    assert!(derived_at(&engine, day(5)).is_empty());
    assert_eq!(derived_at(&engine, day(1)).len(), DerivedMetric::ALL.len());

    // The lazy rebuild on read does not bring it back
    assert!(engine
        .history(DerivedMetric::Bmi)
        .iter()
        .all(|s| s.timestamp != day(5)));
}

#[test]
fn bmi_for_matching_weight_and_height() {
    let mut engine = engine();
    let t = day(0);
    engine.on_raw_changed(RawMetric::Weight, 70.0, t).unwrap();
    engine.on_raw_changed(RawMetric::Height, 175.0, t).unwrap();

    let bmi = engine.history(DerivedMetric::Bmi);
    assert_eq!(bmi.len(), 1);
    assert_eq!(bmi[0].timestamp, t);
    assert!((bmi[0].value - 70.0 / (1.75 * 1.75)).abs() < 1e-9);
    assert_eq!(format!("{:.2}", bmi[0].value), "22.86");
    assert_eq!(
        bmi[0].source,
        Some(BmiSource {
            source_weight: 70.0,
            source_height: 175.0
        })
    );
}

#[test]
fn shared_engine_persists_through_store_round_trip() {
    let shared = SharedEngine::new(engine());
    shared.on_raw_changed(RawMetric::Height, 168.0, day(0)).unwrap();
    shared.on_raw_input(RawMetric::Weight, "61.4", day(0)).unwrap();

    let json = shared.with(|engine| Ok(engine.store().to_json()?)).unwrap();
    let mut reloaded = RecomputeEngine::new(
        InMemoryStore::from_json(&json).unwrap(),
        StandardFormulas::default(),
    );

    assert_eq!(reloaded.history(DerivedMetric::Bmi), shared.history(DerivedMetric::Bmi));
}
