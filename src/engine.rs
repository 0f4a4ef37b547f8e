//! Derived metrics recomputation engine
//!
//! The engine is the only writer of derived series. Every raw mutation goes
//! through one of its entry points, which writes the raw sample and then
//! brings the derived series back in line:
//!
//! - Weight changes recompute only the affected date. Weight on other dates
//!   is independent, so their derived values cannot change.
//! - Height, body fat and circumference changes run a full rebuild. They can
//!   change which companion sample the matching fallback picks for any
//!   weight date in the history.
//! - Reading a derived history rebuilds first (see [`RecomputeEngine::history`]).
//!
//! Each call needs `&mut self`, so a single engine can never run two
//! recomputes at once. Use [`crate::shared::SharedEngine`] to share one
//! across threads.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::MetricsError;
use crate::formulas::{FormulaLibrary, StandardFormulas};
use crate::matching::{find_companion, Companion, DEFAULT_MATCH_WINDOW_HOURS};
use crate::store::{InMemoryStore, MetricStore};
use crate::types::{
    BmiSource, DerivedMetric, MetricName, ProfileSnapshot, RawMetric, Sample,
};

/// Derived values computed for one anchor date, plus the companions used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedSet {
    pub timestamp: DateTime<Utc>,
    pub weight: Option<Companion>,
    pub height: Option<Companion>,
    pub body_fat: Option<Companion>,
    pub samples: Vec<Sample>,
}

impl DerivedSet {
    /// Whether any companion came from the out-of-window fallback
    pub fn used_fallback(&self) -> bool {
        [self.weight, self.height, self.body_fat]
            .iter()
            .flatten()
            .any(|c| !c.in_window)
    }

    pub fn get(&self, metric: DerivedMetric) -> Option<&Sample> {
        self.samples
            .iter()
            .find(|s| s.metric == MetricName::Derived(metric))
    }
}

/// Counts from one full rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildSummary {
    /// Distinct weight timestamps recomputed
    pub anchors: usize,
    /// Derived samples written
    pub samples_written: usize,
    /// Anchors where at least one companion was outside the window
    pub fallback_matches: usize,
}

/// Keeps derived series consistent with raw series
pub struct RecomputeEngine<S = InMemoryStore, F = StandardFormulas> {
    store: S,
    formulas: F,
    match_window: Duration,
    stale: bool,
}

impl RecomputeEngine<InMemoryStore, StandardFormulas> {
    /// Engine with standard formulas configured from `config`
    pub fn from_config(config: &EngineConfig, store: InMemoryStore) -> Result<Self, MetricsError> {
        config.validate()?;
        Ok(RecomputeEngine::new(store, StandardFormulas::new(config.bmr))
            .with_match_window(config.match_window()))
    }
}

impl<S: MetricStore, F: FormulaLibrary> RecomputeEngine<S, F> {
    pub fn new(store: S, formulas: F) -> Self {
        Self {
            store,
            formulas,
            match_window: Duration::hours(DEFAULT_MATCH_WINDOW_HOURS),
            stale: false,
        }
    }

    pub fn with_match_window(mut self, window: Duration) -> Self {
        self.match_window = window;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// True when a raw write succeeded but the recompute after it failed.
    /// Cleared by the next successful [`rebuild_all`](Self::rebuild_all).
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    // ------------------------------------------------------------------
    // Matching and recompute
    // ------------------------------------------------------------------

    /// Companion sample of `metric` for `at`, including its distance
    pub fn companion(&self, metric: RawMetric, at: DateTime<Utc>) -> Result<Option<Companion>, MetricsError> {
        let series = self.store.query(metric.into())?;
        Ok(find_companion(&series, at, self.match_window))
    }

    /// Derived values for `at` computed from already-fetched raw series
    fn derive_at(
        &self,
        at: DateTime<Utc>,
        weights: &[Sample],
        heights: &[Sample],
        body_fats: &[Sample],
    ) -> DerivedSet {
        let weight = find_companion(weights, at, self.match_window);
        let height = find_companion(heights, at, self.match_window);
        let body_fat = find_companion(body_fats, at, self.match_window);

        let mut samples = Vec::new();

        if let Some(w) = weight {
            if let Some(h) = height {
                let bmi = self.formulas.bmi(w.value, h.value);
                samples.push(Sample::derived(DerivedMetric::Bmi, bmi, at).with_source(BmiSource {
                    source_weight: w.value,
                    source_height: h.value,
                }));
                samples.push(Sample::derived(
                    DerivedMetric::BasalMetabolicRate,
                    self.formulas.bmr(w.value, h.value),
                    at,
                ));
                samples.push(Sample::derived(
                    DerivedMetric::BodySurfaceArea,
                    self.formulas.bsa(w.value, h.value),
                    at,
                ));
            }

            if let Some(bf) = body_fat {
                let lean_mass = self.formulas.lean_body_mass(w.value, bf.value);
                samples.push(Sample::derived(DerivedMetric::LeanBodyMass, lean_mass, at));
                samples.push(Sample::derived(
                    DerivedMetric::FatMass,
                    self.formulas.fat_mass(w.value, bf.value),
                    at,
                ));

                if let Some(h) = height {
                    samples.push(Sample::derived(
                        DerivedMetric::FatFreeMassIndex,
                        self.formulas.ffmi(lean_mass, h.value),
                        at,
                    ));
                }
            }
        }

        DerivedSet {
            timestamp: at,
            weight,
            height,
            body_fat,
            samples,
        }
    }

    fn fetch_anchor_series(&self) -> Result<(Vec<Sample>, Vec<Sample>, Vec<Sample>), MetricsError> {
        Ok((
            self.store.query(RawMetric::Weight.into())?,
            self.store.query(RawMetric::Height.into())?,
            self.store.query(RawMetric::BodyFat.into())?,
        ))
    }

    /// Compute derived values for `at` without writing anything
    pub fn preview(&self, at: DateTime<Utc>) -> Result<DerivedSet, MetricsError> {
        let (weights, heights, body_fats) = self.fetch_anchor_series()?;
        Ok(self.derive_at(at, &weights, &heights, &body_fats))
    }

    /// Remove every derived sample dated exactly `at`
    fn clear_derived_at(&mut self, at: DateTime<Utc>) -> Result<usize, MetricsError> {
        let mut removed = 0;
        for metric in DerivedMetric::ALL {
            let name = MetricName::Derived(metric);
            let values: Vec<f64> = self
                .store
                .query(name)?
                .into_iter()
                .filter(|s| s.timestamp == at)
                .map(|s| s.value)
                .collect();
            for value in values {
                removed += self.store.delete_by_identity(name, value, at)?;
            }
        }
        Ok(removed)
    }

    /// Recompute every derived metric for one date.
    ///
    /// No-op when there is no weight at all. Otherwise the derived samples
    /// dated `at` are replaced by exactly the set the current raw data
    /// supports, so calling this twice leaves the store unchanged.
    pub fn recompute_for_date(&mut self, at: DateTime<Utc>) -> Result<DerivedSet, MetricsError> {
        let derived = self.preview(at)?;

        if derived.weight.is_none() {
            debug!(timestamp = %at, "no weight recorded, skipping recompute");
            return Ok(derived);
        }
        if derived.used_fallback() {
            warn!(timestamp = %at, "companion matched outside the window");
        }

        self.clear_derived_at(at)?;
        for sample in &derived.samples {
            self.store.append(sample.clone())?;
        }

        debug!(timestamp = %at, written = derived.samples.len(), "recomputed derived metrics");
        Ok(derived)
    }

    /// Clear every derived series and recompute from every weight sample.
    ///
    /// All derived values are computed before anything is cleared, so a
    /// read failure leaves the previous derived data untouched. A write
    /// failure part-way marks the engine stale; retry the whole rebuild.
    pub fn rebuild_all(&mut self) -> Result<RebuildSummary, MetricsError> {
        let (weights, heights, body_fats) = self.fetch_anchor_series()?;

        let anchors: BTreeSet<DateTime<Utc>> = weights.iter().map(|s| s.timestamp).collect();
        let derived: Vec<DerivedSet> = anchors
            .iter()
            .map(|at| self.derive_at(*at, &weights, &heights, &body_fats))
            .collect();

        self.stale = true;
        for metric in DerivedMetric::ALL {
            self.store.clear_all(metric.into())?;
        }

        let mut summary = RebuildSummary {
            anchors: anchors.len(),
            ..Default::default()
        };
        for set in derived {
            if set.used_fallback() {
                summary.fallback_matches += 1;
            }
            for sample in set.samples {
                self.store.append(sample)?;
                summary.samples_written += 1;
            }
        }
        self.stale = false;

        info!(
            anchors = summary.anchors,
            samples = summary.samples_written,
            fallbacks = summary.fallback_matches,
            "rebuilt derived metrics"
        );
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Mutation entry points
    // ------------------------------------------------------------------

    /// Mark the engine stale if the recompute after a raw write failed
    fn settle<T>(&mut self, result: Result<T, MetricsError>) -> Result<T, MetricsError> {
        if result.is_err() {
            self.stale = true;
        }
        result
    }

    fn write_raw(&mut self, metric: RawMetric, value: f64, at: DateTime<Utc>) -> Result<(), MetricsError> {
        let value = metric.validate(value)?;
        self.store.append(Sample::raw(metric, value, at))?;
        debug!(metric = metric.as_str(), value, timestamp = %at, "recorded raw sample");
        Ok(())
    }

    /// Record a weight and recompute that date only
    pub fn on_weight_changed(&mut self, value: f64, at: DateTime<Utc>) -> Result<(), MetricsError> {
        self.write_raw(RawMetric::Weight, value, at)?;
        let result = self.recompute_for_date(at).map(|_| ());
        self.settle(result)
    }

    /// Record a height and rebuild everything
    pub fn on_height_changed(&mut self, value: f64, at: DateTime<Utc>) -> Result<(), MetricsError> {
        self.write_raw(RawMetric::Height, value, at)?;
        let result = self.rebuild_all().map(|_| ());
        self.settle(result)
    }

    /// Record a body fat percentage and rebuild everything
    pub fn on_body_fat_changed(&mut self, value: f64, at: DateTime<Utc>) -> Result<(), MetricsError> {
        self.write_raw(RawMetric::BodyFat, value, at)?;
        let result = self.rebuild_all().map(|_| ());
        self.settle(result)
    }

    /// Record a circumference and rebuild everything
    pub fn on_circumference_changed(
        &mut self,
        metric: RawMetric,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<(), MetricsError> {
        if !metric.is_circumference() {
            return Err(MetricsError::UnknownMetric(format!(
                "{} is not a circumference",
                metric.display_name()
            )));
        }
        self.write_raw(metric, value, at)?;
        let result = self.rebuild_all().map(|_| ());
        self.settle(result)
    }

    /// Route a raw value to the matching entry point
    pub fn on_raw_changed(&mut self, metric: RawMetric, value: f64, at: DateTime<Utc>) -> Result<(), MetricsError> {
        match metric {
            RawMetric::Weight => self.on_weight_changed(value, at),
            RawMetric::Height => self.on_height_changed(value, at),
            RawMetric::BodyFat => self.on_body_fat_changed(value, at),
            RawMetric::Waist
            | RawMetric::Bicep
            | RawMetric::Chest
            | RawMetric::Thigh
            | RawMetric::Shoulder => self.on_circumference_changed(metric, value, at),
        }
    }

    /// Parse text input as typed on an entry screen, then record it
    pub fn on_raw_input(&mut self, metric: RawMetric, input: &str, at: DateTime<Utc>) -> Result<(), MetricsError> {
        let value = metric.parse_value(input)?;
        self.on_raw_changed(metric, value, at)
    }

    /// Bring derived values at `at` in line after weight samples there changed.
    ///
    /// Derived samples may only sit on an existing weight timestamp, so if no
    /// weight remains exactly at `at` they are removed instead of recomputed
    /// from a neighbouring weight.
    fn reconcile_weight_date(&mut self, at: DateTime<Utc>) -> Result<(), MetricsError> {
        let weight_remains = self
            .store
            .query(RawMetric::Weight.into())?
            .iter()
            .any(|s| s.timestamp == at);

        if weight_remains {
            self.recompute_for_date(at)?;
        } else {
            let removed = self.clear_derived_at(at)?;
            debug!(timestamp = %at, removed, "cleared derived metrics for deleted weight");
        }
        Ok(())
    }

    /// Delete a raw sample by exact identity and repair derived series
    pub fn on_delete(&mut self, metric: RawMetric, sample: &Sample) -> Result<(), MetricsError> {
        let removed = self
            .store
            .delete_by_identity(metric.into(), sample.value, sample.timestamp)?;
        if removed == 0 {
            return Err(MetricsError::NotFound(format!(
                "{} {} at {}",
                metric.display_name(),
                sample.value,
                sample.timestamp.to_rfc3339()
            )));
        }
        debug!(metric = metric.as_str(), removed, timestamp = %sample.timestamp, "deleted raw sample");

        let result = match metric {
            RawMetric::Weight => self.reconcile_weight_date(sample.timestamp),
            _ => self.rebuild_all().map(|_| ()),
        };
        self.settle(result)
    }

    /// Replace a raw sample with a new value and/or date
    pub fn on_sample_edited(
        &mut self,
        metric: RawMetric,
        old: &Sample,
        new_value: f64,
        new_at: DateTime<Utc>,
    ) -> Result<(), MetricsError> {
        let new_value = metric.validate(new_value)?;

        let removed = self
            .store
            .delete_by_identity(metric.into(), old.value, old.timestamp)?;
        if removed == 0 {
            return Err(MetricsError::NotFound(format!(
                "{} {} at {}",
                metric.display_name(),
                old.value,
                old.timestamp.to_rfc3339()
            )));
        }
        self.store.append(Sample::raw(metric, new_value, new_at))?;

        let result = match metric {
            RawMetric::Weight => {
                let old_date = if old.timestamp != new_at {
                    self.reconcile_weight_date(old.timestamp)
                } else {
                    Ok(())
                };
                old_date.and_then(|_| self.recompute_for_date(new_at).map(|_| ()))
            }
            _ => self.rebuild_all().map(|_| ()),
        };
        self.settle(result)
    }

    /// Drop a whole raw series and rebuild
    pub fn clear_raw(&mut self, metric: RawMetric) -> Result<RebuildSummary, MetricsError> {
        self.store.clear_all(metric.into())?;
        let result = self.rebuild_all();
        self.settle(result)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// History of a derived metric, rebuilt from raw data before returning.
    ///
    /// Every read triggers a full rebuild, so a read also writes. That costs
    /// O(series length) per call, which is fine for personal longitudinal
    /// data. Store failures are logged and degrade to an empty history so a
    /// display never fails; use [`try_history`](Self::try_history) to see them.
    pub fn history(&mut self, metric: DerivedMetric) -> Vec<Sample> {
        match self.try_history(metric) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(metric = metric.as_str(), error = %e, "history unavailable, returning empty");
                Vec::new()
            }
        }
    }

    /// History of a derived metric, propagating store errors
    pub fn try_history(&mut self, metric: DerivedMetric) -> Result<Vec<Sample>, MetricsError> {
        self.rebuild_all()?;
        Ok(self.store.query(metric.into())?)
    }

    /// History of a raw metric as stored
    pub fn raw_history(&self, metric: RawMetric) -> Result<Vec<Sample>, MetricsError> {
        Ok(self.store.query(metric.into())?)
    }

    /// Most recent sample of any metric (derived metrics are rebuilt first)
    pub fn latest(&mut self, metric: MetricName) -> Result<Option<Sample>, MetricsError> {
        let series = match metric {
            MetricName::Raw(m) => self.raw_history(m)?,
            MetricName::Derived(m) => self.try_history(m)?,
        };
        Ok(series.into_iter().max_by_key(|s| s.timestamp))
    }

    /// Latest value per raw metric, read from the store
    pub fn profile_snapshot(&self) -> Result<ProfileSnapshot, MetricsError> {
        let mut profile = ProfileSnapshot::default();

        for metric in RawMetric::ALL {
            let latest = self
                .store
                .query(metric.into())?
                .into_iter()
                .max_by_key(|s| s.timestamp);

            if let Some(sample) = latest {
                profile.set(metric, sample.value);
                profile.timestamp = profile.timestamp.max(Some(sample.timestamp));
            }
        }

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::days(n)
    }

    fn engine() -> RecomputeEngine {
        RecomputeEngine::new(InMemoryStore::new(), StandardFormulas::default())
    }

    fn derived_at(engine: &RecomputeEngine, metric: DerivedMetric, at: DateTime<Utc>) -> Vec<Sample> {
        engine
            .store()
            .query(metric.into())
            .unwrap()
            .into_iter()
            .filter(|s| s.timestamp == at)
            .collect()
    }

    #[test]
    fn test_bmi_scenario() {
        let mut engine = engine();
        engine.on_height_changed(175.0, day(0)).unwrap();
        engine.on_weight_changed(70.0, day(0)).unwrap();

        let bmi = derived_at(&engine, DerivedMetric::Bmi, day(0));
        assert_eq!(bmi.len(), 1);
        assert!((bmi[0].value - 22.857).abs() < 0.001);
        assert_eq!(
            bmi[0].source,
            Some(BmiSource {
                source_weight: 70.0,
                source_height: 175.0
            })
        );

        assert_eq!(derived_at(&engine, DerivedMetric::BasalMetabolicRate, day(0)).len(), 1);
        assert_eq!(derived_at(&engine, DerivedMetric::BodySurfaceArea, day(0)).len(), 1);
        // No body fat yet
        assert!(derived_at(&engine, DerivedMetric::LeanBodyMass, day(0)).is_empty());
        assert!(derived_at(&engine, DerivedMetric::FatFreeMassIndex, day(0)).is_empty());
    }

    #[test]
    fn test_no_weight_is_noop() {
        let mut engine = engine();
        engine.on_height_changed(175.0, day(0)).unwrap();

        let derived = engine.recompute_for_date(day(0)).unwrap();
        assert!(derived.weight.is_none());
        assert!(derived.samples.is_empty());
        for metric in DerivedMetric::ALL {
            assert!(engine.store().query(metric.into()).unwrap().is_empty());
        }
    }

    #[test]
    fn test_body_fat_without_height() {
        let mut engine = engine();
        engine.on_weight_changed(80.0, day(0)).unwrap();
        engine.on_body_fat_changed(20.0, day(0)).unwrap();

        let lean = derived_at(&engine, DerivedMetric::LeanBodyMass, day(0));
        let fat = derived_at(&engine, DerivedMetric::FatMass, day(0));
        assert!((lean[0].value - 64.0).abs() < 1e-9);
        assert!((fat[0].value - 16.0).abs() < 1e-9);

        assert!(derived_at(&engine, DerivedMetric::Bmi, day(0)).is_empty());
        assert!(derived_at(&engine, DerivedMetric::FatFreeMassIndex, day(0)).is_empty());
    }

    #[test]
    fn test_full_composition_with_ffmi() {
        let mut engine = engine();
        engine.on_height_changed(180.0, day(0)).unwrap();
        engine.on_body_fat_changed(20.0, day(0)).unwrap();
        engine.on_weight_changed(80.0, day(0)).unwrap();

        let ffmi = derived_at(&engine, DerivedMetric::FatFreeMassIndex, day(0));
        assert_eq!(ffmi.len(), 1);
        // 64 / 1.8²
        assert!((ffmi[0].value - 19.753).abs() < 0.001);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut engine = engine();
        engine.on_height_changed(175.0, day(0)).unwrap();
        engine.on_body_fat_changed(18.0, day(0)).unwrap();
        engine.on_weight_changed(70.0, day(0)).unwrap();

        engine.recompute_for_date(day(0)).unwrap();
        let once = engine.store().to_json().unwrap();
        engine.recompute_for_date(day(0)).unwrap();
        let twice = engine.store().to_json().unwrap();

        let strip = |json: &str| {
            let mut v: serde_json::Value = serde_json::from_str(json).unwrap();
            v.as_object_mut().unwrap().remove("saved_at");
            v
        };
        assert_eq!(strip(&once), strip(&twice));
    }

    #[test]
    fn test_weight_delete_clears_date() {
        let mut engine = engine();
        engine.on_height_changed(175.0, day(0)).unwrap();
        engine.on_weight_changed(70.0, day(5)).unwrap();
        // Second weight inside the ±24h window of day 5
        engine
            .on_weight_changed(71.0, day(5) + Duration::hours(3))
            .unwrap();

        let sample = Sample::raw(RawMetric::Weight, 70.0, day(5));
        engine.on_delete(RawMetric::Weight, &sample).unwrap();

        for metric in DerivedMetric::ALL {
            assert!(derived_at(&engine, metric, day(5)).is_empty(), "{metric:?} left at day 5");
        }
        assert_eq!(
            derived_at(&engine, DerivedMetric::Bmi, day(5) + Duration::hours(3)).len(),
            1
        );
    }

    #[test]
    fn test_delete_missing_sample_is_not_found() {
        let mut engine = engine();
        engine.on_weight_changed(70.0, day(0)).unwrap();

        let sample = Sample::raw(RawMetric::Weight, 70.5, day(0));
        assert!(matches!(
            engine.on_delete(RawMetric::Weight, &sample),
            Err(MetricsError::NotFound(_))
        ));
    }

    #[test]
    fn test_height_delete_rebuilds() {
        let mut engine = engine();
        engine.on_weight_changed(70.0, day(0)).unwrap();
        engine.on_height_changed(175.0, day(0)).unwrap();
        assert_eq!(derived_at(&engine, DerivedMetric::Bmi, day(0)).len(), 1);

        let sample = Sample::raw(RawMetric::Height, 175.0, day(0));
        engine.on_delete(RawMetric::Height, &sample).unwrap();

        assert!(engine.store().query(DerivedMetric::Bmi.into()).unwrap().is_empty());
    }

    #[test]
    fn test_edit_weight_moves_derived_date() {
        let mut engine = engine();
        engine.on_height_changed(175.0, day(0)).unwrap();
        engine.on_weight_changed(70.0, day(1)).unwrap();

        let old = Sample::raw(RawMetric::Weight, 70.0, day(1));
        engine
            .on_sample_edited(RawMetric::Weight, &old, 72.0, day(2))
            .unwrap();

        assert!(derived_at(&engine, DerivedMetric::Bmi, day(1)).is_empty());
        let bmi = derived_at(&engine, DerivedMetric::Bmi, day(2));
        assert_eq!(bmi.len(), 1);
        assert_eq!(bmi[0].source.unwrap().source_weight, 72.0);
    }

    #[test]
    fn test_raw_input_parsing() {
        let mut engine = engine();
        engine.on_raw_input(RawMetric::Weight, " 70.2 ", day(0)).unwrap();
        assert!(matches!(
            engine.on_raw_input(RawMetric::Weight, "abc", day(0)),
            Err(MetricsError::InvalidValue { .. })
        ));
        assert_eq!(engine.raw_history(RawMetric::Weight).unwrap().len(), 1);
    }

    #[test]
    fn test_circumference_entry_point_rejects_other_metrics() {
        let mut engine = engine();
        assert!(engine
            .on_circumference_changed(RawMetric::Height, 175.0, day(0))
            .is_err());
        engine
            .on_circumference_changed(RawMetric::Waist, 81.0, day(0))
            .unwrap();
        assert_eq!(engine.raw_history(RawMetric::Waist).unwrap().len(), 1);
    }

    #[test]
    fn test_profile_snapshot_tracks_latest() {
        let mut engine = engine();
        engine.on_weight_changed(70.0, day(0)).unwrap();
        engine.on_weight_changed(72.0, day(3)).unwrap();
        engine.on_weight_changed(71.0, day(1)).unwrap();
        engine.on_raw_changed(RawMetric::Chest, 100.0, day(4)).unwrap();

        let profile = engine.profile_snapshot().unwrap();
        assert_eq!(profile.weight, Some(72.0));
        assert_eq!(profile.chest, Some(100.0));
        assert_eq!(profile.height, None);
        assert_eq!(profile.timestamp, Some(day(4)));
    }

    #[test]
    fn test_latest_derived() {
        let mut engine = engine();
        engine.on_height_changed(175.0, day(0)).unwrap();
        engine.on_weight_changed(70.0, day(0)).unwrap();
        engine.on_weight_changed(80.0, day(7)).unwrap();

        let latest = engine.latest(DerivedMetric::Bmi.into()).unwrap().unwrap();
        assert_eq!(latest.timestamp, day(7));
        assert_eq!(latest.source.unwrap().source_weight, 80.0);
    }

    #[test]
    fn test_clear_raw_weight_clears_derived() {
        let mut engine = engine();
        engine.on_height_changed(175.0, day(0)).unwrap();
        engine.on_weight_changed(70.0, day(0)).unwrap();

        let summary = engine.clear_raw(RawMetric::Weight).unwrap();
        assert_eq!(summary.anchors, 0);
        assert!(engine.store().query(DerivedMetric::Bmi.into()).unwrap().is_empty());
    }

    #[test]
    fn test_delete_one_of_duplicate_weights_keeps_date() {
        let mut engine = engine();
        engine.on_height_changed(175.0, day(0)).unwrap();
        engine.on_weight_changed(70.0, day(2)).unwrap();
        engine.on_weight_changed(70.0, day(2)).unwrap();

        let sample = Sample::raw(RawMetric::Weight, 70.0, day(2));
        engine.on_delete(RawMetric::Weight, &sample).unwrap();

        assert_eq!(engine.raw_history(RawMetric::Weight).unwrap().len(), 1);
        assert_eq!(derived_at(&engine, DerivedMetric::Bmi, day(2)).len(), 1);
    }

    /// Store whose reads can be switched to fail, and whose appends can be
    /// limited to a budget shared with the test
    struct FailingStore {
        inner: InMemoryStore,
        fail_reads: bool,
        appends_left: Rc<Cell<Option<usize>>>,
    }

    impl FailingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                fail_reads: false,
                appends_left: Rc::new(Cell::new(None)),
            }
        }
    }

    impl MetricStore for FailingStore {
        fn append(&mut self, sample: Sample) -> Result<(), StoreError> {
            if let Some(left) = self.appends_left.get() {
                if left == 0 {
                    return Err(StoreError::Unavailable("disk full".to_string()));
                }
                self.appends_left.set(Some(left - 1));
            }
            self.inner.append(sample)
        }

        fn query(&self, metric: MetricName) -> Result<Vec<Sample>, StoreError> {
            if self.fail_reads {
                return Err(StoreError::Unavailable("disk detached".to_string()));
            }
            self.inner.query(metric)
        }

        fn delete_by_identity(
            &mut self,
            metric: MetricName,
            value: f64,
            timestamp: DateTime<Utc>,
        ) -> Result<usize, StoreError> {
            self.inner.delete_by_identity(metric, value, timestamp)
        }

        fn clear_all(&mut self, metric: MetricName) -> Result<(), StoreError> {
            self.inner.clear_all(metric)
        }
    }

    #[test]
    fn test_history_degrades_to_empty() {
        let mut engine = RecomputeEngine::new(FailingStore::new(), StandardFormulas::default());
        engine.on_height_changed(175.0, day(0)).unwrap();
        engine.on_weight_changed(70.0, day(0)).unwrap();
        assert_eq!(engine.history(DerivedMetric::Bmi).len(), 1);

        let mut store = engine.into_store();
        store.fail_reads = true;
        let mut engine = RecomputeEngine::new(store, StandardFormulas::default());

        assert!(engine.history(DerivedMetric::Bmi).is_empty());
        assert!(matches!(
            engine.try_history(DerivedMetric::Bmi),
            Err(MetricsError::Store(StoreError::Unavailable(_)))
        ));
        // Reads failed before anything was cleared
        assert_eq!(engine.store().inner.query(DerivedMetric::Bmi.into()).unwrap().len(), 1);
    }

    #[test]
    fn test_mutation_failure_propagates_and_marks_stale() {
        let mut engine = RecomputeEngine::new(FailingStore::new(), StandardFormulas::default());
        engine.on_weight_changed(70.0, day(0)).unwrap();
        assert!(!engine.is_stale());

        let mut store = engine.into_store();
        store.fail_reads = true;
        let mut engine = RecomputeEngine::new(store, StandardFormulas::default());

        assert!(engine.on_height_changed(175.0, day(0)).is_err());
        assert!(engine.is_stale());
    }

    #[test]
    fn test_write_failure_mid_rebuild_marks_stale_until_next_rebuild() {
        let store = FailingStore::new();
        let appends_left = Rc::clone(&store.appends_left);
        let mut engine = RecomputeEngine::new(store, StandardFormulas::default());
        engine.on_weight_changed(70.0, day(0)).unwrap();
        engine.on_weight_changed(71.0, day(3)).unwrap();
        engine.on_body_fat_changed(20.0, day(0)).unwrap();

        // The raw height write and one derived write succeed, then the disk fills
        appends_left.set(Some(2));
        assert!(matches!(
            engine.on_height_changed(175.0, day(1)),
            Err(MetricsError::Store(StoreError::Unavailable(_)))
        ));
        assert!(engine.is_stale());
        assert_eq!(engine.raw_history(RawMetric::Height).unwrap().len(), 1);

        appends_left.set(None);
        let summary = engine.rebuild_all().unwrap();
        assert!(!engine.is_stale());
        assert_eq!(summary.anchors, 2);
        assert_eq!(summary.samples_written, 12);

        let weights: BTreeSet<_> = engine
            .raw_history(RawMetric::Weight)
            .unwrap()
            .iter()
            .map(|s| s.timestamp)
            .collect();
        for metric in DerivedMetric::ALL {
            let series = engine.store().query(metric.into()).unwrap();
            assert_eq!(series.len(), 2, "{metric:?}");
            assert!(series.iter().all(|s| weights.contains(&s.timestamp)));
        }
    }
}
