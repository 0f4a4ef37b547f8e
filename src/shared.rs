//! Thread-safe engine handle
//!
//! Interleaved clears and rewrites from two recomputes would leave derived
//! series torn, so every entry point runs while holding the engine lock for
//! the whole call.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::engine::{RebuildSummary, RecomputeEngine};
use crate::error::MetricsError;
use crate::formulas::{FormulaLibrary, StandardFormulas};
use crate::store::{InMemoryStore, MetricStore};
use crate::types::{DerivedMetric, ProfileSnapshot, RawMetric, Sample};

/// Engine shared across threads with one writer at a time
pub struct SharedEngine<S = InMemoryStore, F = StandardFormulas> {
    inner: Arc<Mutex<RecomputeEngine<S, F>>>,
}

impl<S, F> Clone for SharedEngine<S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: MetricStore, F: FormulaLibrary> SharedEngine<S, F> {
    pub fn new(engine: RecomputeEngine<S, F>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Run `f` with exclusive access to the engine
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut RecomputeEngine<S, F>) -> Result<T, MetricsError>,
    ) -> Result<T, MetricsError> {
        let mut engine = self.inner.lock().map_err(|_| MetricsError::LockPoisoned)?;
        f(&mut engine)
    }

    pub fn on_raw_changed(&self, metric: RawMetric, value: f64, at: DateTime<Utc>) -> Result<(), MetricsError> {
        self.with(|engine| engine.on_raw_changed(metric, value, at))
    }

    pub fn on_raw_input(&self, metric: RawMetric, input: &str, at: DateTime<Utc>) -> Result<(), MetricsError> {
        self.with(|engine| engine.on_raw_input(metric, input, at))
    }

    pub fn on_delete(&self, metric: RawMetric, sample: &Sample) -> Result<(), MetricsError> {
        self.with(|engine| engine.on_delete(metric, sample))
    }

    pub fn rebuild_all(&self) -> Result<RebuildSummary, MetricsError> {
        self.with(|engine| engine.rebuild_all())
    }

    /// Derived history; degrades to empty on any failure, including a poisoned lock
    pub fn history(&self, metric: DerivedMetric) -> Vec<Sample> {
        match self.inner.lock() {
            Ok(mut engine) => engine.history(metric),
            Err(_) => {
                warn!(metric = metric.as_str(), "engine lock poisoned, returning empty history");
                Vec::new()
            }
        }
    }

    pub fn raw_history(&self, metric: RawMetric) -> Result<Vec<Sample>, MetricsError> {
        self.with(|engine| engine.raw_history(metric))
    }

    pub fn profile_snapshot(&self) -> Result<ProfileSnapshot, MetricsError> {
        self.with(|engine| engine.profile_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;
    use std::thread;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap() + Duration::days(n)
    }

    #[test]
    fn test_concurrent_writers_keep_invariants() {
        let shared = SharedEngine::new(RecomputeEngine::new(
            InMemoryStore::new(),
            StandardFormulas::default(),
        ));
        shared.on_raw_changed(RawMetric::Height, 178.0, day(0)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        let at = day(worker * 10 + i);
                        shared
                            .on_raw_changed(RawMetric::Weight, 70.0 + i as f64 * 0.1, at)
                            .unwrap();
                        if i % 3 == 0 {
                            shared
                                .on_raw_changed(RawMetric::BodyFat, 18.0 + worker as f64, at)
                                .unwrap();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let weights: BTreeSet<_> = shared
            .raw_history(RawMetric::Weight)
            .unwrap()
            .iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(weights.len(), 40);

        for metric in DerivedMetric::ALL {
            let history = shared.history(metric);
            let stamps: BTreeSet<_> = history.iter().map(|s| s.timestamp).collect();
            assert_eq!(stamps.len(), history.len(), "{metric:?} has duplicate dates");
            assert!(stamps.is_subset(&weights), "{metric:?} has orphaned dates");
            assert_eq!(history.len(), 40);
        }
    }

    #[test]
    fn test_profile_snapshot_through_handle() {
        let shared = SharedEngine::new(RecomputeEngine::new(
            InMemoryStore::new(),
            StandardFormulas::default(),
        ));
        shared.on_raw_input(RawMetric::Weight, "68.2", day(0)).unwrap();

        let profile = shared.profile_snapshot().unwrap();
        assert_eq!(profile.weight, Some(68.2));
    }
}
