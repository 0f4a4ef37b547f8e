//! Metric store
//!
//! The store holds one time-ordered series per metric name. The engine only
//! talks to it through the `MetricStore` trait so that the host application
//! can put any durable backend behind it. `InMemoryStore` is the bundled
//! implementation; it can be saved to and loaded from JSON the same way
//! baseline state is persisted elsewhere in Synheart.

use crate::types::{MetricName, Sample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a metric store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt store data: {0}")]
    Corrupt(String),

    #[error("Store serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable keyed time series of samples
pub trait MetricStore {
    /// Append a sample to its metric's series
    fn append(&mut self, sample: Sample) -> Result<(), StoreError>;

    /// Full series for a metric, ordered by timestamp (ties keep append order)
    fn query(&self, metric: MetricName) -> Result<Vec<Sample>, StoreError>;

    /// Remove one sample matching `(metric, value, timestamp)` exactly,
    /// the most recently appended when several are identical.
    /// Returns the number of samples removed (0 or 1).
    fn delete_by_identity(
        &mut self,
        metric: MetricName,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Drop a whole series
    fn clear_all(&mut self, metric: MetricName) -> Result<(), StoreError>;
}

/// In-process store keeping every series in memory
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    store_id: Uuid,
    series: BTreeMap<MetricName, Vec<Sample>>,
}

/// On-disk shape of an `InMemoryStore`
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    store_id: Uuid,
    saved_at: DateTime<Utc>,
    samples: Vec<Sample>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            store_id: Uuid::new_v4(),
            series: BTreeMap::new(),
        }
    }

    /// Identifier carried across save/load cycles
    pub fn store_id(&self) -> Uuid {
        self.store_id
    }

    /// Total number of samples across all series
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load store state from JSON
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let document: StoreDocument = serde_json::from_str(json)?;

        let mut store = Self {
            store_id: document.store_id,
            series: BTreeMap::new(),
        };
        for sample in document.samples {
            if sample.metric.unit() != sample.unit {
                return Err(StoreError::Corrupt(format!(
                    "{} sample at {} has unit {:?}, expected {:?}",
                    sample.metric.as_str(),
                    sample.timestamp,
                    sample.unit,
                    sample.metric.unit()
                )));
            }
            store.insert_ordered(sample);
        }

        Ok(store)
    }

    /// Serialize store state to JSON
    pub fn to_json(&self) -> Result<String, StoreError> {
        let document = StoreDocument {
            store_id: self.store_id,
            saved_at: Utc::now(),
            samples: self.series.values().flatten().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Load from a file, starting empty if the file does not exist yet
    pub fn load_file(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Write to a file, replacing it only once the new content is fully written
    pub fn save_file(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, self.to_json()?)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn insert_ordered(&mut self, sample: Sample) {
        let series = self.series.entry(sample.metric).or_default();
        let position = series.partition_point(|s| s.timestamp <= sample.timestamp);
        series.insert(position, sample);
    }
}

impl MetricStore for InMemoryStore {
    fn append(&mut self, sample: Sample) -> Result<(), StoreError> {
        self.insert_ordered(sample);
        Ok(())
    }

    fn query(&self, metric: MetricName) -> Result<Vec<Sample>, StoreError> {
        Ok(self.series.get(&metric).cloned().unwrap_or_default())
    }

    fn delete_by_identity(
        &mut self,
        metric: MetricName,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let Some(series) = self.series.get_mut(&metric) else {
            return Ok(0);
        };

        match series
            .iter()
            .rposition(|s| s.matches_identity(metric, value, timestamp))
        {
            Some(position) => {
                series.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn clear_all(&mut self, metric: MetricName) -> Result<(), StoreError> {
        self.series.remove(&metric);
        Ok(())
    }
}
