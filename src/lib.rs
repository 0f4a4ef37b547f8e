//! Synheart Body - On-device body composition engine
//!
//! Body tracks raw body measurements (weight, height, body fat %, limb and
//! torso circumferences) as time series and keeps a second family of derived
//! series (BMI, lean body mass, fat mass, FFMI, BMR, BSA) consistent with
//! them whenever a raw sample is added, edited or deleted.
//!
//! Flow: raw mutation → temporal matching of companion values →
//! formula evaluation → derived series upsert (or full rebuild).
//!
//! ## Modules
//!
//! - **Engine**: `RecomputeEngine` and its thread-safe `SharedEngine` handle
//! - **Matching**: nearest-in-window companion lookup
//! - **Formulas**: swappable `FormulaLibrary` policy
//! - **Store**: `MetricStore` trait and the bundled `InMemoryStore`

pub mod config;
pub mod engine;
pub mod error;
pub mod formulas;
pub mod matching;
pub mod shared;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use engine::{DerivedSet, RebuildSummary, RecomputeEngine};
pub use error::MetricsError;
pub use formulas::{BmrProfile, FormulaLibrary, Sex, StandardFormulas};
pub use matching::{find_companion, Companion};
pub use shared::SharedEngine;
pub use store::{InMemoryStore, MetricStore, StoreError};
pub use types::{BmiSource, DerivedMetric, MetricName, ProfileSnapshot, RawMetric, Sample, Unit};

/// Library version
pub const BODY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded by tools built on the library
pub const PRODUCER_NAME: &str = "synheart-body";
