//! Core types for Synheart Body
//!
//! This module defines the closed sets of raw and derived metric names, their
//! fixed units, the time-stamped `Sample` that every series is made of, and the
//! `ProfileSnapshot` view of the latest raw values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MetricsError;

/// Measurement unit attached to every sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Kilograms,
    Centimeters,
    Percent,
    Dimensionless,
    Kilocalories,
    SquareMeters,
}

impl Unit {
    /// Short symbol used for display
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Kilograms => "kg",
            Unit::Centimeters => "cm",
            Unit::Percent => "%",
            Unit::Dimensionless => "",
            Unit::Kilocalories => "kcal",
            Unit::SquareMeters => "m²",
        }
    }
}

/// A directly user-entered measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawMetric {
    Weight,
    Height,
    BodyFat,
    Waist,
    Bicep,
    Chest,
    Thigh,
    Shoulder,
}

impl RawMetric {
    pub const ALL: [RawMetric; 8] = [
        RawMetric::Weight,
        RawMetric::Height,
        RawMetric::BodyFat,
        RawMetric::Waist,
        RawMetric::Bicep,
        RawMetric::Chest,
        RawMetric::Thigh,
        RawMetric::Shoulder,
    ];

    pub const CIRCUMFERENCES: [RawMetric; 5] = [
        RawMetric::Waist,
        RawMetric::Bicep,
        RawMetric::Chest,
        RawMetric::Thigh,
        RawMetric::Shoulder,
    ];

    pub fn unit(&self) -> Unit {
        match self {
            RawMetric::Weight => Unit::Kilograms,
            RawMetric::BodyFat => Unit::Percent,
            RawMetric::Height
            | RawMetric::Waist
            | RawMetric::Bicep
            | RawMetric::Chest
            | RawMetric::Thigh
            | RawMetric::Shoulder => Unit::Centimeters,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RawMetric::Weight => "weight",
            RawMetric::Height => "height",
            RawMetric::BodyFat => "body_fat",
            RawMetric::Waist => "waist",
            RawMetric::Bicep => "bicep",
            RawMetric::Chest => "chest",
            RawMetric::Thigh => "thigh",
            RawMetric::Shoulder => "shoulder",
        }
    }

    /// Human-readable name as shown on measurement screens
    pub fn display_name(&self) -> &'static str {
        match self {
            RawMetric::Weight => "Weight",
            RawMetric::Height => "Height",
            RawMetric::BodyFat => "Body Fat",
            RawMetric::Waist => "Waist",
            RawMetric::Bicep => "Bicep",
            RawMetric::Chest => "Chest",
            RawMetric::Thigh => "Thigh",
            RawMetric::Shoulder => "Shoulder",
        }
    }

    pub fn is_circumference(&self) -> bool {
        Self::CIRCUMFERENCES.contains(self)
    }

    /// Accepted value range as `(min, max, min_inclusive, max_inclusive)`
    fn valid_range(&self) -> (f64, f64, bool, bool) {
        match self {
            RawMetric::Weight => (0.0, 500.0, false, true),
            RawMetric::Height => (0.0, 300.0, false, true),
            RawMetric::BodyFat => (0.0, 100.0, true, false),
            _ => (0.0, 1000.0, false, true),
        }
    }

    /// Check that a value is finite and physically plausible for this metric
    pub fn validate(&self, value: f64) -> Result<f64, MetricsError> {
        if !value.is_finite() {
            return Err(MetricsError::InvalidValue {
                metric: self.as_str().to_string(),
                input: value.to_string(),
            });
        }

        let (min, max, min_inclusive, max_inclusive) = self.valid_range();
        let above_min = if min_inclusive { value >= min } else { value > min };
        let below_max = if max_inclusive { value <= max } else { value < max };

        if above_min && below_max {
            Ok(value)
        } else {
            Err(MetricsError::OutOfRange {
                metric: self.as_str().to_string(),
                value,
            })
        }
    }

    /// Parse user input (as typed on an entry screen) into a validated value
    pub fn parse_value(&self, input: &str) -> Result<f64, MetricsError> {
        let value: f64 = input
            .trim()
            .parse()
            .map_err(|_| MetricsError::InvalidValue {
                metric: self.as_str().to_string(),
                input: input.to_string(),
            })?;
        self.validate(value)
    }
}

/// A value computed from one or more raw metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedMetric {
    Bmi,
    LeanBodyMass,
    FatMass,
    FatFreeMassIndex,
    BasalMetabolicRate,
    BodySurfaceArea,
}

impl DerivedMetric {
    pub const ALL: [DerivedMetric; 6] = [
        DerivedMetric::Bmi,
        DerivedMetric::LeanBodyMass,
        DerivedMetric::FatMass,
        DerivedMetric::FatFreeMassIndex,
        DerivedMetric::BasalMetabolicRate,
        DerivedMetric::BodySurfaceArea,
    ];

    pub fn unit(&self) -> Unit {
        match self {
            DerivedMetric::Bmi | DerivedMetric::FatFreeMassIndex => Unit::Dimensionless,
            DerivedMetric::LeanBodyMass | DerivedMetric::FatMass => Unit::Kilograms,
            DerivedMetric::BasalMetabolicRate => Unit::Kilocalories,
            DerivedMetric::BodySurfaceArea => Unit::SquareMeters,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedMetric::Bmi => "bmi",
            DerivedMetric::LeanBodyMass => "lean_body_mass",
            DerivedMetric::FatMass => "fat_mass",
            DerivedMetric::FatFreeMassIndex => "fat_free_mass_index",
            DerivedMetric::BasalMetabolicRate => "basal_metabolic_rate",
            DerivedMetric::BodySurfaceArea => "body_surface_area",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DerivedMetric::Bmi => "BMI",
            DerivedMetric::LeanBodyMass => "Lean Body Mass",
            DerivedMetric::FatMass => "Fat Mass",
            DerivedMetric::FatFreeMassIndex => "Fat-Free Mass Index",
            DerivedMetric::BasalMetabolicRate => "Basal Metabolic Rate",
            DerivedMetric::BodySurfaceArea => "Body Surface Area",
        }
    }
}

/// Name of any series held by the metric store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricName {
    Raw(RawMetric),
    Derived(DerivedMetric),
}

impl MetricName {
    pub fn unit(&self) -> Unit {
        match self {
            MetricName::Raw(m) => m.unit(),
            MetricName::Derived(m) => m.unit(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Raw(m) => m.as_str(),
            MetricName::Derived(m) => m.as_str(),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            MetricName::Raw(m) => m.display_name(),
            MetricName::Derived(m) => m.display_name(),
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, MetricName::Derived(_))
    }
}

impl From<RawMetric> for MetricName {
    fn from(metric: RawMetric) -> Self {
        MetricName::Raw(metric)
    }
}

impl From<DerivedMetric> for MetricName {
    fn from(metric: DerivedMetric) -> Self {
        MetricName::Derived(metric)
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl fmt::Display for RawMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl fmt::Display for DerivedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Fold "Body Fat", "body-fat" and "BODY_FAT" into one key
fn normalize_name(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

impl FromStr for RawMetric {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize_name(s);
        RawMetric::ALL
            .into_iter()
            .find(|m| m.as_str() == key)
            .ok_or_else(|| MetricsError::UnknownMetric(s.to_string()))
    }
}

impl FromStr for DerivedMetric {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize_name(s);
        let alias = match key.as_str() {
            "lbm" => Some(DerivedMetric::LeanBodyMass),
            "ffmi" => Some(DerivedMetric::FatFreeMassIndex),
            "bmr" => Some(DerivedMetric::BasalMetabolicRate),
            "bsa" => Some(DerivedMetric::BodySurfaceArea),
            _ => None,
        };

        alias
            .or_else(|| DerivedMetric::ALL.into_iter().find(|m| m.as_str() == key))
            .ok_or_else(|| MetricsError::UnknownMetric(s.to_string()))
    }
}

impl FromStr for MetricName {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<RawMetric>()
            .map(MetricName::Raw)
            .or_else(|_| s.parse::<DerivedMetric>().map(MetricName::Derived))
    }
}

/// Raw inputs recorded alongside a BMI sample for auditability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BmiSource {
    /// Weight used (kg)
    pub source_weight: f64,
    /// Height used (cm)
    pub source_height: f64,
}

/// One time-stamped value of a metric series.
///
/// Identity for deletion is `(metric, value, timestamp)`; there is no surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric: MetricName,
    pub unit: Unit,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// Present on BMI samples only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<BmiSource>,
}

impl Sample {
    /// Create a raw sample with the metric's fixed unit
    pub fn raw(metric: RawMetric, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            metric: MetricName::Raw(metric),
            unit: metric.unit(),
            value,
            timestamp,
            source: None,
        }
    }

    /// Create a derived sample with the metric's fixed unit
    pub fn derived(metric: DerivedMetric, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            metric: MetricName::Derived(metric),
            unit: metric.unit(),
            value,
            timestamp,
            source: None,
        }
    }

    pub fn with_source(mut self, source: BmiSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Exact identity match used by delete-by-identity
    pub fn matches_identity(&self, metric: MetricName, value: f64, timestamp: DateTime<Utc>) -> bool {
        self.metric == metric && self.value == value && self.timestamp == timestamp
    }
}

/// Latest value per raw metric, derived from the store on every read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub body_fat: Option<f64>,
    pub waist: Option<f64>,
    pub bicep: Option<f64>,
    pub chest: Option<f64>,
    pub thigh: Option<f64>,
    pub shoulder: Option<f64>,
    /// Timestamp of the most recent raw sample across all metrics
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProfileSnapshot {
    pub fn get(&self, metric: RawMetric) -> Option<f64> {
        match metric {
            RawMetric::Weight => self.weight,
            RawMetric::Height => self.height,
            RawMetric::BodyFat => self.body_fat,
            RawMetric::Waist => self.waist,
            RawMetric::Bicep => self.bicep,
            RawMetric::Chest => self.chest,
            RawMetric::Thigh => self.thigh,
            RawMetric::Shoulder => self.shoulder,
        }
    }

    pub(crate) fn set(&mut self, metric: RawMetric, value: f64) {
        let slot = match metric {
            RawMetric::Weight => &mut self.weight,
            RawMetric::Height => &mut self.height,
            RawMetric::BodyFat => &mut self.body_fat,
            RawMetric::Waist => &mut self.waist,
            RawMetric::Bicep => &mut self.bicep,
            RawMetric::Chest => &mut self.chest,
            RawMetric::Thigh => &mut self.thigh,
            RawMetric::Shoulder => &mut self.shoulder,
        };
        *slot = Some(value);
    }

    /// Check if any raw metric has been recorded
    pub fn has_data(&self) -> bool {
        RawMetric::ALL.iter().any(|m| self.get(*m).is_some())
    }

    /// BMI from the latest weight and height, if both are known
    pub fn bmi(&self) -> Option<f64> {
        match (self.weight, self.height) {
            (Some(w), Some(h)) if h > 0.0 => {
                let height_m = h / 100.0;
                Some(w / (height_m * height_m))
            }
            _ => None,
        }
    }
}
