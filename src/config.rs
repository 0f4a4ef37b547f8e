//! Configuration for the Synheart Body engine.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::MetricsError;
use crate::formulas::BmrProfile;
use crate::matching::DEFAULT_MATCH_WINDOW_HOURS;

/// Largest accepted matching window (ten years)
pub const MAX_MATCH_WINDOW_HOURS: i64 = 24 * 365 * 10;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Half-width of the preferred temporal matching window (hours)
    pub match_window_hours: i64,

    /// Constants used by the BMR equation
    pub bmr: BmrProfile,

    /// Where the CLI keeps its JSON store
    pub store_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-body");

        Self {
            match_window_hours: DEFAULT_MATCH_WINDOW_HOURS,
            bmr: BmrProfile::default(),
            store_path: data_dir.join("store.json"),
        }
    }
}

impl EngineConfig {
    /// Matching window as a duration, clamped to the accepted range
    pub fn match_window(&self) -> Duration {
        Duration::hours(self.match_window_hours.clamp(0, MAX_MATCH_WINDOW_HOURS))
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), MetricsError> {
        if !(0..=MAX_MATCH_WINDOW_HOURS).contains(&self.match_window_hours) {
            return Err(MetricsError::Config(format!(
                "match_window_hours must be between 0 and {} (got {})",
                MAX_MATCH_WINDOW_HOURS, self.match_window_hours
            )));
        }
        if !(10..=120).contains(&self.bmr.age_years) {
            return Err(MetricsError::Config(format!(
                "bmr.age_years must be between 10 and 120 (got {})",
                self.bmr.age_years
            )));
        }
        Ok(())
    }

    /// Parse and validate configuration JSON
    pub fn from_json(json: &str) -> Result<Self, MetricsError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self, MetricsError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file, falling back to defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self, MetricsError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| MetricsError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), MetricsError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a file.
    pub fn save_to(&self, path: &Path) -> Result<(), MetricsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MetricsError::Config(format!("{}: {e}", parent.display())))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| MetricsError::Config(format!("{}: {e}", path.display())))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-body")
            .join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formulas::Sex;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.match_window_hours, 24);
        assert_eq!(config.match_window(), Duration::hours(24));
        assert_eq!(config.bmr, BmrProfile::default());
        assert!(config.store_path.ends_with("store.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            EngineConfig::from_json(r#"{"bmr": {"age_years": 45, "sex": "female"}}"#).unwrap();
        assert_eq!(config.match_window_hours, 24);
        assert_eq!(config.bmr.age_years, 45);
        assert_eq!(config.bmr.sex, Sex::Female);
    }

    #[test]
    fn test_rejects_negative_window() {
        let result = EngineConfig::from_json(r#"{"match_window_hours": -1}"#);
        assert!(matches!(result, Err(MetricsError::Config(_))));
    }

    #[test]
    fn test_rejects_oversized_window() {
        let result = EngineConfig::from_json(r#"{"match_window_hours": 9223372036854775807}"#);
        assert!(matches!(result, Err(MetricsError::Config(_))));

        let config = EngineConfig {
            match_window_hours: i64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.match_window(), Duration::hours(MAX_MATCH_WINDOW_HOURS));

        let widest = EngineConfig {
            match_window_hours: MAX_MATCH_WINDOW_HOURS,
            ..Default::default()
        };
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("synheart-body-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let config = EngineConfig {
            match_window_hours: 12,
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(dir).ok();
    }
}
