//! Configuration for badge-engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("badge-engine")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the ledger database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Ledger database file name, relative to `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Capacity of the engine event broadcast channel
    #[serde(default = "default_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Badge rule thresholds
    #[serde(default)]
    pub rules: RuleThresholds,
}

/// Thresholds for the five badge rules.
///
/// Ratios are expressed in basis points (1 bps = 0.01%) so comparisons stay
/// exact on fixed-point prices and supplies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleThresholds {
    /// A holder is early if fewer than this many holders existed before them
    #[serde(default = "default_early_holder_limit")]
    pub early_holder_limit: u64,

    /// Holder ranks up to and including this get the first-backer badge
    #[serde(default = "default_first_backer_limit")]
    pub first_backer_limit: u64,

    /// Holder count whose crossing rewards all early holders
    #[serde(default = "default_crossing_threshold")]
    pub crossing_threshold: u64,

    /// How far back the dip rule looks for a reference price
    #[serde(default = "default_dip_lookback_secs")]
    pub dip_lookback_secs: i64,

    /// Minimum price drop, in bps, that counts as a dip
    #[serde(default = "default_dip_threshold_bps")]
    pub dip_threshold_bps: u32,

    /// Distinct genres needed for the genre-diversity badge
    #[serde(default = "default_genre_threshold")]
    pub genre_threshold: usize,

    /// Minimum share of new supply, in bps, acquired in one purchase
    #[serde(default = "default_share_threshold_bps")]
    pub share_threshold_bps: u32,
}

fn default_database_file() -> String {
    "ledger.db".to_string()
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_early_holder_limit() -> u64 {
    50
}

fn default_first_backer_limit() -> u64 {
    5
}

fn default_crossing_threshold() -> u64 {
    200
}

fn default_dip_lookback_secs() -> i64 {
    3600
}

fn default_dip_threshold_bps() -> u32 {
    1500
}

fn default_genre_threshold() -> usize {
    8
}

fn default_share_threshold_bps() -> u32 {
    100
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            early_holder_limit: default_early_holder_limit(),
            first_backer_limit: default_first_backer_limit(),
            crossing_threshold: default_crossing_threshold(),
            dip_lookback_secs: default_dip_lookback_secs(),
            dip_threshold_bps: default_dip_threshold_bps(),
            genre_threshold: default_genre_threshold(),
            share_threshold_bps: default_share_threshold_bps(),
        }
    }
}

impl RuleThresholds {
    /// Reject thresholds that would make a rule meaningless
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.dip_threshold_bps == 0 || self.dip_threshold_bps >= 10_000 {
            return Err(EngineError::Config(format!(
                "dip_threshold_bps must be in 1..10000, got {}",
                self.dip_threshold_bps
            )));
        }
        if self.share_threshold_bps == 0 || self.share_threshold_bps > 10_000 {
            return Err(EngineError::Config(format!(
                "share_threshold_bps must be in 1..=10000, got {}",
                self.share_threshold_bps
            )));
        }
        if self.dip_lookback_secs <= 0 {
            return Err(EngineError::Config("dip_lookback_secs must be positive".into()));
        }
        if self.crossing_threshold == 0 || self.genre_threshold == 0 {
            return Err(EngineError::Config(
                "crossing_threshold and genre_threshold must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            event_bus_capacity: default_bus_capacity(),
            rules: RuleThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;
        config.rules.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), EngineError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get ledger database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let rules = RuleThresholds::default();
        assert_eq!(rules.early_holder_limit, 50);
        assert_eq!(rules.first_backer_limit, 5);
        assert_eq!(rules.crossing_threshold, 200);
        assert_eq!(rules.dip_lookback_secs, 3600);
        assert_eq!(rules.dip_threshold_bps, 1500);
        assert_eq!(rules.genre_threshold, 8);
        assert_eq!(rules.share_threshold_bps, 100);
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
database_file = "custom.db"

[rules]
genre_threshold = 3
"#,
        )
        .expect("valid TOML");

        assert_eq!(config.database_file, "custom.db");
        assert_eq!(config.rules.genre_threshold, 3);
        assert_eq!(config.rules.crossing_threshold, 200);
        assert_eq!(config.event_bus_capacity, 1024);
    }

    #[test]
    fn test_invalid_dip_threshold() {
        let rules = RuleThresholds {
            dip_threshold_bps: 10_000,
            ..Default::default()
        };
        assert!(matches!(rules.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = EngineConfig::default();
        config.storage_dir = dir.path().to_path_buf();
        config.rules.first_backer_limit = 10;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.rules, config.rules);
        assert_eq!(loaded.database_path(), dir.path().join("ledger.db"));
    }
}
