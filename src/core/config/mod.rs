//! # Config Module
//!
//! Tunable policy for duplicate resolution, burst grouping and batching.
//!
//! Defaults follow the field deployment: near duplicates within 5 of 64
//! bits and 5 minutes of each other, bursts within 2 seconds.

use crate::error::ConfigError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hamming distance below which two perceptual hashes are near duplicates
pub const NEAR_DUPLICATE_THRESHOLD: u32 = 5;

/// Upload-time window (seconds, either side) searched for near duplicates
pub const NEAR_DUPLICATE_WINDOW_SECS: i64 = 5 * 60;

/// Capture-time window (seconds, either side) that chains records into a burst
pub const BURST_WINDOW_SECS: i64 = 2;

/// Records per reprocessing batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Near-duplicate cutoff; a distance strictly below it is a match
    pub near_duplicate_threshold: u32,
    pub near_duplicate_window_secs: i64,
    pub burst_window_secs: i64,
    pub batch_size: usize,
    /// Worker threads for batch runs (0 = one per core)
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: NEAR_DUPLICATE_THRESHOLD,
            near_duplicate_window_secs: NEAR_DUPLICATE_WINDOW_SECS,
            burst_window_secs: BURST_WINDOW_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 0,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON config file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn near_duplicate_threshold(mut self, threshold: u32) -> Self {
        self.near_duplicate_threshold = threshold;
        self
    }

    pub fn near_duplicate_window_secs(mut self, secs: i64) -> Self {
        self.near_duplicate_window_secs = secs;
        self
    }

    pub fn burst_window_secs(mut self, secs: i64) -> Self {
        self.burst_window_secs = secs;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn near_window(&self) -> Duration {
        Duration::seconds(self.near_duplicate_window_secs)
    }

    pub fn burst_window(&self) -> Duration {
        Duration::seconds(self.burst_window_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.near_duplicate_threshold == 0 || self.near_duplicate_threshold > 64 {
            return Err(ConfigError::InvalidThreshold {
                value: self.near_duplicate_threshold,
            });
        }
        if self.near_duplicate_window_secs <= 0 {
            return Err(ConfigError::ZeroValue {
                name: "near_duplicate_window_secs",
            });
        }
        if self.burst_window_secs <= 0 {
            return Err(ConfigError::ZeroValue {
                name: "burst_window_secs",
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroValue { name: "batch_size" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_field_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.near_duplicate_threshold, 5);
        assert_eq!(config.near_window(), Duration::minutes(5));
        assert_eq!(config.burst_window(), Duration::seconds(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides_values() {
        let config = EngineConfig::new()
            .near_duplicate_threshold(8)
            .burst_window_secs(3)
            .batch_size(10);

        assert_eq!(config.near_duplicate_threshold, 8);
        assert_eq!(config.burst_window_secs, 3);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config = EngineConfig::new().near_duplicate_threshold(65);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { value: 65 })
        ));
    }

    #[test]
    fn rejects_zero_batch_size() {
        assert!(EngineConfig::new().batch_size(0).validate().is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "near_duplicate_threshold": 7 }}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();

        assert_eq!(config.near_duplicate_threshold, 7);
        assert_eq!(config.burst_window_secs, BURST_WINDOW_SECS);
    }
}
