//! Controller configuration.
//!
//! Everything here is read-only to the engine once it is constructed. The
//! defaults reproduce the constants of the deployed four-lane junction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// ARBITRATION
// ============================================================================

/// Configuration for the arbitration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Number of lanes (must match the number of regions)
    pub lane_count: usize,

    /// Weight of summed live wait time, per second (default: 0.5)
    pub w_wait: f64,

    /// Weight of queue length, per vehicle (default: 1.0)
    pub w_queue: f64,

    /// Weight of summed live emergency priority (default: 2.0)
    pub w_emerg: f64,

    /// Emergency class label → priority weight
    pub emergency_weights: HashMap<String, f64>,

    /// Exponential smoothing factor in (0, 1]; lower = smoother (default: 0.2)
    pub alpha: f64,

    /// Minimum green hold and post-emergency grace, in seconds (default: 5.0)
    pub min_hold_seconds: f64,

    /// Same-class IoU above which a detection is a duplicate (default: 0.5)
    pub dedup_iou_threshold: f64,

    /// Frames to wait before declaring an exit.
    ///
    /// Declared by the deployed configuration but not consulted: departures
    /// fire on the first cycle an identity is absent.
    pub exit_grace_frames: u32,

    /// Lane index → actuator output channel
    pub lane_channels: Vec<u8>,

    /// Offset from UTC used when stamping dwell records (default: +05:30)
    pub utc_offset_minutes: i32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        let mut emergency_weights = HashMap::new();
        emergency_weights.insert("fire truck".to_string(), 2.0);
        emergency_weights.insert("police car".to_string(), 4.0);

        Self {
            lane_count: 4,
            w_wait: 0.5,
            w_queue: 1.0,
            w_emerg: 2.0,
            emergency_weights,
            alpha: 0.2,
            min_hold_seconds: 5.0,
            dedup_iou_threshold: 0.5,
            exit_grace_frames: 5,
            lane_channels: vec![3, 1, 2, 4],
            utc_offset_minutes: 330,
        }
    }
}

impl ArbiterConfig {
    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lane_count == 0 {
            return Err(ConfigError::Invalid("lane_count must be at least 1".into()));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        if !(self.min_hold_seconds >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "min_hold_seconds must be non-negative, got {}",
                self.min_hold_seconds
            )));
        }
        for (name, w) in [("w_wait", self.w_wait), ("w_queue", self.w_queue), ("w_emerg", self.w_emerg)] {
            if !(w >= 0.0) || !w.is_finite() {
                return Err(ConfigError::Invalid(format!("{} must be a non-negative number, got {}", name, w)));
            }
        }
        if let Some((label, w)) = self.emergency_weights.iter().find(|(_, w)| !(**w >= 0.0)) {
            return Err(ConfigError::Invalid(format!(
                "emergency weight for '{}' must be non-negative, got {}",
                label, w
            )));
        }
        if !(0.0..=1.0).contains(&self.dedup_iou_threshold) {
            return Err(ConfigError::Invalid(format!(
                "dedup_iou_threshold must be in [0, 1], got {}",
                self.dedup_iou_threshold
            )));
        }
        if self.lane_channels.len() < self.lane_count {
            return Err(ConfigError::Invalid(format!(
                "lane_channels maps {} lanes but lane_count is {}",
                self.lane_channels.len(),
                self.lane_count
            )));
        }
        Ok(())
    }

    /// Returns true if `label` is an emergency class.
    pub fn is_emergency(&self, label: &str) -> bool {
        self.emergency_weights.contains_key(label)
    }
}

// ============================================================================
// RUNTIME
// ============================================================================

/// Configuration for the controller runtime and its background tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Target cycle period in seconds (default: 1/30)
    pub cycle_interval_secs: f64,

    /// Capacity of the command outbox (default: 64)
    pub command_outbox_capacity: usize,

    /// Capacity of the sink-fault channel to the replicator (default: 16)
    pub fault_channel_capacity: usize,

    /// Fixed delay between actuator reconnect attempts (default: 5s)
    pub reconnect_backoff_secs: f64,

    /// Interval between log replication attempts (default: 60s)
    pub replication_interval_secs: f64,

    /// Where lane regions are loaded from and saved to
    pub region_config_path: PathBuf,

    /// Append-only dwell log (JSON lines)
    pub dwell_log_path: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 1.0 / 30.0,
            command_outbox_capacity: 64,
            fault_channel_capacity: 16,
            reconnect_backoff_secs: 5.0,
            replication_interval_secs: 60.0,
            region_config_path: PathBuf::from("regions_config.json"),
            dwell_log_path: PathBuf::from("vehicle_logs.jsonl"),
        }
    }
}

impl RuntimeConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs_f64(self.cycle_interval_secs.max(0.0))
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_backoff_secs.max(0.0))
    }

    pub fn replication_interval(&self) -> Duration {
        Duration::from_secs_f64(self.replication_interval_secs.max(0.0))
    }

    /// Check the invariants the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_outbox_capacity == 0 || self.fault_channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel capacities must be at least 1".into()));
        }
        for (name, secs) in [
            ("cycle_interval_secs", self.cycle_interval_secs),
            ("reconnect_backoff_secs", self.reconnect_backoff_secs),
            ("replication_interval_secs", self.replication_interval_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::Invalid(format!("{} must be a non-negative number, got {}", name, secs)));
            }
        }
        Ok(())
    }
}

// ============================================================================
// CONTROLLER FILE
// ============================================================================

/// Top-level configuration file: `{"arbiter": {...}, "runtime": {...}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub arbiter: ArbiterConfig,
    pub runtime: RuntimeConfig,
}

impl ControllerConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: ControllerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().is_file() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.arbiter.validate()?;
        self.runtime.validate()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.arbiter.lane_count, 4);
        assert_eq!(config.arbiter.lane_channels, vec![3, 1, 2, 4]);
        assert!(config.arbiter.is_emergency("police car"));
        assert!(!config.arbiter.is_emergency("car"));
    }

    #[test]
    fn test_alpha_out_of_range_rejected() {
        let config = ArbiterConfig { alpha: 0.0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = ArbiterConfig { alpha: 1.5, ..Default::default() };
        assert!(config.validate().is_err());

        let config = ArbiterConfig { alpha: 1.0, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dedup_threshold_range() {
        for bad in [-0.1, 1.5, f64::NAN] {
            let config = ArbiterConfig { dedup_iou_threshold: bad, ..Default::default() };
            assert!(config.validate().is_err(), "{}", bad);
        }
        for good in [0.0, 0.5, 1.0] {
            let config = ArbiterConfig { dedup_iou_threshold: good, ..Default::default() };
            assert!(config.validate().is_ok(), "{}", good);
        }
    }

    #[test]
    fn test_missing_channel_mapping_rejected() {
        let config = ArbiterConfig {
            lane_count: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"arbiter": {"alpha": 0.5, "min_hold_seconds": 8.0}}"#;
        let config: ControllerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.arbiter.alpha, 0.5);
        assert_eq!(config.arbiter.min_hold_seconds, 8.0);
        assert_eq!(config.arbiter.w_wait, 0.5);
        assert_eq!(config.runtime.command_outbox_capacity, 64);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let path = std::env::temp_dir().join(format!("lanegate-missing-{}.json", uuid::Uuid::new_v4()));
        let config = ControllerConfig::load_or_default(&path).unwrap();
        assert_eq!(config.arbiter.lane_count, 4);
    }

    #[test]
    fn test_runtime_durations() {
        let config = RuntimeConfig::default();
        assert_eq!(config.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(config.replication_interval(), Duration::from_secs(60));
    }
}
