//! Engine configuration
//!
//! Every section falls back to its defaults, so a partial JSON file only
//! needs to name the values it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::ids::{GameTime, LocationId};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub progression: ProgressionConfig,
    pub capacity: CapacityConfig,
    pub proximity: ProximityConfig,
    pub transfer: TransferConfig,
    pub scheduler: SchedulerConfig,
    /// Locations treated as untracked endpoints (vendor chests, barter
    /// containers). Moves into or out of them register or drop instances.
    pub excluded_locations: Vec<LocationId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    /// Largest absolute progress slope a catalyst may apply.
    pub max_strength: f64,
    /// Slopes with a smaller magnitude count as frozen.
    pub slope_epsilon: f64,
    /// Stages longer than this with no active catalyst are held at their
    /// start instead of accumulating elapsed time.
    pub critical_duration: GameTime,
    /// Elapsed-progress tolerance under which two instances merge (0.9 min).
    pub merge_tolerance: GameTime,
    /// How long a decayed instance is kept after its decay time.
    pub retention: GameTime,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            max_strength: 10.0,
            slope_epsilon: 1e-6,
            critical_duration: 24.0 * 365.0 * 100.0,
            merge_tolerance: 0.9 / 60.0,
            retention: 24.0 * 30.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Soft limit on tracked instances; exceeding it only warns.
    pub max_instances: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self { max_instances: 20_000 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Catalyst search radius around a world placement, in world units.
    pub search_radius: f32,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self { search_radius: 300.0 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Tasks applied per owner per drain.
    pub max_tasks_per_tick: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self { max_tasks_per_tick: 64 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Milliseconds between background ticks.
    pub interval_ms: u64,
    /// Start the background scheduler whenever a pending timer appears.
    pub auto_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            auto_start: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.progression;
        if !(p.max_strength > 0.0) {
            return Err(ConfigError::Invalid("progression.max_strength must be positive".into()));
        }
        if p.slope_epsilon < 0.0 || p.merge_tolerance < 0.0 || p.retention < 0.0 {
            return Err(ConfigError::Invalid(
                "progression tolerances must not be negative".into(),
            ));
        }
        if self.scheduler.interval_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.interval_ms must be positive".into()));
        }
        if self.proximity.search_radius < 0.0 {
            return Err(ConfigError::Invalid("proximity.search_radius must not be negative".into()));
        }
        Ok(())
    }

    /// Manual-tick configuration used by tests and tooling
    pub fn manual() -> Self {
        let mut config = Self::default();
        config.scheduler.auto_start = false;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "capacity": { "max_instances": 5 } }"#).unwrap();
        assert_eq!(config.capacity.max_instances, 5);
        assert_eq!(config.transfer.max_tasks_per_tick, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut config = EngineConfig::default();
        config.scheduler.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "proximity": { "search_radius": 42.0 } }"#).unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.proximity.search_radius, 42.0);
    }
}
