use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::location::{Priority, TrackingPolicy};

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub policy: PolicyConfig,
    pub state_file: String,
    pub geocoder: GeocoderConfig,
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub places_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub interval_ms: u64,
    pub fastest_interval_ms: u64,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocoderProvider {
    Mock,
    Nominatim,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    pub provider: GeocoderProvider,
    pub base_url: String,
    pub user_agent: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub step_degrees: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: PolicyConfig {
                interval_ms: 10_000,
                fastest_interval_ms: 5_000,
                priority: Priority::HighAccuracy,
            },
            state_file: "data/walktrack_state.yaml".to_string(),
            geocoder: GeocoderConfig {
                provider: GeocoderProvider::Mock,
                base_url: "https://nominatim.openstreetmap.org".to_string(),
                user_agent: format!("walktrack/{}", env!("CARGO_PKG_VERSION")),
                language: None,
            },
            simulation: SimulationConfig {
                start_latitude: 37.422,
                start_longitude: -122.084,
                step_degrees: 0.0005,
            },
            places_enabled: false,
        }
    }
}

impl PolicyConfig {
    /// Validates the configured intervals into a tracking policy
    pub fn to_policy(&self) -> Result<TrackingPolicy> {
        let policy = TrackingPolicy::new(
            Duration::from_millis(self.interval_ms),
            Duration::from_millis(self.fastest_interval_ms),
            self.priority,
        )
        .context("Invalid tracking policy in config")?;

        Ok(policy)
    }
}

impl Config {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        config.policy.to_policy()?;

        Ok(config)
    }

    pub fn get_config_path(config_arg: &Option<PathBuf>) -> PathBuf {
        config_arg
            .clone()
            .unwrap_or_else(|| PathBuf::from("walktrack.yaml"))
    }
}
