//! Durable tracking state for walktrack.
//!
//! Only three things survive a restart: the last address shown, when the fix
//! behind it was taken, and whether tracking was on. They are stored in a
//! small YAML file. When the tracking flag was set, the restored state renders
//! exactly the text that was on screen before the restart.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Shown while the first address of a session is still being looked up
pub const LOADING_TEXT: &str = "Loading...";

/// Shown when tracking is off
pub const HINT_TEXT: &str = "Press the button to start tracking your location";

/// State that is persisted across restarts
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SavedState {
    /// Last address lines, joined by newlines
    pub last_address: Option<String>,
    /// Timestamp of the fix behind `last_address`
    pub last_update: Option<DateTime<Utc>>,
    /// Whether tracking was on
    pub tracking: bool,
}

impl SavedState {
    /// Load the state from the specified path, or an empty state if there is none
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file from {}", path.display()))?;

        let state: SavedState = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse state file from {}", path.display()))?;

        Ok(state)
    }

    /// Save the state to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory for {}", path.display())
                })?;
            }
        }

        let yaml =
            serde_yaml::to_string(self).with_context(|| "Failed to serialize state to YAML")?;

        fs::write(path, yaml)
            .with_context(|| format!("Failed to write state file to {}", path.display()))?;

        Ok(())
    }

    /// The address panel text, when tracking is on
    pub fn display_text(&self) -> Option<String> {
        if !self.tracking {
            return None;
        }

        let address = self.last_address.as_deref().unwrap_or(LOADING_TEXT);
        Some(format_address_text(address, self.last_update))
    }

    /// What the address panel shows, falling back to the hint when not tracking
    pub fn screen_text(&self) -> String {
        self.display_text()
            .unwrap_or_else(|| HINT_TEXT.to_string())
    }
}

/// Formats the address panel: the address, then the 12-hour time of the fix
pub fn format_address_text(address: &str, timestamp: Option<DateTime<Utc>>) -> String {
    let time = timestamp
        .map(|t| t.format("%I:%M:%S %p").to_string())
        .unwrap_or_else(|| "--".to_string());

    format!("Address: {address}\nTimestamp: {time}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tracking_state() -> SavedState {
        SavedState {
            last_address: Some("1600 Amphitheatre Pkwy\nMountain View, CA".to_string()),
            last_update: DateTime::from_timestamp_millis(1_700_000_000_000),
            tracking: true,
        }
    }

    #[test]
    fn test_display_text_when_tracking() {
        let text = tracking_state().display_text().unwrap();
        assert_eq!(
            text,
            "Address: 1600 Amphitheatre Pkwy\nMountain View, CA\nTimestamp: 10:13:20 PM"
        );
    }

    #[test]
    fn test_no_display_text_when_idle() {
        let mut state = tracking_state();
        state.tracking = false;

        assert!(state.display_text().is_none());
        assert_eq!(state.screen_text(), HINT_TEXT);
    }

    #[test]
    fn test_loading_text_without_address() {
        let state = SavedState {
            tracking: true,
            ..Default::default()
        };
        assert_eq!(
            state.display_text().unwrap(),
            "Address: Loading...\nTimestamp: --"
        );
    }

    #[test]
    fn test_save_load_state() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("data/state.yaml");

        let state = tracking_state();
        state.save(&path)?;

        let loaded = SavedState::load(&path)?;
        assert_eq!(loaded, state);
        assert_eq!(loaded.display_text(), state.display_text());

        Ok(())
    }

    #[test]
    fn test_load_nonexistent_is_default() -> Result<()> {
        let temp_dir = tempdir()?;
        let state = SavedState::load(&temp_dir.path().join("missing.yaml"))?;
        assert_eq!(state, SavedState::default());
        Ok(())
    }
}
