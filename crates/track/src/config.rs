/// Editor configuration
///
/// Thresholds used by the editing session and playback. Loaded from and
/// saved to JSON; every field has a default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::playback::SummaryThresholds;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Intervals slower than this do not count as moving (km/h)
    pub min_moving_speed_kmh: f64,

    /// Clicks this soon after a drag event are drag artifacts
    pub click_guard_ms: u64,

    /// The temporary anchor hides beyond this pointer distance
    pub temporary_hide_radius_px: f64,

    /// No temporary anchor within this distance of a shown anchor
    pub anchor_proximity_px: f64,

    /// A segment counts as a loop when its ends are this close (meters)
    pub loop_close_distance_m: f64,

    /// Playback summary filters
    pub summary: SummaryThresholds,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            min_moving_speed_kmh: 0.5,
            click_guard_ms: 100,
            temporary_hide_radius_px: 20.0,
            anchor_proximity_px: 10.0,
            loop_close_distance_m: 1000.0,
            summary: SummaryThresholds::default(),
        }
    }
}

impl EditorConfig {
    pub fn with_min_moving_speed(mut self, kmh: f64) -> Self {
        self.min_moving_speed_kmh = kmh;
        self
    }

    pub fn with_click_guard(mut self, ms: u64) -> Self {
        self.click_guard_ms = ms;
        self
    }

    pub fn with_loop_close_distance(mut self, meters: f64) -> Self {
        self.loop_close_distance_m = meters;
        self
    }

    pub fn click_guard(&self) -> Duration {
        Duration::from_millis(self.click_guard_ms)
    }

    /// Save configuration to JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Load configuration from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config = serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }
}
