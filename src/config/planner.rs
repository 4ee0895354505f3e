//! Planner configuration from TOML.

use serde::Deserialize;

use super::units::{Millimeters, MmPerSec, MmPerSecSquared};

/// Cornering speed model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CorneringConfig {
    /// Geometric junction deviation.
    JunctionDeviation {
        /// Deviation of the virtual arc from the corner, in mm.
        #[serde(rename = "deviation_mm")]
        deviation: Millimeters,
    },
    /// Classic per-axis instantaneous speed change (`max_jerk_mm_s` on each axis).
    Jerk,
}

impl Default for CorneringConfig {
    fn default() -> Self {
        CorneringConfig::JunctionDeviation {
            deviation: Millimeters(0.013),
        }
    }
}

/// Planner section of the machine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    /// Acceleration for moves that extrude.
    #[serde(default = "default_acceleration", rename = "acceleration_mm_s2")]
    pub acceleration: MmPerSecSquared,

    /// Acceleration for moves without E; falls back to `acceleration`.
    #[serde(default, rename = "travel_acceleration_mm_s2")]
    pub travel_acceleration: Option<MmPerSecSquared>,

    /// Acceleration for E-only moves; falls back to `acceleration`.
    #[serde(default, rename = "retract_acceleration_mm_s2")]
    pub retract_acceleration: Option<MmPerSecSquared>,

    /// Feedrate floor for moves with E steps.
    #[serde(default, rename = "min_feedrate_mm_s")]
    pub min_feedrate: MmPerSec,

    /// Feedrate floor for travel moves.
    #[serde(default, rename = "min_travel_feedrate_mm_s")]
    pub min_travel_feedrate: MmPerSec,

    /// Segments shorter than this are slowed when the queue runs low.
    #[serde(default = "default_min_segment_time_us")]
    pub min_segment_time_us: u32,

    /// Cornering model.
    #[serde(default)]
    pub cornering: CorneringConfig,

    /// Limit junction speed on short arcs built from small segments.
    #[serde(default = "default_true")]
    pub handle_small_segments: bool,

    /// Speed the newest block may exit at when nothing follows it.
    #[serde(default, rename = "safe_exit_speed_mm_s")]
    pub safe_exit_speed: MmPerSec,
}

fn default_acceleration() -> MmPerSecSquared {
    MmPerSecSquared(1000.0)
}

fn default_min_segment_time_us() -> u32 {
    20_000
}

fn default_true() -> bool {
    true
}

impl PlannerConfig {
    /// Effective travel acceleration.
    pub fn travel_acceleration(&self) -> f32 {
        self.travel_acceleration.unwrap_or(self.acceleration).0
    }

    /// Effective retract acceleration.
    pub fn retract_acceleration(&self) -> f32 {
        self.retract_acceleration.unwrap_or(self.acceleration).0
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            acceleration: default_acceleration(),
            travel_acceleration: None,
            retract_acceleration: None,
            min_feedrate: MmPerSec(0.0),
            min_travel_feedrate: MmPerSec(0.0),
            min_segment_time_us: default_min_segment_time_us(),
            cornering: CorneringConfig::default(),
            handle_small_segments: true,
            safe_exit_speed: MmPerSec(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceleration_fallbacks() {
        let config = PlannerConfig {
            travel_acceleration: Some(MmPerSecSquared(3000.0)),
            ..PlannerConfig::default()
        };
        assert_eq!(config.travel_acceleration(), 3000.0);
        assert_eq!(config.retract_acceleration(), 1000.0);
    }
}
