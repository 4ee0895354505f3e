//! Axis configuration from TOML.

use serde::Deserialize;

use super::limits::EditLimits;
use super::units::{MmPerSec, MmPerSecSquared};

/// Complete axis configuration from TOML.
///
/// Coupled geometries describe motors here: `[axes.x]` is motor A.
#[derive(Debug, Clone, Deserialize)]
pub struct AxisConfig {
    /// Motor steps per millimeter (per degree for arm joints).
    pub steps_per_unit: f32,

    /// Maximum feedrate in millimeters per second.
    #[serde(rename = "max_feedrate_mm_s")]
    pub max_feedrate: MmPerSec,

    /// Maximum acceleration in millimeters per second squared.
    #[serde(rename = "max_acceleration_mm_s2")]
    pub max_acceleration: MmPerSecSquared,

    /// Maximum instantaneous speed change, used by the jerk cornering model.
    #[serde(default = "default_max_jerk", rename = "max_jerk_mm_s")]
    pub max_jerk: MmPerSec,

    /// Invert direction pin logic.
    #[serde(default)]
    pub invert_direction: bool,

    /// Optional editable ceilings for runtime setters.
    #[serde(default)]
    pub edit_limits: Option<EditLimits>,
}

fn default_max_jerk() -> MmPerSec {
    MmPerSec(10.0)
}

impl AxisConfig {
    /// Millimeters travelled per motor step.
    pub fn mm_per_step(&self) -> f32 {
        1.0 / self.steps_per_unit
    }

    /// Highest step rate this axis can demand, in steps per second.
    pub fn max_step_rate(&self) -> f32 {
        self.max_feedrate.0 * self.steps_per_unit
    }
}
