//! Machine configuration - root configuration structure.

use heapless::{FnvIndexMap, String};
use serde::Deserialize;

use super::axis::AxisConfig;
use super::motion::{AdvanceConfig, ShapingAxisConfig, StepperConfig};
use super::planner::PlannerConfig;
use crate::axis::Axis;
use crate::kinematics::Kinematics;

/// Root configuration structure from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    /// Machine geometry.
    #[serde(default)]
    pub kinematics: Kinematics,

    /// Per-axis (per-motor for coupled geometries) settings keyed by axis name.
    pub axes: FnvIndexMap<String<32>, AxisConfig, 8>,

    /// Planner tuning.
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Linear advance.
    #[serde(default)]
    pub advance: AdvanceConfig,

    /// Input shaping keyed by axis name.
    #[serde(default)]
    pub shaping: FnvIndexMap<String<32>, ShapingAxisConfig, 4>,

    /// Stepper engine tuning.
    #[serde(default)]
    pub stepper: StepperConfig,
}

impl MachineConfig {
    /// Get an axis configuration.
    pub fn axis(&self, axis: Axis) -> Option<&AxisConfig> {
        self.axes
            .iter()
            .find(|(k, _)| Axis::from_name(k.as_str()) == Some(axis))
            .map(|(_, v)| v)
    }

    /// Get the shaping configuration of an axis.
    pub fn shaping(&self, axis: Axis) -> Option<&ShapingAxisConfig> {
        self.shaping
            .iter()
            .find(|(k, _)| Axis::from_name(k.as_str()) == Some(axis))
            .map(|(_, v)| v)
    }

    /// List all configured axis names.
    pub fn axis_names(&self) -> impl Iterator<Item = &str> {
        self.axes.keys().map(|s| s.as_str())
    }

    /// Number of extruders with an advance factor (at least one).
    pub fn extruders(&self) -> usize {
        self.advance.k.len().max(1)
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            kinematics: Kinematics::default(),
            axes: FnvIndexMap::new(),
            planner: PlannerConfig::default(),
            advance: AdvanceConfig::default(),
            shaping: FnvIndexMap::new(),
            stepper: StepperConfig::default(),
        }
    }
}
