//! Step-domain constraints derived from the axis configuration.

use libm::roundf;

use super::axis::AxisConfig;
use super::limits::AxisEditLimits;
use super::machine::MachineConfig;
use crate::axis::{Axis, AxisBits, PerAxis};
use crate::error::{ConfigError, Result};

/// Derived per-axis parameters computed from the machine configuration.
///
/// Owned by the planner; setters keep the step-domain values in sync with
/// the unit values.
#[derive(Debug, Clone)]
pub struct MechanicalConstraints {
    /// Motor steps per unit.
    pub steps_per_unit: PerAxis<f32>,

    /// Units per motor step.
    pub mm_per_step: PerAxis<f32>,

    /// Maximum feedrate in units per second.
    pub max_feedrate: PerAxis<f32>,

    /// Maximum acceleration in units per second squared.
    pub max_acceleration: PerAxis<f32>,

    /// Maximum acceleration in steps per second squared.
    pub max_acceleration_steps_per_s2: PerAxis<u32>,

    /// Maximum instantaneous speed change in units per second.
    pub max_jerk: PerAxis<f32>,

    /// Axes whose direction output is inverted.
    pub invert_direction: AxisBits,

    /// Editable ceilings.
    pub edit_limits: PerAxis<AxisEditLimits>,
}

impl MechanicalConstraints {
    /// Compute constraints from the machine configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingAxis` if any of X, Y, Z, E is absent.
    pub fn from_config(config: &MachineConfig) -> Result<Self> {
        let require = |axis: Axis| config.axis(axis).ok_or(ConfigError::MissingAxis(axis));
        let axes: PerAxis<&AxisConfig> = PerAxis([
            require(Axis::X)?,
            require(Axis::Y)?,
            require(Axis::Z)?,
            require(Axis::E)?,
        ]);

        let mut invert_direction = AxisBits::NONE;
        for axis in Axis::ALL {
            invert_direction.set(axis, axes[axis].invert_direction);
        }

        let steps_per_unit = PerAxis::from_fn(|a| axes[a].steps_per_unit);
        let max_feedrate = PerAxis::from_fn(|a| axes[a].max_feedrate.0);
        let max_acceleration = PerAxis::from_fn(|a| axes[a].max_acceleration.0);
        let max_jerk = PerAxis::from_fn(|a| axes[a].max_jerk.0);
        let edit_limits = PerAxis::from_fn(|a| {
            let c = axes[a];
            AxisEditLimits::resolve(
                c.edit_limits.as_ref(),
                c.max_feedrate.0,
                c.max_acceleration.0,
                c.max_jerk.0,
            )
        });

        let mut constraints = Self {
            steps_per_unit,
            mm_per_step: steps_per_unit.map(|s| 1.0 / s),
            max_feedrate,
            max_acceleration,
            max_acceleration_steps_per_s2: PerAxis::splat(0),
            max_jerk,
            invert_direction,
            edit_limits,
        };
        constraints.refresh_acceleration_rates();
        Ok(constraints)
    }

    /// Recompute step-domain accelerations after a unit change.
    pub fn refresh_acceleration_rates(&mut self) {
        for axis in Axis::ALL {
            self.max_acceleration_steps_per_s2[axis] =
                (self.max_acceleration[axis] * self.steps_per_unit[axis]) as u32;
        }
    }

    /// Convert units to steps, rounding to the nearest step.
    #[inline]
    pub fn mm_to_steps(&self, axis: Axis, mm: f32) -> i64 {
        roundf(mm * self.steps_per_unit[axis]) as i64
    }

    /// Convert steps to units.
    #[inline]
    pub fn steps_to_mm(&self, axis: Axis, steps: i64) -> f32 {
        steps as f32 * self.mm_per_step[axis]
    }

    /// Highest step rate an axis can demand at its max feedrate.
    #[inline]
    pub fn max_step_rate(&self, axis: Axis) -> f32 {
        self.max_feedrate[axis] * self.steps_per_unit[axis]
    }
}
