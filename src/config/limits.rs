//! Edit limits for runtime-tunable axis values.

use serde::Deserialize;

use super::units::{MmPerSec, MmPerSecSquared};
use crate::axis::Axis;
use crate::error::{PlannerError, Setting};

/// Smallest value a setter will accept.
pub const MIN_EDIT_VALUE: f32 = 0.1;

/// Default ceiling as a multiple of the configured value.
pub const DEFAULT_EDIT_FACTOR: f32 = 2.0;

/// Policy for handling setter values outside the editable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LimitPolicy {
    /// Refuse the new value.
    Reject,
    /// Clamp to the nearest bound.
    #[default]
    Clamp,
}

impl LimitPolicy {
    /// Apply the policy to a requested value.
    ///
    /// Returns the value to store, or the error to report under `Reject`.
    pub fn apply(
        self,
        axis: Axis,
        setting: Setting,
        requested: f32,
        max: f32,
    ) -> Result<f32, PlannerError> {
        if !requested.is_finite() {
            return Err(PlannerError::InvalidValue(requested));
        }
        if (MIN_EDIT_VALUE..=max).contains(&requested) {
            return Ok(requested);
        }
        match self {
            LimitPolicy::Reject if requested > max => Err(PlannerError::LimitExceeded {
                axis,
                setting,
                requested,
                max,
            }),
            LimitPolicy::Reject => Err(PlannerError::InvalidValue(requested)),
            LimitPolicy::Clamp => {
                let clamped = requested.max(MIN_EDIT_VALUE).min(max);
                warn!("{} clamped from {} to {}", axis.name(), requested, clamped);
                Ok(clamped)
            }
        }
    }
}

/// Editable ceilings from configuration.
///
/// Missing ceilings default to twice the configured value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditLimits {
    /// Ceiling for the max feedrate setter.
    #[serde(default, rename = "max_feedrate_mm_s")]
    pub max_feedrate: Option<MmPerSec>,

    /// Ceiling for the max acceleration setter.
    #[serde(default, rename = "max_acceleration_mm_s2")]
    pub max_acceleration: Option<MmPerSecSquared>,

    /// Ceiling for the max jerk setter.
    #[serde(default, rename = "max_jerk_mm_s")]
    pub max_jerk: Option<MmPerSec>,

    /// What to do when a setter exceeds a ceiling.
    #[serde(default)]
    pub policy: LimitPolicy,
}

/// Resolved ceilings for one axis (for runtime use).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisEditLimits {
    /// Max feedrate ceiling in mm/s.
    pub max_feedrate: f32,
    /// Max acceleration ceiling in mm/s².
    pub max_acceleration: f32,
    /// Max jerk ceiling in mm/s.
    pub max_jerk: f32,
    /// Limit policy.
    pub policy: LimitPolicy,
}

impl AxisEditLimits {
    /// Resolve ceilings against the configured values.
    pub fn resolve(
        limits: Option<&EditLimits>,
        max_feedrate: f32,
        max_acceleration: f32,
        max_jerk: f32,
    ) -> Self {
        let pick = |v: Option<f32>, base: f32| v.unwrap_or(base * DEFAULT_EDIT_FACTOR);
        match limits {
            Some(l) => Self {
                max_feedrate: pick(l.max_feedrate.map(|v| v.0), max_feedrate),
                max_acceleration: pick(l.max_acceleration.map(|v| v.0), max_acceleration),
                max_jerk: pick(l.max_jerk.map(|v| v.0), max_jerk),
                policy: l.policy,
            },
            None => Self {
                max_feedrate: pick(None, max_feedrate),
                max_acceleration: pick(None, max_acceleration),
                max_jerk: pick(None, max_jerk),
                policy: LimitPolicy::default(),
            },
        }
    }

    /// Ceiling for a setting.
    pub fn ceiling(&self, setting: Setting) -> f32 {
        match setting {
            Setting::MaxFeedrate => self.max_feedrate,
            Setting::MaxAcceleration => self.max_acceleration,
            Setting::MaxJerk => self.max_jerk,
        }
    }

    /// Apply the policy for `setting` on `axis`.
    pub fn apply(&self, axis: Axis, setting: Setting, requested: f32) -> Result<f32, PlannerError> {
        self.policy.apply(axis, setting, requested, self.ceiling(setting))
    }
}
