//! Configuration validation.

use crate::axis::Axis;
use crate::error::{ConfigError, Error, Result};
use crate::kinematics::Kinematics;

use super::{AxisConfig, CorneringConfig, MachineConfig};

/// Validate a machine configuration.
///
/// Checks:
/// - Axis names are known and X, Y, Z, E are all present
/// - Per-axis rates are positive and edit ceilings are not below them
/// - Planner accelerations, feedrate floors and cornering constants
/// - Advance factors and time constant
/// - Shaping is only on X, Y, Z with sane frequency
/// - Stepper ISR frequencies and multistepping limit
/// - Arm lengths for SCARA
pub fn validate_config(config: &MachineConfig) -> Result<()> {
    for name in config.axis_names() {
        if Axis::from_name(name).is_none() {
            return Err(Error::Config(ConfigError::UnknownAxis(
                heapless::String::try_from(name).unwrap_or_default(),
            )));
        }
    }

    for axis in Axis::ALL {
        match config.axis(axis) {
            Some(a) => validate_axis(axis, a)?,
            None => return Err(Error::Config(ConfigError::MissingAxis(axis))),
        }
    }

    validate_planner(config)?;
    validate_advance(config)?;
    validate_shaping(config)?;
    validate_stepper(config)?;
    validate_kinematics(&config.kinematics)?;

    Ok(())
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

fn non_negative(v: f32) -> bool {
    v.is_finite() && v >= 0.0
}

fn validate_axis(axis: Axis, config: &AxisConfig) -> Result<()> {
    if !positive(config.steps_per_unit) {
        return Err(Error::Config(ConfigError::InvalidStepsPerUnit {
            axis,
            value: config.steps_per_unit,
        }));
    }

    if !positive(config.max_feedrate.0) {
        return Err(Error::Config(ConfigError::InvalidMaxFeedrate {
            axis,
            value: config.max_feedrate.0,
        }));
    }

    if !positive(config.max_acceleration.0) {
        return Err(Error::Config(ConfigError::InvalidMaxAcceleration {
            axis,
            value: config.max_acceleration.0,
        }));
    }

    if !non_negative(config.max_jerk.0) {
        return Err(Error::Config(ConfigError::InvalidMaxJerk {
            axis,
            value: config.max_jerk.0,
        }));
    }

    if let Some(ref limits) = config.edit_limits {
        let below = |ceiling: Option<f32>, value: f32| ceiling.map_or(false, |c| c < value);
        if below(limits.max_feedrate.map(|v| v.0), config.max_feedrate.0)
            || below(limits.max_acceleration.map(|v| v.0), config.max_acceleration.0)
            || below(limits.max_jerk.map(|v| v.0), config.max_jerk.0)
        {
            return Err(Error::Config(ConfigError::InvalidEditLimits(axis)));
        }
    }

    Ok(())
}

fn validate_planner(config: &MachineConfig) -> Result<()> {
    let planner = &config.planner;

    for accel in [
        planner.acceleration.0,
        planner.travel_acceleration(),
        planner.retract_acceleration(),
    ] {
        if !positive(accel) {
            return Err(Error::Config(ConfigError::InvalidAcceleration(accel)));
        }
    }

    for floor in [
        planner.min_feedrate.0,
        planner.min_travel_feedrate.0,
        planner.safe_exit_speed.0,
    ] {
        if !non_negative(floor) {
            return Err(Error::Config(ConfigError::InvalidMinFeedrate(floor)));
        }
    }

    if let CorneringConfig::JunctionDeviation { deviation } = planner.cornering {
        if !positive(deviation.0) {
            return Err(Error::Config(ConfigError::InvalidJunctionDeviation(deviation.0)));
        }
    }

    Ok(())
}

fn validate_advance(config: &MachineConfig) -> Result<()> {
    for &k in config.advance.k.iter() {
        if !non_negative(k) {
            return Err(Error::Config(ConfigError::InvalidAdvanceFactor(k)));
        }
    }

    if !positive(config.advance.tau) {
        return Err(Error::Config(ConfigError::InvalidAdvanceTau(config.advance.tau)));
    }

    Ok(())
}

fn validate_shaping(config: &MachineConfig) -> Result<()> {
    for (name, shaping) in config.shaping.iter() {
        let axis = match Axis::from_name(name.as_str()) {
            Some(axis) => axis,
            None => {
                return Err(Error::Config(ConfigError::UnknownAxis(name.clone())));
            }
        };

        if axis == Axis::E {
            return Err(Error::Config(ConfigError::ShapingNotSupported(axis)));
        }

        if !non_negative(shaping.frequency_hz) {
            return Err(Error::Config(ConfigError::InvalidShapingFrequency {
                axis,
                value: shaping.frequency_hz,
            }));
        }
    }

    Ok(())
}

fn validate_stepper(config: &MachineConfig) -> Result<()> {
    let stepper = &config.stepper;

    let limit = stepper.multistepping_limit;
    if limit == 0 || !limit.is_power_of_two() {
        return Err(Error::Config(ConfigError::InvalidMultistepping(limit)));
    }

    let (min, max) = (stepper.min_isr_frequency(), stepper.max_isr_frequency);
    if min == 0 || max == 0 || min > max || max > crate::STEPPER_TIMER_RATE / 2 {
        return Err(Error::Config(ConfigError::InvalidIsrFrequency { min, max }));
    }

    Ok(())
}

fn validate_kinematics(kinematics: &Kinematics) -> Result<()> {
    if let Kinematics::Scara(g) = kinematics {
        if !positive(g.proximal_arm) || !positive(g.distal_arm) {
            return Err(Error::Config(ConfigError::InvalidArmGeometry {
                proximal: g.proximal_arm,
                distal: g.distal_arm,
            }));
        }
    }

    Ok(())
}
