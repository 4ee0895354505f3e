//! Error types for lookahead-motion.
//!
//! Only configuration, construction and user-facing setters return errors.
//! The real-time paths (enqueue, recompute, the stepper interrupt) never do:
//! a full queue is a `false`, degenerate moves are absorbed and numeric
//! corner cases are floored.

use core::fmt;

use crate::axis::Axis;

/// Result type alias using the library's Error type.
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for all lookahead-motion operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Configuration parsing or validation error
    Config(ConfigError),
    /// Planner setter or construction error
    Planner(PlannerError),
    /// Stepper engine construction or setter error
    Stepper(StepperError),
}

/// Configuration-related errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Failed to parse TOML configuration
    ParseError(heapless::String<128>),
    /// Axis name is not one of x, y, z, e
    UnknownAxis(heapless::String<32>),
    /// A required axis section is missing
    MissingAxis(Axis),
    /// Steps per unit must be finite and > 0
    InvalidStepsPerUnit {
        /// Offending axis
        axis: Axis,
        /// Configured value
        value: f32,
    },
    /// Max feedrate must be finite and > 0
    InvalidMaxFeedrate {
        /// Offending axis
        axis: Axis,
        /// Configured value
        value: f32,
    },
    /// Max acceleration must be finite and > 0
    InvalidMaxAcceleration {
        /// Offending axis
        axis: Axis,
        /// Configured value
        value: f32,
    },
    /// Max jerk must be finite and >= 0
    InvalidMaxJerk {
        /// Offending axis
        axis: Axis,
        /// Configured value
        value: f32,
    },
    /// Edit ceiling below the configured value
    InvalidEditLimits(Axis),
    /// Planner acceleration must be finite and > 0
    InvalidAcceleration(f32),
    /// Minimum feedrate must be finite and >= 0
    InvalidMinFeedrate(f32),
    /// Junction deviation must be finite and > 0
    InvalidJunctionDeviation(f32),
    /// Damping ratio must lie in [0, 1]
    InvalidDampingRatio(f32),
    /// Shaping frequency must be finite and >= 0
    InvalidShapingFrequency {
        /// Offending axis
        axis: Axis,
        /// Configured value
        value: f32,
    },
    /// Input shaping is only available on X, Y and Z
    ShapingNotSupported(Axis),
    /// Advance factor must be finite and >= 0
    InvalidAdvanceFactor(f32),
    /// Too many advance factors for the supported extruders
    TooManyExtruders(usize),
    /// Smooth advance time constant must be finite and > 0
    InvalidAdvanceTau(f32),
    /// Multistepping limit must be a power of two in 1..=128
    InvalidMultistepping(u8),
    /// Step ISR frequencies must be > 0 and min <= max
    InvalidIsrFrequency {
        /// Minimum ISR frequency
        min: u32,
        /// Maximum ISR frequency
        max: u32,
    },
    /// Arm lengths must be finite and > 0
    InvalidArmGeometry {
        /// Proximal arm length
        proximal: f32,
        /// Distal arm length
        distal: f32,
    },
    /// File I/O error (std only)
    #[cfg(feature = "std")]
    IoError(heapless::String<128>),
}

/// Which tunable a setter addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Setting {
    /// Per-axis maximum feedrate
    MaxFeedrate,
    /// Per-axis maximum acceleration
    MaxAcceleration,
    /// Per-axis maximum jerk
    MaxJerk,
}

/// Planner errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerError {
    /// Setter value outside the editable range under the reject policy
    LimitExceeded {
        /// Axis being edited
        axis: Axis,
        /// Which tunable
        setting: Setting,
        /// Requested value
        requested: f32,
        /// Editable ceiling
        max: f32,
    },
    /// Extruder index beyond the configured extruders
    InvalidExtruder(u8),
    /// Value not finite or negative
    InvalidValue(f32),
}

/// Stepper engine errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StepperError {
    /// Echo queue cannot hold the echoes required at this frequency
    ShapingQueueTooSmall {
        /// Entries required
        required: usize,
        /// Compiled capacity
        capacity: usize,
    },
    /// Input shaping is only available on X, Y and Z
    ShapingNotSupported(Axis),
    /// Damping ratio outside [0, 1]
    InvalidDampingRatio(f32),
    /// Frequency not finite or negative
    InvalidFrequency(f32),
    /// Advance time constant not finite or not positive
    InvalidAdvanceTau(f32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Planner(e) => write!(f, "Planner error: {}", e),
            Error::Stepper(e) => write!(f, "Stepper error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ConfigError::UnknownAxis(name) => {
                write!(f, "Unknown axis '{}'. Valid axes: x, y, z, e", name)
            }
            ConfigError::MissingAxis(axis) => write!(f, "Missing [axes.{}] section", axis),
            ConfigError::InvalidStepsPerUnit { axis, value } => {
                write!(f, "Invalid steps per unit on {}: {}. Must be > 0", axis, value)
            }
            ConfigError::InvalidMaxFeedrate { axis, value } => {
                write!(f, "Invalid max feedrate on {}: {}. Must be > 0", axis, value)
            }
            ConfigError::InvalidMaxAcceleration { axis, value } => {
                write!(f, "Invalid max acceleration on {}: {}. Must be > 0", axis, value)
            }
            ConfigError::InvalidMaxJerk { axis, value } => {
                write!(f, "Invalid max jerk on {}: {}. Must be >= 0", axis, value)
            }
            ConfigError::InvalidEditLimits(axis) => {
                write!(f, "Edit limits on {} must not be below the configured values", axis)
            }
            ConfigError::InvalidAcceleration(v) => {
                write!(f, "Invalid planner acceleration: {}. Must be > 0", v)
            }
            ConfigError::InvalidMinFeedrate(v) => {
                write!(f, "Invalid minimum feedrate: {}. Must be >= 0", v)
            }
            ConfigError::InvalidJunctionDeviation(v) => {
                write!(f, "Invalid junction deviation: {}. Must be > 0", v)
            }
            ConfigError::InvalidDampingRatio(v) => {
                write!(f, "Invalid damping ratio: {}. Must be within [0, 1]", v)
            }
            ConfigError::InvalidShapingFrequency { axis, value } => {
                write!(f, "Invalid shaping frequency on {}: {}. Must be >= 0", axis, value)
            }
            ConfigError::ShapingNotSupported(axis) => {
                write!(f, "Input shaping is not available on axis {}", axis)
            }
            ConfigError::InvalidAdvanceFactor(v) => {
                write!(f, "Invalid advance factor: {}. Must be >= 0", v)
            }
            ConfigError::TooManyExtruders(n) => {
                write!(f, "Too many extruders: {} (max {})", n, crate::axis::MAX_EXTRUDERS)
            }
            ConfigError::InvalidAdvanceTau(v) => {
                write!(f, "Invalid advance time constant: {}. Must be > 0", v)
            }
            ConfigError::InvalidMultistepping(v) => {
                write!(f, "Invalid multistepping limit: {}. Valid values: 1, 2, 4, ..., 128", v)
            }
            ConfigError::InvalidIsrFrequency { min, max } => {
                write!(f, "Invalid step ISR frequencies: min {} max {}", min, max)
            }
            ConfigError::InvalidArmGeometry { proximal, distal } => {
                write!(f, "Invalid arm lengths: proximal {} distal {}. Must be > 0", proximal, distal)
            }
            #[cfg(feature = "std")]
            ConfigError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::MaxFeedrate => write!(f, "max feedrate"),
            Setting::MaxAcceleration => write!(f, "max acceleration"),
            Setting::MaxJerk => write!(f, "max jerk"),
        }
    }
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::LimitExceeded { axis, setting, requested, max } => {
                write!(f, "Requested {} {} on {} exceeds limit {}", setting, requested, axis, max)
            }
            PlannerError::InvalidExtruder(e) => write!(f, "Invalid extruder index {}", e),
            PlannerError::InvalidValue(v) => write!(f, "Invalid value {}", v),
        }
    }
}

impl fmt::Display for StepperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepperError::ShapingQueueTooSmall { required, capacity } => {
                write!(f, "Shaping queue needs {} entries, capacity is {}", required, capacity)
            }
            StepperError::ShapingNotSupported(axis) => {
                write!(f, "Input shaping is not available on axis {}", axis)
            }
            StepperError::InvalidDampingRatio(v) => {
                write!(f, "Invalid damping ratio: {}. Must be within [0, 1]", v)
            }
            StepperError::InvalidFrequency(v) => write!(f, "Invalid shaping frequency: {}", v),
            StepperError::InvalidAdvanceTau(v) => write!(f, "Invalid advance time constant: {}", v),
        }
    }
}

// Conversion impls
impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<PlannerError> for Error {
    fn from(e: PlannerError) -> Self {
        Error::Planner(e)
    }
}

impl From<StepperError> for Error {
    fn from(e: StepperError) -> Self {
        Error::Stepper(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

#[cfg(feature = "std")]
impl std::error::Error for PlannerError {}

#[cfg(feature = "std")]
impl std::error::Error for StepperError {}
