//! Configuration module for lookahead-motion.
//!
//! Provides types for loading and validating machine configuration from
//! TOML files (with `std` feature) or pre-parsed data. The core consumes
//! these values; it never writes them back.

mod axis;
mod limits;
mod machine;
mod mechanical;
mod motion;
mod planner;
pub mod units;
#[cfg(feature = "std")]
mod loader;
mod validation;

pub use axis::AxisConfig;
pub use limits::{AxisEditLimits, EditLimits, LimitPolicy, MIN_EDIT_VALUE};
pub use machine::MachineConfig;
pub use mechanical::MechanicalConstraints;
pub use motion::{AdvanceConfig, AdvanceMode, ShapingAxisConfig, StepperConfig};
pub use planner::{CorneringConfig, PlannerConfig};
pub use validation::validate_config;

#[cfg(feature = "std")]
pub use loader::{load_config, parse_config};

// Re-export unit types at config level
pub use units::{DampingRatio, Millimeters, MmPerSec, MmPerSecSquared};
