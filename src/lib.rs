//! # lookahead-motion
//!
//! Look-ahead motion planning and real-time step generation for 3D printers
//! and similar stepper-driven machines.
//!
//! ## Features
//!
//! - **Look-ahead planner**: Bounded queue of trapezoidal blocks, re-planned
//!   backward and forward on every enqueue so the machine never has to stop
//!   at a junction it could corner through
//! - **Cornering models**: Junction deviation or classic per-axis jerk
//! - **Kinematics**: Cartesian, CoreXY/XZ/YZ, Markforged and SCARA
//! - **Step engine**: Bresenham stepping on a trapezoid timer, multistepping
//!   and adaptive oversampling of slow blocks
//! - **Linear advance**: Rough (secondary accumulator) or smooth (filtered
//!   look-ahead) extruder pressure compensation
//! - **Input shaping**: Zero-vibration shaper on X, Y and Z
//! - **embedded-hal 1.0**: Uses `OutputPin` for STEP/DIR, `DelayNs` for the
//!   pulse width
//! - **no_std compatible**: No heap, no floating point `std` calls; the
//!   block queue locks through `critical-section`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lookahead_motion::{MotionQueue, MotionSystem, PerAxis, SimulatedTimer, StepCounter};
//!
//! // Block queue shared by the planner and the step interrupt
//! static QUEUE: MotionQueue = MotionQueue::new();
//!
//! // Load configuration from TOML
//! let config = lookahead_motion::load_config("machine.toml")?;
//!
//! // Couple the planner with an engine and an output
//! let mut system: MotionSystem<_, _> =
//!     MotionSystem::from_config(&config, &QUEUE, SimulatedTimer::new(), StepCounter::new())?;
//!
//! // Queue moves in mm at mm/s
//! system.enqueue(PerAxis([50.0, 0.0, 0.0, 0.0]), 100.0, 0);
//! system.enqueue(PerAxis([50.0, 50.0, 0.0, 0.0]), 100.0, 0);
//!
//! // In firmware, call `system.isr()` from the step timer and program the
//! // returned interval; hosted, just run everything out
//! system.synchronize();
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Enables file I/O and TOML parsing
//! - `alloc`: Enables heap allocation for no_std with allocator
//! - `defmt`: Enables defmt logging for embedded targets

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]
// Allow large error types - necessary for no_std with heapless strings
#![allow(clippy::result_large_err)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[macro_use]
mod fmt;

// Core modules
pub mod advance;
pub mod axis;
pub mod config;
pub mod error;
pub mod kinematics;
pub mod planner;
pub mod shaping;
pub mod stepper;
pub mod system;
pub mod telemetry;

// Re-exports for ergonomic API
pub use axis::{Axis, AxisBits, Direction, PerAxis, MAX_EXTRUDERS, NUM_AXES};
pub use config::{validate_config, AdvanceMode, MachineConfig, MechanicalConstraints};
pub use error::{ConfigError, Error, PlannerError, Result, StepperError};
pub use kinematics::Kinematics;
pub use planner::{Block, MotionQueue, MoveHints, Planner, BLOCK_BUFFER_SIZE};
pub use shaping::{AxisShaper, SHAPING_QUEUE_SIZE};
pub use stepper::timing::STEPPER_TIMER_RATE;
pub use stepper::{PinStepOutput, SimulatedTimer, StepCounter, StepOutput, Stepper, StepperTimer};
pub use system::MotionSystem;
pub use telemetry::Telemetry;

// Configuration loading (std only)
#[cfg(feature = "std")]
pub use config::{load_config, parse_config};

// Unit types
pub use config::units::{DampingRatio, Millimeters, MmPerSec, MmPerSecSquared};
