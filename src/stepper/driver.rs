//! Step and direction outputs.
//!
//! The engine talks to the motors through [`StepOutput`]. [`PinStepOutput`]
//! drives embedded-hal 1.0 pins; [`StepCounter`] only counts, for hosted
//! simulation.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::axis::{Axis, Direction, PerAxis, NUM_AXES};

/// Default STEP pulse width in nanoseconds.
pub const DEFAULT_PULSE_WIDTH_NS: u32 = 2000;

/// Where the engine sends its pulses.
///
/// Called from the step interrupt: implementations must not block beyond
/// the pulse width and cannot report errors.
pub trait StepOutput {
    /// Set the DIR level of a motor. `direction` already includes the
    /// configured inversion.
    fn set_direction(&mut self, axis: Axis, direction: Direction);

    /// Emit one STEP pulse on a motor.
    fn pulse(&mut self, axis: Axis);

    /// Route the E channel to another extruder.
    fn select_extruder(&mut self, _extruder: u8) {}
}

/// STEP/DIR pin pairs for every motor.
///
/// Generic over:
/// - `STEP`: STEP pin type (must implement `OutputPin`)
/// - `DIR`: DIR pin type (must implement `OutputPin`)
/// - `DELAY`: Delay provider for the pulse width (must implement `DelayNs`)
///
/// Pin errors are counted, not propagated.
pub struct PinStepOutput<STEP, DIR, DELAY>
where
    STEP: OutputPin,
    DIR: OutputPin,
    DELAY: DelayNs,
{
    step_pins: [STEP; NUM_AXES],
    dir_pins: [DIR; NUM_AXES],
    delay: DELAY,
    pulse_width_ns: u32,
    pin_errors: u32,
}

impl<STEP, DIR, DELAY> PinStepOutput<STEP, DIR, DELAY>
where
    STEP: OutputPin,
    DIR: OutputPin,
    DELAY: DelayNs,
{
    /// Pins in X, Y, Z, E order.
    pub fn new(step_pins: [STEP; NUM_AXES], dir_pins: [DIR; NUM_AXES], delay: DELAY) -> Self {
        Self {
            step_pins,
            dir_pins,
            delay,
            pulse_width_ns: DEFAULT_PULSE_WIDTH_NS,
            pin_errors: 0,
        }
    }

    /// Set the STEP high time.
    pub fn with_pulse_width_ns(mut self, ns: u32) -> Self {
        self.pulse_width_ns = ns;
        self
    }

    /// Pin writes that failed so far.
    #[inline]
    pub fn pin_errors(&self) -> u32 {
        self.pin_errors
    }

    /// Give the pins back.
    pub fn release(self) -> ([STEP; NUM_AXES], [DIR; NUM_AXES], DELAY) {
        (self.step_pins, self.dir_pins, self.delay)
    }

    fn count<E>(&mut self, result: core::result::Result<(), E>) {
        if result.is_err() {
            self.pin_errors = self.pin_errors.saturating_add(1);
        }
    }
}

impl<STEP, DIR, DELAY> StepOutput for PinStepOutput<STEP, DIR, DELAY>
where
    STEP: OutputPin,
    DIR: OutputPin,
    DELAY: DelayNs,
{
    fn set_direction(&mut self, axis: Axis, direction: Direction) {
        let pin = &mut self.dir_pins[axis.index()];
        let result = match direction {
            Direction::Positive => pin.set_high(),
            Direction::Negative => pin.set_low(),
        };
        self.count(result);
    }

    fn pulse(&mut self, axis: Axis) {
        let high = self.step_pins[axis.index()].set_high();
        self.count(high);
        self.delay.delay_ns(self.pulse_width_ns);
        let low = self.step_pins[axis.index()].set_low();
        self.count(low);
    }
}

/// Output that only counts pulses.
///
/// Keeps a signed position per motor from the DIR levels it was given, so
/// a simulation can compare it with the engine's own count.
#[derive(Debug, Clone)]
pub struct StepCounter {
    direction: PerAxis<Direction>,
    position: PerAxis<i64>,
    pulses: PerAxis<u64>,
    direction_changes: PerAxis<u32>,
    extruder: u8,
}

impl StepCounter {
    /// All motors at zero, DIR low.
    pub const fn new() -> Self {
        Self {
            direction: PerAxis([Direction::Negative; NUM_AXES]),
            position: PerAxis([0; NUM_AXES]),
            pulses: PerAxis([0; NUM_AXES]),
            direction_changes: PerAxis([0; NUM_AXES]),
            extruder: 0,
        }
    }

    /// Signed pulse count per motor.
    #[inline]
    pub fn position(&self) -> PerAxis<i64> {
        self.position
    }

    /// Pulses emitted per motor regardless of direction.
    #[inline]
    pub fn pulses(&self) -> PerAxis<u64> {
        self.pulses
    }

    /// DIR level changes per motor.
    #[inline]
    pub fn direction_changes(&self) -> PerAxis<u32> {
        self.direction_changes
    }

    /// Extruder the E channel drives.
    #[inline]
    pub fn extruder(&self) -> u8 {
        self.extruder
    }
}

impl Default for StepCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl StepOutput for StepCounter {
    fn set_direction(&mut self, axis: Axis, direction: Direction) {
        if self.direction[axis] != direction {
            self.direction_changes[axis] += 1;
        }
        self.direction[axis] = direction;
    }

    fn pulse(&mut self, axis: Axis) {
        self.position[axis] += self.direction[axis].sign();
        self.pulses[axis] += 1;
    }

    fn select_extruder(&mut self, extruder: u8) {
        self.extruder = extruder;
    }
}
