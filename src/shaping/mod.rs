//! Zero-vibration input shaping.
//!
//! Each primary step on a shaped axis is split into two half-amplitude
//! impulses: one now and an echo half a resonance period later. The split
//! is done in the step domain with a second Bresenham accumulator working
//! modulo 128: the primary step adds `factor1`, the echo adds `factor2`,
//! and a physical step is emitted whenever the accumulator crosses ±64.
//! With `factor1 + factor2 = 128` every primary step still produces
//! exactly one physical step overall.

mod queue;

pub use queue::ShapingQueue;

use libm::floorf;

use crate::stepper::timing::{NEVER, STEPPER_TIMER_RATE};

/// Default echo queue capacity.
pub const SHAPING_QUEUE_SIZE: usize = 1024;

/// Echo delay in timer ticks for a resonance at `frequency` Hz.
///
/// Half a period; [`NEVER`] for a zero frequency.
pub fn echo_delay(frequency: f32) -> u32 {
    if frequency > 0.0 {
        ((STEPPER_TIMER_RATE / 2) as f32 / frequency) as u32
    } else {
        NEVER
    }
}

/// Echo amplitude in 1/128ths for a damping ratio.
///
/// Third order fit of `K / (1 + K)` with `K = exp(-ζπ / sqrt(1 - ζ²))`.
pub fn damping_factor(zeta: f32) -> u8 {
    if zeta <= 0.0 {
        return 64;
    }
    if zeta >= 1.0 {
        return 0;
    }
    let zeta2 = zeta * zeta;
    let zeta3 = zeta2 * zeta;
    let factor = 64.440_56 - 99.020_09 * zeta - 7.580_955 * zeta2 + 43.073_216 * zeta3;
    floorf(factor).clamp(0.0, 64.0) as u8
}

/// Echo entries needed to hold half a period of steps at the slowest
/// shaped frequency.
pub fn required_queue_depth(max_step_rate: f32, min_frequency: f32) -> usize {
    if min_frequency <= 0.0 {
        return 0;
    }
    floorf(max_step_rate / min_frequency / 2.0) as usize + 3
}

/// Shaping state of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisShaper {
    frequency: f32,
    zeta: f32,
    /// Shaping active on the axis.
    pub enabled: bool,
    /// Direction of the block being executed.
    pub forward: bool,
    /// Secondary accumulator, modulo 128.
    pub delta_error: i16,
    /// Weight of the primary impulse.
    pub factor1: u8,
    /// Weight of the echo.
    pub factor2: u8,
    /// Axis position at the end of the last loaded block.
    pub last_block_end_pos: i64,
}

impl AxisShaper {
    /// Shaper at `frequency` Hz (zero disables) with damping `zeta`.
    pub fn new(frequency: f32, zeta: f32) -> Self {
        let factor2 = damping_factor(zeta);
        Self {
            frequency,
            zeta,
            enabled: frequency > 0.0,
            forward: true,
            delta_error: 0,
            factor1: 128 - factor2,
            factor2,
            last_block_end_pos: 0,
        }
    }

    /// Shaped frequency in Hz, zero when disabled.
    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Damping ratio.
    #[inline]
    pub fn damping_ratio(&self) -> f32 {
        self.zeta
    }

    /// Change the frequency; restarts the accumulator.
    pub fn set_frequency(&mut self, frequency: f32, position: i64) {
        self.frequency = frequency;
        self.enabled = frequency > 0.0;
        self.delta_error = 0;
        self.last_block_end_pos = position;
    }

    /// Change the damping ratio.
    pub fn set_damping_ratio(&mut self, zeta: f32) {
        self.zeta = zeta;
        self.factor2 = damping_factor(zeta);
        self.factor1 = 128 - self.factor2;
    }

    /// Add an impulse of weight `dividend` (signed by direction).
    ///
    /// Returns `Some(forward)` when a physical step is due.
    pub fn prep_step(&mut self, dividend: i16) -> Option<bool> {
        let mut de = self.delta_error + dividend;
        let step = if de >= 64 {
            de -= 128;
            Some(true)
        } else if de <= -64 {
            de += 128;
            Some(false)
        } else {
            None
        };
        self.delta_error = de;
        step
    }

    /// Primary impulse weight for a step in the block direction.
    #[inline]
    pub fn primary_dividend(&self, forward: bool) -> i16 {
        if forward {
            self.factor1 as i16
        } else {
            -(self.factor1 as i16)
        }
    }

    /// Echo impulse weight.
    #[inline]
    pub fn echo_dividend(&self, forward: bool) -> i16 {
        if forward {
            self.factor2 as i16
        } else {
            -(self.factor2 as i16)
        }
    }

    /// Forget pending state after an abort.
    pub fn reset(&mut self, position: i64) {
        self.delta_error = 0;
        self.last_block_end_pos = position;
    }
}

impl Default for AxisShaper {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}
