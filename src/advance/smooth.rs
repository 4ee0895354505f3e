//! Smooth strategy: extruder rate from a look-ahead target, filtered.

use libm::{expf, roundf};

use crate::axis::MAX_EXTRUDERS;
use crate::error::StepperError;
use crate::planner::Block;
use crate::stepper::timing::{calc_timer_interval, step_multiply, NEVER, STEPPER_TIMER_RATE};

/// Evaluation frequency.
pub const SMOOTH_ADVANCE_HZ: u32 = 5000;

/// Evaluation period in timer ticks.
pub const SMOOTH_ADVANCE_INTERVAL: u32 = STEPPER_TIMER_RATE / SMOOTH_ADVANCE_HZ;

/// Number of cascaded exponential stages.
pub const SMOOTH_ADVANCE_ORDER: usize = 5;

/// Engine-side state of the smooth strategy.
///
/// Every [`SMOOTH_ADVANCE_INTERVAL`] ticks the target advance is taken as
/// the block's `K` times the extruder rate the planned profile will have
/// `tau` seconds from now. Its rate of change goes through a fifth order
/// exponential filter (a cheap gaussian) and is added to the planned
/// extruder rate.
#[derive(Debug, Clone, Copy)]
pub struct SmoothAdvance {
    tau: [f32; MAX_EXTRUDERS],
    tau_ticks: [u32; MAX_EXTRUDERS],
    alpha: [f32; MAX_EXTRUDERS],
    /// Extruder whose filter constant applies while idle.
    last_extruder: usize,
    smoothed: [f32; SMOOTH_ADVANCE_ORDER],
    last_target: f32,
    curr_tick: u32,
    next_tick: u32,
    step_interval: u32,
    next_step: u32,
}

impl SmoothAdvance {
    /// Filter with the same time constant on every extruder.
    ///
    /// # Errors
    ///
    /// `StepperError::InvalidAdvanceTau` for a non-positive time constant.
    pub fn new(tau: f32) -> Result<Self, StepperError> {
        let mut s = Self {
            tau: [0.0; MAX_EXTRUDERS],
            tau_ticks: [0; MAX_EXTRUDERS],
            alpha: [0.0; MAX_EXTRUDERS],
            last_extruder: 0,
            smoothed: [0.0; SMOOTH_ADVANCE_ORDER],
            last_target: 0.0,
            curr_tick: 0,
            next_tick: 0,
            step_interval: NEVER,
            next_step: NEVER,
        };
        for extruder in 0..MAX_EXTRUDERS {
            s.set_tau(extruder as u8, tau)?;
        }
        Ok(s)
    }

    /// Time constant of an extruder in seconds.
    pub fn tau(&self, extruder: u8) -> f32 {
        self.tau.get(extruder as usize).copied().unwrap_or(0.0)
    }

    /// Set the time constant of an extruder.
    ///
    /// # Errors
    ///
    /// `StepperError::InvalidAdvanceTau` for a non-positive or non-finite
    /// value or an extruder out of range.
    pub fn set_tau(&mut self, extruder: u8, tau: f32) -> Result<(), StepperError> {
        let i = extruder as usize;
        if i >= MAX_EXTRUDERS || !tau.is_finite() || tau <= 0.0 {
            return Err(StepperError::InvalidAdvanceTau(tau));
        }
        let ticks = (tau * STEPPER_TIMER_RATE as f32) as u32;
        self.tau[i] = tau;
        self.tau_ticks[i] = ticks;
        self.alpha[i] =
            1.0 - expf(-(SMOOTH_ADVANCE_INTERVAL as f32) * SMOOTH_ADVANCE_ORDER as f32 / ticks.max(1) as f32);
        Ok(())
    }

    /// Ticks until the next evaluation.
    #[inline]
    pub fn next_tick(&self) -> u32 {
        self.next_tick
    }

    /// Ticks until the next E step.
    #[inline]
    pub fn next_step(&self) -> u32 {
        self.next_step
    }

    /// Count down `interval` ticks on both the evaluation and the E step
    /// clocks.
    #[inline]
    pub fn elapse(&mut self, interval: u32) {
        self.next_tick = self.next_tick.saturating_sub(interval);
        if self.next_step != NEVER {
            self.next_step = self.next_step.saturating_sub(interval);
        }
    }

    /// Program the E step interval for a signed rate in steps/s.
    ///
    /// Returns the E direction (`true` for forward) the steps need, or
    /// `None` when the rate is zero and stepping pauses.
    pub fn set_rate(&mut self, rate: i32) -> Option<bool> {
        if rate == 0 {
            self.step_interval = NEVER;
            return None;
        }
        self.step_interval = calc_timer_interval(rate.unsigned_abs());
        Some(rate > 0)
    }

    /// Whether an E step is due this pass. Pulls the next step earlier
    /// when the interval shrank.
    pub fn due(&mut self) -> bool {
        if self.next_step == 0 {
            true
        } else {
            if self.next_step > self.step_interval {
                self.next_step = self.step_interval;
            }
            false
        }
    }

    /// Reload after an E step.
    #[inline]
    pub fn rearm(&mut self) {
        self.next_step = self.step_interval;
    }

    /// Restart the block clock when a new block is loaded.
    #[inline]
    pub fn start_block(&mut self) {
        self.curr_tick = 0;
    }

    /// Evaluate the extruder rate in signed E steps/s.
    ///
    /// `blocks` yields the executing block first, then the queued ones;
    /// `None` for `current` means the engine is idle and the filter decays
    /// with the constant of the extruder that ran last. `step_rate` is the
    /// engine's current step event rate.
    pub fn evaluate<'a, I>(&mut self, current: Option<&Block>, blocks: I, step_rate: u32) -> i32
    where
        I: Iterator<Item = &'a Block>,
    {
        if let Some(b) = current {
            self.last_extruder = (b.extruder as usize).min(MAX_EXTRUDERS - 1);
        }
        let extruder = self.last_extruder;
        let target = match current {
            Some(_) => lookahead_advance(blocks, self.tau_ticks[extruder].saturating_add(self.curr_tick)),
            None => 0.0,
        };

        let mut rate = (target - self.last_target) * SMOOTH_ADVANCE_HZ as f32;
        self.last_target = target;

        let alpha = self.alpha[extruder];
        for stage in self.smoothed.iter_mut() {
            *stage += alpha * (rate - *stage);
            rate = *stage;
        }

        let planned = match current {
            Some(b) => step_rate as f32 * b.e_step_ratio,
            None => 0.0,
        };

        self.curr_tick = self.curr_tick.wrapping_add(SMOOTH_ADVANCE_INTERVAL);
        self.next_tick = SMOOTH_ADVANCE_INTERVAL;
        roundf(rate + planned) as i32
    }
}

/// Target advance `ticks` after the start of the first block yielded by
/// `blocks`: the planned extruder rate (steps/s, signed) times that block's
/// `K`.
///
/// Sync blocks take no time. Blocks without a lead contribute zero.
pub fn lookahead_advance<'a, I>(blocks: I, mut ticks: u32) -> f32
where
    I: Iterator<Item = &'a Block>,
{
    for block in blocks {
        if !block.is_move() {
            continue;
        }
        let k = block.advance.as_ref().map_or(0.0, |lead| lead.k);
        let lead = k != 0.0;

        if ticks <= block.acceleration_time {
            if !lead {
                return 0.0;
            }
            let rate = (step_multiply(ticks, block.acceleration_rate) + block.initial_rate).min(block.nominal_rate);
            return rate as f32 * block.e_step_ratio * k;
        }
        ticks -= block.acceleration_time;

        if ticks <= block.cruise_time {
            if !lead {
                return 0.0;
            }
            return block.cruise_rate as f32 * block.e_step_ratio * k;
        }
        ticks -= block.cruise_time;

        if ticks <= block.deceleration_time {
            if !lead {
                return 0.0;
            }
            let slowdown = step_multiply(ticks, block.acceleration_rate);
            let rate = if slowdown < block.cruise_rate {
                (block.cruise_rate - slowdown).max(block.final_rate)
            } else {
                block.final_rate
            };
            return rate as f32 * block.e_step_ratio * k;
        }
        ticks -= block.deceleration_time;
    }
    0.0
}
