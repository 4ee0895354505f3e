//! Rough strategy: a second Bresenham accumulator for the extruder.

use super::AdvanceLead;
use crate::stepper::timing::{calc_timer_interval, NEVER};

/// Engine-side state of the rough strategy.
///
/// While a block with a lead runs, E steps from the main Bresenham are not
/// emitted. They are subtracted from `advance_steps`, and the advance tick
/// emits E steps on its own accumulator at the main rate plus (while
/// accelerating) the lead rate. The difference is the pressure advance.
#[derive(Debug, Clone, Copy)]
pub struct RoughAdvance {
    active: bool,
    delta_error: i64,
    dividend: i64,
    divisor: i64,
    advance_steps: i32,
    interval: u32,
    next_tick: u32,
}

impl RoughAdvance {
    /// Idle state.
    pub const fn new() -> Self {
        Self {
            active: false,
            delta_error: 0,
            dividend: 0,
            divisor: 0,
            advance_steps: 0,
            interval: NEVER,
            next_tick: NEVER,
        }
    }

    /// Whether the current block runs with a lead.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Net E steps emitted ahead of the main Bresenham.
    #[inline]
    pub fn advance_steps(&self) -> i32 {
        self.advance_steps
    }

    /// Ticks until the next advance tick.
    #[inline]
    pub fn next_tick(&self) -> u32 {
        self.next_tick
    }

    /// Prepare for a new block.
    ///
    /// `dividend_e` is the block's doubled E step count, `divisor` the
    /// doubled (oversampled) event count and `delta_error` the main
    /// accumulator's starting value.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        &mut self,
        lead: Option<&AdvanceLead>,
        dividend_e: i64,
        divisor: i64,
        delta_error: i64,
        oversampling: u8,
        extruder_changed: bool,
        initial_rate: u32,
    ) {
        self.delta_error = delta_error;
        self.divisor = divisor;
        if extruder_changed {
            // Pressure of the previous nozzle is gone
            self.advance_steps = 0;
        }
        self.active = lead.map_or(false, |l| l.rate != 0);
        match lead {
            Some(l) if self.active => {
                self.dividend = (dividend_e << l.scaling) << oversampling;
                let lead_rate = self.lead_rate_accelerating(l);
                self.interval = calc_timer_interval((initial_rate + lead_rate) >> l.scaling);
            }
            _ => self.interval = NEVER,
        }
    }

    fn lead_rate_accelerating(&self, lead: &AdvanceLead) -> u32 {
        if self.advance_steps < lead.max_adv_steps as i32 {
            lead.rate
        } else {
            0
        }
    }

    /// Update the tick interval during acceleration.
    pub fn accelerate(&mut self, lead: &AdvanceLead, step_rate: u32) {
        if self.active {
            let lead_rate = self.lead_rate_accelerating(lead);
            self.interval = calc_timer_interval((step_rate + lead_rate) >> lead.scaling);
        }
    }

    /// Update the tick interval at cruise.
    pub fn cruise(&mut self, lead: &AdvanceLead, nominal_rate: u32) {
        if self.active {
            self.interval = calc_timer_interval(nominal_rate >> lead.scaling);
        }
    }

    /// Update the tick interval during deceleration.
    ///
    /// Returns the E direction (`true` for forward) the advance ticks need,
    /// or `None` when the rates balance and the ticks pause.
    pub fn decelerate(&mut self, lead: &AdvanceLead, step_rate: u32) -> Option<bool> {
        if !self.active {
            return None;
        }
        let lead_rate = if self.advance_steps > lead.final_adv_steps as i32 {
            lead.rate
        } else {
            0
        };
        if lead_rate == step_rate {
            self.interval = NEVER;
            return None;
        }
        let forward = lead_rate < step_rate;
        let diff = if forward {
            step_rate - lead_rate
        } else {
            lead_rate - step_rate
        };
        self.interval = calc_timer_interval(diff >> lead.scaling);
        Some(forward)
    }

    /// Absorb an E step requested by the main Bresenham.
    ///
    /// Returns `true` when the step was taken over by the advance ticks and
    /// must not be pulsed.
    #[inline]
    pub fn absorb_main_step(&mut self) -> bool {
        if self.active {
            self.advance_steps -= 1;
            true
        } else {
            false
        }
    }

    /// Run the advance accumulator. Returns whether an E step is due.
    pub fn tick(&mut self) -> bool {
        self.delta_error += self.dividend;
        if self.delta_error >= 0 {
            self.delta_error -= self.divisor;
            true
        } else {
            false
        }
    }

    /// Count an emitted E step in direction `sign`.
    #[inline]
    pub fn record_step(&mut self, sign: i32) {
        self.advance_steps += sign;
    }

    /// Schedule after the engine loop ran: fire now, or pull the next tick
    /// earlier when the interval shrank.
    ///
    /// Returns `true` when the advance tick must run this pass.
    pub fn due(&mut self) -> bool {
        if self.next_tick == 0 {
            true
        } else {
            if self.next_tick > self.interval {
                self.next_tick = self.interval;
            }
            false
        }
    }

    /// Reload after an advance tick ran.
    #[inline]
    pub fn rearm(&mut self) {
        self.next_tick = self.interval;
    }

    /// Count down `interval` ticks.
    #[inline]
    pub fn elapse(&mut self, interval: u32) {
        if self.next_tick != NEVER {
            self.next_tick = self.next_tick.saturating_sub(interval);
        }
    }

    /// Stop ticking until the next block.
    pub fn stop(&mut self) {
        self.interval = NEVER;
        self.next_tick = NEVER;
    }
}

impl Default for RoughAdvance {
    fn default() -> Self {
        Self::new()
    }
}
