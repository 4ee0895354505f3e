//! Linear advance (pressure advance).
//!
//! The planner decides per block whether the extruder gets a lead and
//! stores the parameters in an [`AdvanceLead`]. The engine then runs one of
//! two strategies:
//!
//! - [`RoughAdvance`]: a secondary Bresenham accumulator that emits the
//!   extra E steps at the main step rate.
//! - [`SmoothAdvance`]: a fixed 5 kHz evaluation of the extruder rate that
//!   looks ahead through the queue and smooths the result with a cascade
//!   of exponential filters.

mod rough;
mod smooth;

pub use rough::RoughAdvance;
pub use smooth::{SmoothAdvance, SMOOTH_ADVANCE_HZ, SMOOTH_ADVANCE_INTERVAL, SMOOTH_ADVANCE_ORDER};

use libm::sqrtf;

use crate::axis::MAX_EXTRUDERS;
use crate::config::{AdvanceConfig, AdvanceMode};
use crate::error::PlannerError;

/// Above this extruder to head distance ratio a move is treated as a
/// retract folded into a print move and gets no lead.
pub const MAX_E_D_RATIO: f32 = 3.0;

/// Per-block linear advance parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvanceLead {
    /// Advance factor K in seconds.
    pub k: f32,
    /// Extra E step rate while pressure builds (rough strategy).
    pub rate: u32,
    /// Right shift applied to the rate so one advance tick moves at most a
    /// few E steps.
    pub scaling: u8,
    /// Advance steps at cruise rate.
    pub max_adv_steps: u32,
    /// Advance steps at exit rate.
    pub final_adv_steps: u32,
}

/// Planner-side linear advance settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvanceSettings {
    mode: AdvanceMode,
    k: [f32; MAX_EXTRUDERS],
    extruders: u8,
}

impl AdvanceSettings {
    /// Build from configuration.
    pub fn from_config(config: &AdvanceConfig, extruders: usize) -> Self {
        let mut k = [0.0; MAX_EXTRUDERS];
        for (i, slot) in k.iter_mut().enumerate() {
            *slot = config.k_for(i);
        }
        Self {
            mode: config.mode,
            k,
            extruders: extruders.clamp(1, MAX_EXTRUDERS) as u8,
        }
    }

    /// Active strategy.
    #[inline]
    pub fn mode(&self) -> AdvanceMode {
        self.mode
    }

    /// Number of extruders sharing the E channel.
    #[inline]
    pub fn extruders(&self) -> u8 {
        self.extruders
    }

    /// Advance factor of an extruder.
    pub fn k(&self, extruder: u8) -> f32 {
        self.k.get(extruder as usize).copied().unwrap_or(0.0)
    }

    /// Set the advance factor of an extruder.
    ///
    /// # Errors
    ///
    /// `PlannerError::InvalidExtruder` beyond the configured extruders,
    /// `PlannerError::InvalidValue` for a negative or non-finite K.
    pub fn set_k(&mut self, extruder: u8, k: f32) -> Result<(), PlannerError> {
        if extruder >= self.extruders {
            return Err(PlannerError::InvalidExtruder(extruder));
        }
        if !k.is_finite() || k < 0.0 {
            return Err(PlannerError::InvalidValue(k));
        }
        self.k[extruder as usize] = k;
        Ok(())
    }

    /// Decide whether a move gets a lead.
    ///
    /// Only print moves (head and E both moving) with E running forward and
    /// a nonzero K qualify. Returns the extruder to head distance ratio of
    /// a qualifying move.
    pub fn lead_ratio(&self, extruder: u8, e_forward: bool, e_mm: f32, head_mm: f32) -> Option<f32> {
        if self.mode == AdvanceMode::Disabled || !e_forward || head_mm <= 0.0 {
            return None;
        }
        if self.k(extruder) == 0.0 {
            return None;
        }
        let ratio = e_mm / head_mm;
        if ratio > MAX_E_D_RATIO {
            debug!("advance skipped, e/D ratio {}", ratio);
            return None;
        }
        Some(ratio)
    }

    /// Acceleration cap in steps/s² so the extruder can jump to the
    /// advance speed within its jerk allowance (rough strategy only).
    pub fn rough_accel_cap(&self, extruder: u8, e_d_ratio: f32, max_e_jerk: f32, steps_per_mm: f32) -> Option<u32> {
        if self.mode != AdvanceMode::Rough {
            return None;
        }
        let k = self.k(extruder);
        if k * e_d_ratio <= 0.0 {
            return None;
        }
        Some((max_e_jerk / (k * e_d_ratio) * steps_per_mm) as u32)
    }

    /// Build the lead for a block once its acceleration is known.
    pub fn lead(&self, extruder: u8, accel_steps_per_s2: u32, steps_e: u32, step_event_count: u32) -> AdvanceLead {
        let k = self.k(extruder);
        let (rate, scaling) = match self.mode {
            AdvanceMode::Rough => (
                (k * accel_steps_per_s2 as f32) as u32,
                rough_scaling(steps_e, step_event_count),
            ),
            _ => (0, 0),
        };
        AdvanceLead {
            k,
            rate,
            scaling,
            max_adv_steps: 0,
            final_adv_steps: 0,
        }
    }
}

/// Shift that keeps the advance tick at four or fewer E steps.
pub fn rough_scaling(steps_e: u32, step_event_count: u32) -> u8 {
    let mut scaling = 0u8;
    let mut dividend = (steps_e as u64) << 1;
    while dividend != 0 && dividend <= (step_event_count >> 2) as u64 {
        dividend <<= 1;
        scaling += 1;
    }
    scaling
}

/// E jerk implied by a junction deviation and the E acceleration limit.
pub fn max_e_jerk(junction_deviation: f32, max_acceleration_e: f32) -> f32 {
    let half_sqrt2 = core::f32::consts::FRAC_1_SQRT_2;
    let prop = junction_deviation * half_sqrt2 / (1.0 - half_sqrt2);
    sqrtf(prop * max_acceleration_e)
}

/// Signed E steps per step event.
#[inline]
pub fn e_step_ratio(steps_e: u32, step_event_count: u32, e_forward: bool) -> f32 {
    if step_event_count == 0 {
        return 0.0;
    }
    let ratio = steps_e as f32 / step_event_count as f32;
    if e_forward {
        ratio
    } else {
        -ratio
    }
}
