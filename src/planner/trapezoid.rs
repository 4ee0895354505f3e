//! Trapezoid generation.
//!
//! Given entry and exit speeds, split a block's step events into
//! accelerate, cruise and decelerate phases. When the phases would overlap
//! the profile degrades to a triangle that still lands on the exit speed.

use libm::{ceilf, roundf, sqrtf};

use super::block::Block;
use crate::stepper::timing::{MINIMAL_STEP_RATE, STEPPER_TIMER_RATE};

/// Highest speed² from which `distance` at `accel` reaches `target_velocity_sqr`.
///
/// Pass a negative `accel` to get the speed reachable when decelerating.
#[inline]
pub fn max_allowable_speed_sqr(accel: f32, target_velocity_sqr: f32, distance: f32) -> f32 {
    target_velocity_sqr - 2.0 * accel * distance
}

/// Rate reached after accelerating `distance` steps from `initial_rate`.
#[inline]
pub fn final_speed(initial_rate: u32, accel: u32, distance: u32) -> u32 {
    let init = initial_rate as f32;
    sqrtf(init * init + 2.0 * accel as f32 * distance as f32) as u32
}

/// Compute trapezoid parameters for `block`.
///
/// A zero `entry_speed` keeps the block's existing `initial_rate`, which the
/// forward pass uses when the previous block is already executing.
pub fn calculate_trapezoid(block: &mut Block, entry_speed: f32, exit_speed: f32) {
    let spmm = block.steps_per_mm;
    let mut initial_rate = if entry_speed != 0.0 {
        roundf(entry_speed * spmm) as u32
    } else {
        block.initial_rate
    };
    let mut final_rate = roundf(exit_speed * spmm) as u32;

    initial_rate = initial_rate.max(MINIMAL_STEP_RATE);
    final_rate = final_rate.max(MINIMAL_STEP_RATE);
    block.nominal_rate = block.nominal_rate.max(MINIMAL_STEP_RATE);

    let mut cruise_rate = block.nominal_rate;

    let total = block.step_event_count as i64;
    let mut plateau_steps = total;
    let mut accelerate_steps: i64 = 0;
    let mut decelerate_steps: i64 = 0;

    let accel = block.acceleration_steps_per_s2;
    let mut inverse_accel = 0.0f32;
    if accel != 0 {
        inverse_accel = 1.0 / accel as f32;
        let half_inverse_accel = 0.5 * inverse_accel;
        let nominal_sq = sq(block.nominal_rate as f32);
        let decelerate_steps_float = half_inverse_accel * (nominal_sq - sq(final_rate as f32));
        let accelerate_steps_float = half_inverse_accel * (nominal_sq - sq(initial_rate as f32));
        accelerate_steps = (ceilf(accelerate_steps_float) as i64).max(0);
        decelerate_steps = (ceilf(decelerate_steps_float) as i64).max(0);

        plateau_steps -= accelerate_steps + decelerate_steps;

        if plateau_steps < 0 {
            // Triangle: meet where the accel and decel ramps cross
            accelerate_steps = (roundf(
                (total as f32 + accelerate_steps_float - decelerate_steps_float) * 0.5,
            ) as i64)
                .clamp(0, total);
            decelerate_steps = total - accelerate_steps;
            cruise_rate = cruise_rate.min(final_speed(initial_rate, accel, accelerate_steps as u32));
        }
    }

    let rate_factor = inverse_accel * STEPPER_TIMER_RATE as f32;
    block.acceleration_time = (rate_factor * cruise_rate.saturating_sub(initial_rate) as f32) as u32;
    block.deceleration_time = (rate_factor * cruise_rate.saturating_sub(final_rate) as f32) as u32;
    block.cruise_time = if plateau_steps > 0 {
        (plateau_steps as f32 * STEPPER_TIMER_RATE as f32 / cruise_rate as f32) as u32
    } else {
        0
    };

    block.accelerate_before = accelerate_steps as u32;
    block.decelerate_start = (total - decelerate_steps) as u32;
    block.initial_rate = initial_rate;
    block.final_rate = final_rate;
    block.cruise_rate = cruise_rate;

    if let Some(lead) = block.advance.as_mut() {
        if block.step_event_count != 0 {
            let comp = lead.k * block.steps[crate::axis::Axis::E] as f32 / block.step_event_count as f32;
            lead.max_adv_steps = (cruise_rate as f32 * comp) as u32;
            lead.final_adv_steps = (final_rate as f32 * comp) as u32;
        }
    }
}

#[inline]
fn sq(v: f32) -> f32 {
    v * v
}
