//! Step-domain description of one planned motion leg.

use libm::sqrtf;

use crate::advance::AdvanceLead;
use crate::axis::{Axis, AxisBits, Direction, PerAxis};

/// Block state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockFlags {
    /// Trapezoid must be recomputed before the engine may take the block.
    pub recalculate: bool,
    /// Claimed by the stepper engine; immutable from here on.
    pub busy: bool,
    /// Carries no motion, only a position update for the engine.
    pub sync_position: bool,
}

/// One motion leg in motor steps.
///
/// `step_event_count` is the largest per-axis step count. The trapezoid
/// fields (`initial_rate` .. `cruise_time`) are only meaningful once
/// `flags.recalculate` is false and never change once `flags.busy` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Block {
    /// State flags.
    pub flags: BlockFlags,

    /// Unsigned step count per motor.
    pub steps: PerAxis<u32>,
    /// Dominant step count.
    pub step_event_count: u32,
    /// Set bit means the motor turns toward positive counts.
    pub direction_bits: AxisBits,
    /// Active extruder.
    pub extruder: u8,

    /// Head-frame length, or E length for E-only moves.
    pub millimeters: f32,
    /// Step events per millimeter of `millimeters`.
    pub steps_per_mm: f32,
    /// Acceleration in mm/s².
    pub acceleration: f32,
    /// Acceleration in steps/s².
    pub acceleration_steps_per_s2: u32,
    /// Acceleration scaled by 2^24 / timer rate, per timer tick.
    pub acceleration_rate: u32,

    /// Cruise speed in mm/s.
    pub nominal_speed: f32,
    /// Entry speed² in (mm/s)².
    pub entry_speed_sqr: f32,
    /// Junction limit on entry speed².
    pub max_entry_speed_sqr: f32,
    /// Floor on entry speed².
    pub min_entry_speed_sqr: f32,

    /// Cruise step rate.
    pub nominal_rate: u32,
    /// Entry step rate.
    pub initial_rate: u32,
    /// Exit step rate.
    pub final_rate: u32,
    /// Highest rate actually reached (below nominal on triangles).
    pub cruise_rate: u32,
    /// Step index where acceleration ends.
    pub accelerate_before: u32,
    /// Step index where deceleration starts.
    pub decelerate_start: u32,
    /// Accelerating phase duration in timer ticks.
    pub acceleration_time: u32,
    /// Cruise phase duration in timer ticks.
    pub cruise_time: u32,
    /// Decelerating phase duration in timer ticks.
    pub deceleration_time: u32,

    /// Planned duration in microseconds.
    pub segment_time_us: u32,

    /// Signed extruder steps per step event.
    pub e_step_ratio: f32,
    /// Linear advance parameters when the block uses pressure advance.
    pub advance: Option<AdvanceLead>,

    /// Motor position applied by sync blocks.
    pub position: PerAxis<i64>,
}

impl Block {
    /// An empty slot.
    pub const EMPTY: Block = Block {
        flags: BlockFlags {
            recalculate: false,
            busy: false,
            sync_position: false,
        },
        steps: PerAxis([0; 4]),
        step_event_count: 0,
        direction_bits: AxisBits::NONE,
        extruder: 0,
        millimeters: 0.0,
        steps_per_mm: 0.0,
        acceleration: 0.0,
        acceleration_steps_per_s2: 0,
        acceleration_rate: 0,
        nominal_speed: 0.0,
        entry_speed_sqr: 0.0,
        max_entry_speed_sqr: 0.0,
        min_entry_speed_sqr: 0.0,
        nominal_rate: 0,
        initial_rate: 0,
        final_rate: 0,
        cruise_rate: 0,
        accelerate_before: 0,
        decelerate_start: 0,
        acceleration_time: 0,
        cruise_time: 0,
        deceleration_time: 0,
        segment_time_us: 0,
        e_step_ratio: 0.0,
        advance: None,
        position: PerAxis([0; 4]),
    };

    /// A block that only moves the engine's position.
    pub fn sync(position: PerAxis<i64>) -> Self {
        Block {
            flags: BlockFlags {
                sync_position: true,
                ..BlockFlags::default()
            },
            position,
            ..Block::EMPTY
        }
    }

    /// Whether the block carries motion.
    #[inline]
    pub fn is_move(&self) -> bool {
        !self.flags.sync_position
    }

    /// Direction of a motor.
    #[inline]
    pub fn direction(&self, axis: Axis) -> Direction {
        self.direction_bits.direction(axis)
    }

    /// Whether any X, Y or Z motor moves.
    #[inline]
    pub fn moves_head(&self) -> bool {
        Axis::HEAD.iter().any(|&a| self.steps[a] != 0)
    }

    /// Whether the extruder uses pressure advance on this block.
    #[inline]
    pub fn uses_advance(&self) -> bool {
        self.advance.is_some()
    }

    /// Step rate of the planned profile at step index `step`.
    ///
    /// Evaluates `v² = v₀² + 2·a·d` from whichever end is active. Used for
    /// reporting and verification; the engine integrates in time instead.
    pub fn rate_at_step(&self, step: u32) -> f32 {
        let a = self.acceleration_steps_per_s2 as f32;
        let init = self.initial_rate as f32;
        let fin = self.final_rate as f32;
        let cruise = self.cruise_rate as f32;
        if step < self.accelerate_before {
            sqrtf(init * init + 2.0 * a * step as f32).min(cruise)
        } else if step >= self.decelerate_start {
            let remaining = self.step_event_count.saturating_sub(step) as f32;
            sqrtf(fin * fin + 2.0 * a * remaining).min(cruise)
        } else {
            cruise
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Block::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_block() {
        let block = Block::sync(PerAxis([1, 2, 3, 4]));
        assert!(!block.is_move());
        assert_eq!(block.position[Axis::Z], 3);
        assert_eq!(block.step_event_count, 0);
    }

    #[test]
    fn test_moves_head() {
        let mut block = Block::EMPTY;
        block.steps[Axis::E] = 10;
        assert!(!block.moves_head());
        block.steps[Axis::Y] = 1;
        assert!(block.moves_head());
    }

    #[test]
    fn test_rate_at_step_phases() {
        let block = Block {
            step_event_count: 100,
            acceleration_steps_per_s2: 1000,
            initial_rate: 10,
            final_rate: 10,
            cruise_rate: 200,
            nominal_rate: 200,
            accelerate_before: 20,
            decelerate_start: 80,
            ..Block::EMPTY
        };
        assert!((block.rate_at_step(0) - 10.0).abs() < 1e-3);
        assert_eq!(block.rate_at_step(50), 200.0);
        let near_end = block.rate_at_step(99);
        assert!((near_end - sqrtf(100.0 + 2000.0)).abs() < 1e-3);
    }
}
