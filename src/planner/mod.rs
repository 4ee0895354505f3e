//! Look-ahead motion planner.
//!
//! Turns requested moves into [`Block`]s on a [`MotionQueue`] and keeps the
//! entry speed of every block the engine has not claimed at the highest
//! value its neighbors and the machine limits allow.
//!
//! # Recompute
//!
//! After each enqueue the queue is re-planned in two passes:
//!
//! 1. A reverse pass from the newest block back toward the engine raises
//!    entry speeds to what can still be shed before the next block.
//! 2. A forward pass from the oldest block caps them to what can be
//!    reached from the previous block, and rebuilds the trapezoids.
//!
//! Blocks claimed by the engine (`flags.busy`) are never re-planned. Each
//! block is visited in its own critical section on the [`MotionQueue`], so
//! the step interrupt keeps running during a pass and the busy flag is
//! re-tested right before each mutation.

mod block;
mod junction;
mod queue;
mod trapezoid;

pub use block::{Block, BlockFlags};
pub use junction::{
    fast_acos_neg, limit_value_by_axis_maximum, normalize, CornerLimits, CornerMove, Cornering,
    JunctionState,
};
pub use queue::{BlockRing, MotionQueue, BLOCK_BUFFER_SIZE, BLOCK_DELAY_FOR_1ST_MOVE};
pub use trapezoid::{calculate_trapezoid, final_speed, max_allowable_speed_sqr};

use libm::{ceilf, roundf, sqrtf};

use crate::advance::{self, AdvanceSettings};
use crate::axis::{Axis, AxisBits, PerAxis};
use crate::config::{AdvanceMode, MachineConfig, MechanicalConstraints};
use crate::error::{PlannerError, Result, Setting};
use crate::kinematics::Kinematics;
use crate::stepper::timing::STEPPER_TIMER_RATE;
use crate::stepper::{Stepper, StepperTimer};

/// Moves with fewer step events are folded into the next one.
pub const MIN_STEPS_PER_SEGMENT: u32 = 6;

/// Housekeeping ticks during which enqueues are refused after a quick stop.
pub const CLEANING_TICKS: u16 = 1000;

/// steps/s² to the engine's 2^24-scaled per-tick rate.
const ACCELERATION_RATE_SCALE: f32 = (1u32 << 24) as f32 / STEPPER_TIMER_RATE as f32;

/// Optional facts a caller knows about a move.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveHints {
    /// Precomputed length, overriding the head-frame length.
    pub millimeters: Option<f32>,
    /// 1 / duration in seconds, overriding feedrate / length. Ignored
    /// unless finite and positive.
    pub inverse_duration: Option<f32>,
    /// Path radius at the start of the move (arcs).
    pub curve_radius: Option<f32>,
    /// Exit speed² the newest block may keep, floored at the configured
    /// safe exit speed.
    pub safe_exit_speed_sqr: f32,
}

/// The look-ahead planner.
///
/// Producer side of a [`MotionQueue`] it shares with the step interrupt,
/// plus the planner-side position. The engine claims blocks straight from
/// the queue; operations that have to reach into the engine take it as an
/// argument.
#[derive(Debug, Clone)]
pub struct Planner<'q, const N: usize = BLOCK_BUFFER_SIZE> {
    queue: &'q MotionQueue<N>,
    kinematics: Kinematics,
    mech: MechanicalConstraints,

    acceleration: f32,
    travel_acceleration: f32,
    retract_acceleration: f32,
    min_feedrate: f32,
    min_travel_feedrate: f32,
    min_segment_time_us: u32,
    safe_exit_speed_sqr: f32,

    cornering: Cornering,
    handle_small_segments: bool,
    junction: JunctionState,

    advance: AdvanceSettings,
    max_e_jerk: f32,

    /// Motor position at the end of the queue, in steps.
    position: PerAxis<i64>,
    /// Logical position at the end of the queue, in mm.
    position_mm: PerAxis<f32>,

    cleaning_counter: u16,
}

/// Outcome of one reverse pass step.
enum Visit {
    Changed,
    Skipped,
    Stop,
}

impl<'q, const N: usize> Planner<'q, N> {
    /// Build a planner at the origin, producing into `queue`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingAxis` when an axis section is missing.
    pub fn from_config(config: &MachineConfig, queue: &'q MotionQueue<N>) -> Result<Self> {
        let mech = MechanicalConstraints::from_config(config)?;
        let planner = &config.planner;
        let safe_exit = planner.safe_exit_speed.0;

        let mut p = Self {
            queue,
            kinematics: config.kinematics,
            mech,
            acceleration: planner.acceleration.0,
            travel_acceleration: planner.travel_acceleration(),
            retract_acceleration: planner.retract_acceleration(),
            min_feedrate: planner.min_feedrate.0,
            min_travel_feedrate: planner.min_travel_feedrate.0,
            min_segment_time_us: planner.min_segment_time_us,
            safe_exit_speed_sqr: safe_exit * safe_exit,
            cornering: planner.cornering.into(),
            handle_small_segments: planner.handle_small_segments,
            junction: JunctionState::default(),
            advance: AdvanceSettings::from_config(&config.advance, config.extruders()),
            max_e_jerk: 0.0,
            position: PerAxis::splat(0),
            position_mm: PerAxis::splat(0.0),
            cleaning_counter: 0,
        };
        p.refresh_max_e_jerk();
        Ok(p)
    }

    // ========================================================================
    // Enqueue
    // ========================================================================

    /// Queue a move to `target` (logical mm) at `feedrate` mm/s.
    ///
    /// Returns `false` when the queue is full, a quick stop is still
    /// cleaning up, the extruder is unknown or the feedrate is not
    /// positive. Returns `true` when the move was queued or, being shorter
    /// than [`MIN_STEPS_PER_SEGMENT`], absorbed without a block.
    pub fn enqueue(&mut self, target: PerAxis<f32>, feedrate: f32, extruder: u8, hints: &MoveHints) -> bool {
        if self.cleaning_counter > 0 {
            debug!("enqueue refused, cleaning for {} ticks", self.cleaning_counter);
            return false;
        }
        if extruder >= self.advance.extruders() {
            warn!("enqueue refused, no extruder {}", extruder);
            return false;
        }
        let inverse_duration = hints.inverse_duration.filter(|inv| inv.is_finite() && *inv > 0.0);
        if inverse_duration.is_none() && !(feedrate.is_finite() && feedrate > 0.0) {
            warn!("enqueue refused, feedrate {}", feedrate);
            return false;
        }
        // Only this side fills the queue, so a free slot stays free
        if self.queue.is_full() {
            trace!("enqueue refused, queue full");
            return false;
        }

        let block = match self.populate_block(target, feedrate, extruder, inverse_duration, hints) {
            Some(block) => block,
            None => return true,
        };

        let min_entry = block.min_entry_speed_sqr;
        self.queue.lock(|ring| ring.push(block));

        let safe_exit = hints.safe_exit_speed_sqr.max(self.safe_exit_speed_sqr).max(min_entry);
        self.recompute(safe_exit);
        true
    }

    /// Build the block for a move, or `None` when the move is absorbed.
    ///
    /// Updates the planner position and junction state only for moves that
    /// produce a block.
    fn populate_block(
        &mut self,
        target: PerAxis<f32>,
        feedrate: f32,
        extruder: u8,
        inverse_duration: Option<f32>,
        hints: &MoveHints,
    ) -> Option<Block> {
        let delta = self.kinematics.plan_move(
            &self.position_mm,
            &target,
            &self.position,
            &self.mech.steps_per_unit,
        );

        let mut block = Block {
            extruder,
            ..Block::EMPTY
        };

        let mut direction_bits = AxisBits::NONE;
        for axis in Axis::ALL {
            direction_bits.set(axis, delta.steps[axis] > 0);
            block.steps[axis] = delta.steps[axis].unsigned_abs() as u32;
        }
        block.direction_bits = direction_bits;
        block.step_event_count = block.steps.0.iter().copied().max().unwrap_or(0);

        if block.step_event_count < MIN_STEPS_PER_SEGMENT {
            trace!("move absorbed, {} step events", block.step_event_count);
            return None;
        }

        let dist_mm: PerAxis<f32> =
            PerAxis::from_fn(|a| delta.steps[a] as f32 * self.mech.mm_per_step[a]);
        let esteps = block.steps[Axis::E];

        let short_head = Axis::HEAD.iter().all(|&a| block.steps[a] < MIN_STEPS_PER_SEGMENT);
        block.millimeters = if short_head {
            dist_mm[Axis::E].abs()
        } else {
            hints.millimeters.filter(|mm| *mm > 0.0).unwrap_or(delta.length)
        };
        if !block.millimeters.is_finite() || block.millimeters <= 0.0 {
            trace!("move absorbed, zero length");
            return None;
        }
        let inverse_millimeters = 1.0 / block.millimeters;

        // Speed
        let floor = if esteps > 0 {
            self.min_feedrate
        } else {
            self.min_travel_feedrate
        };
        let mut inverse_secs = match inverse_duration {
            Some(inv) => inv,
            None => feedrate.max(floor) * inverse_millimeters,
        };

        let moves_queued = self.queue.nonbusy_len();
        let mut segment_time_us = roundf(1_000_000.0 / inverse_secs) as u32;
        if (2..N / 2).contains(&moves_queued) && segment_time_us < self.min_segment_time_us {
            // Queue is draining: stretch short segments so it refills
            let time_diff = self.min_segment_time_us - segment_time_us;
            let stretched = segment_time_us + roundf(2.0 * time_diff as f32 / moves_queued as f32) as u32;
            inverse_secs = 1_000_000.0 / stretched as f32;
            segment_time_us = stretched;
        }
        block.segment_time_us = segment_time_us;

        block.nominal_speed = block.millimeters * inverse_secs;
        block.nominal_rate = ceilf(block.step_event_count as f32 * inverse_secs) as u32;

        let mut current_speed = PerAxis::splat(0.0f32);
        let mut speed_factor = 1.0f32;
        for axis in Axis::ALL {
            current_speed[axis] = dist_mm[axis] * inverse_secs;
            let cs = current_speed[axis].abs();
            let max_fr = self.mech.max_feedrate[axis];
            if cs > max_fr {
                speed_factor = speed_factor.min(max_fr / cs);
            }
        }
        if speed_factor < 1.0 {
            current_speed = current_speed.map(|s| s * speed_factor);
            block.nominal_rate = (block.nominal_rate as f32 * speed_factor) as u32;
            block.nominal_speed *= speed_factor;
        }

        let steps_per_mm = block.step_event_count as f32 * inverse_millimeters;
        block.steps_per_mm = steps_per_mm;

        // Acceleration
        let e_forward = delta.steps[Axis::E] > 0;
        let mut lead_ratio = None;
        let mut accel = if !block.moves_head() {
            ceilf(self.retract_acceleration * steps_per_mm) as u32
        } else {
            let base = if esteps > 0 {
                self.acceleration
            } else {
                self.travel_acceleration
            };
            let mut accel = ceilf(base * steps_per_mm) as u32;

            if esteps > 0 {
                lead_ratio = self
                    .advance
                    .lead_ratio(extruder, e_forward, dist_mm[Axis::E], delta.length);
            }
            if let Some(ratio) = lead_ratio {
                if let Some(cap) = self
                    .advance
                    .rough_accel_cap(extruder, ratio, self.max_e_jerk, steps_per_mm)
                {
                    if accel > cap {
                        debug!("acceleration limited by advance to {}", cap);
                        accel = cap;
                    }
                }
            }

            for axis in Axis::ALL {
                let steps = block.steps[axis];
                let limit = self.mech.max_acceleration_steps_per_s2[axis];
                if steps != 0 && limit < accel {
                    let max_possible = (limit as u64 * block.step_event_count as u64 / steps as u64) as u32;
                    accel = accel.min(max_possible);
                }
            }
            accel
        };
        accel = accel.max(1);

        block.acceleration_steps_per_s2 = accel;
        block.acceleration = accel as f32 / steps_per_mm;
        block.acceleration_rate = (accel as f32 * ACCELERATION_RATE_SCALE) as u32;

        if lead_ratio.is_some() {
            block.advance = Some(self.advance.lead(extruder, accel, esteps, block.step_event_count));
        }
        block.e_step_ratio = advance::e_step_ratio(esteps, block.step_event_count, e_forward);

        let min_planner_speed_sqr =
            (0.5 * block.acceleration / steps_per_mm).min(block.nominal_speed * block.nominal_speed);

        // Cornering
        let unit_vec = normalize([
            delta.head[0],
            delta.head[1],
            delta.head[2],
            dist_mm[Axis::E],
        ]);

        let mut e_jerk_allowance = 0.0;
        if self.cornering == Cornering::Jerk && self.advance.mode() == AdvanceMode::Rough {
            if delta.steps[Axis::E] < 0 && self.junction.previous_advance_rate != 0 {
                e_jerk_allowance =
                    self.junction.previous_advance_rate as f32 * self.junction.previous_e_mm_per_step;
            }
            self.junction.previous_advance_rate = block.advance.map_or(0, |l| l.rate);
            self.junction.previous_e_mm_per_step = self.mech.mm_per_step[Axis::E];
        }

        let corner = CornerMove {
            unit_vec,
            current_speed,
            millimeters: block.millimeters,
            nominal_speed: block.nominal_speed,
            acceleration: block.acceleration,
            min_planner_speed_sqr,
            curve_radius: hints.curve_radius,
            e_jerk_allowance,
        };
        let limits = CornerLimits {
            max_acceleration: &self.mech.max_acceleration,
            max_jerk: &self.mech.max_jerk,
            handle_small_segments: self.handle_small_segments,
        };
        let vmax_junction_sqr =
            self.cornering
                .max_junction_speed_sqr(&self.junction, &corner, moves_queued > 0, &limits);

        block.max_entry_speed_sqr = vmax_junction_sqr;
        block.entry_speed_sqr = min_planner_speed_sqr;
        block.min_entry_speed_sqr = min_planner_speed_sqr;
        block.initial_rate = 0;
        block.flags.recalculate = true;

        self.junction.update(&corner);
        self.position = delta.target;
        self.position_mm = target;

        Some(block)
    }

    // ========================================================================
    // Recompute
    // ========================================================================

    /// Re-plan every block the engine has not claimed.
    ///
    /// `safe_exit_speed_sqr` bounds the exit of the newest block. The step
    /// interrupt may claim blocks while this runs.
    pub fn recompute(&mut self, safe_exit_speed_sqr: f32) {
        self.reverse_pass(safe_exit_speed_sqr);
        self.recalculate_trapezoids(safe_exit_speed_sqr);
    }

    fn reverse_pass(&mut self, safe_exit_speed_sqr: f32) {
        let mut index = BlockRing::<N>::prev_index(self.queue.head());
        let mut next: Option<usize> = None;

        loop {
            let visit = self.queue.lock(|ring| {
                // The first unclaimed block may be taken at any moment; leave it
                if index == ring.nonbusy() || !ring.is_unclaimed(index) {
                    Visit::Stop
                } else if !ring.get(index).is_move() {
                    Visit::Skipped
                } else if reverse_pass_kernel(ring, index, next, safe_exit_speed_sqr) || next.is_none() {
                    // The block before the newest move still holds the old safe exit
                    Visit::Changed
                } else {
                    Visit::Stop
                }
            });
            match visit {
                Visit::Stop => return,
                Visit::Changed => next = Some(index),
                Visit::Skipped => {}
            }
            index = BlockRing::<N>::prev_index(index);
        }
    }

    /// Forward pass fused with trapezoid generation.
    fn recalculate_trapezoids(&mut self, safe_exit_speed_sqr: f32) {
        let (mut index, head) = self.queue.lock(|ring| (ring.tail(), ring.head()));
        let mut previous: Option<usize> = None;
        let mut next_entry_speed = 0.0f32;

        while index != head {
            self.queue.lock(|ring| {
                if !ring.get(index).is_move() {
                    return;
                }
                if ring.get(index).flags.recalculate {
                    match previous {
                        None => {
                            // First move in the queue: undo any reverse pass change
                            let block = ring.get_mut(index);
                            block.entry_speed_sqr = block.min_entry_speed_sqr;
                            next_entry_speed = sqrtf(block.min_entry_speed_sqr);
                        }
                        Some(prev) if ring.is_busy(prev) || !ring.contains(prev) => {
                            // Claimed or already retired: its exit is fixed
                            let final_rate = ring.get(prev).final_rate;
                            let block = ring.get_mut(index);
                            block.entry_speed_sqr = block.min_entry_speed_sqr;
                            if block.initial_rate == 0 {
                                block.initial_rate = final_rate;
                            }
                        }
                        Some(prev) => {
                            let prev_block = *ring.get(prev);
                            let block = ring.get_mut(index);
                            if block.entry_speed_sqr != block.min_entry_speed_sqr {
                                forward_pass_kernel(&prev_block, block);
                            }
                            let current_entry_speed = next_entry_speed;
                            next_entry_speed = sqrtf(block.entry_speed_sqr);

                            let prev_block = ring.get_mut(prev);
                            calculate_trapezoid(prev_block, current_entry_speed, next_entry_speed);
                            prev_block.flags.recalculate = false;
                        }
                    }
                }
                previous = Some(index);
            });
            index = BlockRing::<N>::next_index(index);
        }

        if let Some(last) = previous {
            self.queue.lock(|ring| {
                let block = ring.get_mut(last);
                if block.flags.recalculate && !block.flags.busy {
                    calculate_trapezoid(block, next_entry_speed, sqrtf(safe_exit_speed_sqr));
                    block.flags.recalculate = false;
                }
            });
        }
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Drop every queued block and abort the one executing.
    ///
    /// Enqueues are refused for [`CLEANING_TICKS`] housekeeping ticks.
    pub fn quick_stop<T: StepperTimer, const Q: usize>(&mut self, stepper: &mut Stepper<T, Q>) {
        self.queue.lock(BlockRing::clear_to_tail);
        self.cleaning_counter = CLEANING_TICKS;
        stepper.quick_stop();
        debug!("quick stop");
    }

    /// Count down the post-stop cleaning window. Call at 1 kHz.
    pub fn housekeeping_tick(&mut self) {
        self.cleaning_counter = self.cleaning_counter.saturating_sub(1);
    }

    /// Remaining cleaning ticks.
    #[inline]
    pub fn cleaning(&self) -> u16 {
        self.cleaning_counter
    }

    /// Declare the current position to be `position_mm`.
    ///
    /// With blocks queued the engine learns the new position through a sync
    /// block in queue order; otherwise it is set directly. Returns `false`
    /// (and changes nothing) when the sync block does not fit.
    pub fn set_position_mm<T: StepperTimer, const Q: usize>(
        &mut self,
        stepper: &mut Stepper<T, Q>,
        position_mm: PerAxis<f32>,
    ) -> bool {
        let position = self
            .kinematics
            .to_motor_steps(position_mm, &self.mech.steps_per_unit);
        let queued = self.queue.lock(|ring| {
            if ring.is_empty() {
                Some(false)
            } else if ring.push(Block::sync(position)) {
                Some(true)
            } else {
                None
            }
        });
        match queued {
            None => return false,
            Some(false) => stepper.set_position(&position),
            Some(true) => {}
        }
        self.position = position;
        self.position_mm = position_mm;
        true
    }

    /// Take the planner position from where the engine actually is.
    ///
    /// Use after a quick stop or endstop hit once the engine is idle.
    pub fn sync_from_engine<T: StepperTimer, const Q: usize>(&mut self, stepper: &mut Stepper<T, Q>) {
        self.position = stepper.position();
        self.position_mm = self
            .kinematics
            .to_logical_mm(&self.position, &self.mech.steps_per_unit);
        self.junction.reset();
    }

    /// Queue a block that only moves the engine's position.
    pub fn buffer_sync_block(&mut self) -> bool {
        let position = self.position;
        self.queue.lock(|ring| ring.push(Block::sync(position)))
    }

    /// Record the engine position for `axis` at an endstop hit and abort.
    pub fn endstop_triggered<T: StepperTimer, const Q: usize>(&mut self, stepper: &mut Stepper<T, Q>, axis: Axis) {
        stepper.endstop_triggered(axis);
    }

    /// Logical position recorded at the last endstop hit.
    pub fn triggered_position_mm<T: StepperTimer, const Q: usize>(&self, stepper: &Stepper<T, Q>) -> PerAxis<f32> {
        self.kinematics
            .to_logical_mm(&stepper.triggered_position(), &self.mech.steps_per_unit)
    }

    /// Wait until everything queued has run, calling `idle` meanwhile.
    pub fn synchronize<T, const Q: usize, F>(&mut self, stepper: &mut Stepper<T, Q>, mut idle: F)
    where
        T: StepperTimer,
        F: FnMut(&mut Self, &mut Stepper<T, Q>),
    {
        while self.busy(stepper) {
            idle(self, stepper);
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Blocks are queued, a stop is cleaning up or echoes are pending.
    pub fn busy<T: StepperTimer, const Q: usize>(&self, stepper: &Stepper<T, Q>) -> bool {
        self.has_blocks_queued() || self.cleaning_counter > 0 || stepper.input_shaping_busy()
    }

    /// Any block in the queue, claimed or not.
    #[inline]
    pub fn has_blocks_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Blocks in the queue, claimed or not.
    #[inline]
    pub fn queued_blocks(&self) -> usize {
        self.queue.len()
    }

    /// Planned time of the unclaimed blocks in microseconds.
    #[inline]
    pub fn buffer_runtime_us(&self) -> u32 {
        self.queue.buffer_runtime_us()
    }

    /// The queue shared with the step interrupt.
    #[inline]
    pub fn queue(&self) -> &'q MotionQueue<N> {
        self.queue
    }

    /// Copy of the block `offset` places after the oldest, if its
    /// trapezoid is ready.
    #[inline]
    pub fn get_future_block(&self, offset: usize) -> Option<Block> {
        self.queue.get_future_block(offset)
    }

    /// Logical position at the end of the queue.
    #[inline]
    pub fn position_mm(&self) -> PerAxis<f32> {
        self.position_mm
    }

    /// Motor position at the end of the queue.
    #[inline]
    pub fn position_steps(&self) -> PerAxis<i64> {
        self.position
    }

    /// Logical position of the engine right now.
    pub fn axis_position_mm<T: StepperTimer, const Q: usize>(&self, stepper: &mut Stepper<T, Q>) -> PerAxis<f32> {
        self.kinematics
            .to_logical_mm(&stepper.position(), &self.mech.steps_per_unit)
    }

    /// Machine geometry.
    #[inline]
    pub fn kinematics(&self) -> &Kinematics {
        &self.kinematics
    }

    /// Step-domain constraints in use.
    #[inline]
    pub fn constraints(&self) -> &MechanicalConstraints {
        &self.mech
    }

    /// Linear advance settings.
    #[inline]
    pub fn advance(&self) -> &AdvanceSettings {
        &self.advance
    }

    /// Active cornering model.
    #[inline]
    pub fn cornering(&self) -> Cornering {
        self.cornering
    }

    // ========================================================================
    // Setters
    // ========================================================================

    /// Set the max feedrate of an axis in mm/s.
    pub fn set_max_feedrate(&mut self, axis: Axis, value: f32) -> core::result::Result<(), PlannerError> {
        let v = self.mech.edit_limits[axis].apply(axis, Setting::MaxFeedrate, value)?;
        self.mech.max_feedrate[axis] = v;
        Ok(())
    }

    /// Set the max acceleration of an axis in mm/s².
    pub fn set_max_acceleration(&mut self, axis: Axis, value: f32) -> core::result::Result<(), PlannerError> {
        let v = self.mech.edit_limits[axis].apply(axis, Setting::MaxAcceleration, value)?;
        self.mech.max_acceleration[axis] = v;
        self.mech.refresh_acceleration_rates();
        self.refresh_max_e_jerk();
        Ok(())
    }

    /// Set the max jerk of an axis in mm/s.
    pub fn set_max_jerk(&mut self, axis: Axis, value: f32) -> core::result::Result<(), PlannerError> {
        let v = self.mech.edit_limits[axis].apply(axis, Setting::MaxJerk, value)?;
        self.mech.max_jerk[axis] = v;
        self.refresh_max_e_jerk();
        Ok(())
    }

    /// Switch to junction deviation cornering with `deviation` mm.
    pub fn set_junction_deviation(&mut self, deviation: f32) -> core::result::Result<(), PlannerError> {
        if !deviation.is_finite() || deviation <= 0.0 {
            return Err(PlannerError::InvalidValue(deviation));
        }
        self.cornering = Cornering::JunctionDeviation(deviation);
        self.refresh_max_e_jerk();
        Ok(())
    }

    /// Set the print acceleration in mm/s².
    pub fn set_acceleration(&mut self, value: f32) -> core::result::Result<(), PlannerError> {
        self.acceleration = positive(value)?;
        Ok(())
    }

    /// Set the travel acceleration in mm/s².
    pub fn set_travel_acceleration(&mut self, value: f32) -> core::result::Result<(), PlannerError> {
        self.travel_acceleration = positive(value)?;
        Ok(())
    }

    /// Set the retract acceleration in mm/s².
    pub fn set_retract_acceleration(&mut self, value: f32) -> core::result::Result<(), PlannerError> {
        self.retract_acceleration = positive(value)?;
        Ok(())
    }

    /// Set the linear advance factor of an extruder.
    pub fn set_advance_k(&mut self, extruder: u8, k: f32) -> core::result::Result<(), PlannerError> {
        self.advance.set_k(extruder, k)
    }

    fn refresh_max_e_jerk(&mut self) {
        self.max_e_jerk = match self.cornering {
            Cornering::JunctionDeviation(jd) => advance::max_e_jerk(jd, self.mech.max_acceleration[Axis::E]),
            Cornering::Jerk => self.mech.max_jerk[Axis::E],
        };
    }
}

/// Raise the entry of block `index` to what it can still shed before the
/// block after it. Returns `false` when nothing changed.
fn reverse_pass_kernel<const N: usize>(
    ring: &mut BlockRing<N>,
    index: usize,
    next: Option<usize>,
    safe_exit_speed_sqr: f32,
) -> bool {
    let next_entry_speed_sqr = match next {
        Some(n) => ring.get(n).entry_speed_sqr,
        None => safe_exit_speed_sqr,
    };
    let current = ring.get_mut(index);
    if current.flags.busy {
        return false;
    }
    let new_entry_speed_sqr =
        max_allowable_speed_sqr(-current.acceleration, next_entry_speed_sqr, current.millimeters)
            .min(current.max_entry_speed_sqr);
    // Also stops at a block already at its maximum
    if current.entry_speed_sqr == new_entry_speed_sqr {
        return false;
    }
    current.entry_speed_sqr = new_entry_speed_sqr;
    current.flags.recalculate = true;
    true
}

/// Cap the entry of `current` at what full acceleration from `previous`
/// reaches, then lock it in as the new minimum.
fn forward_pass_kernel(previous: &Block, current: &mut Block) {
    if previous.entry_speed_sqr < current.entry_speed_sqr {
        let mut new_exit_speed_sqr =
            max_allowable_speed_sqr(-previous.acceleration, previous.entry_speed_sqr, previous.millimeters);
        if new_exit_speed_sqr < current.entry_speed_sqr {
            new_exit_speed_sqr = new_exit_speed_sqr.max(current.min_entry_speed_sqr);
            current.entry_speed_sqr = new_exit_speed_sqr;
            current.max_entry_speed_sqr = new_exit_speed_sqr;
        }
    }
    current.min_entry_speed_sqr = current.entry_speed_sqr;
}

fn positive(value: f32) -> core::result::Result<f32, PlannerError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(PlannerError::InvalidValue(value))
    }
}
