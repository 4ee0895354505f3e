//! Real-time stepper execution engine.
//!
//! [`Stepper::isr`] is the body of the step timer interrupt. Each call runs
//! up to ten passes of:
//!
//! 1. echo pulses whose delay elapsed ([`crate::shaping`]),
//! 2. the pulse phase: Bresenham over the current block's step counts,
//! 3. linear advance E pulses,
//! 4. the block phase: next interval from the trapezoid, block retirement
//!    and loading,
//! 5. the smooth advance evaluation,
//!
//! then returns the ticks until it must be called again.
//!
//! The engine never returns an error. Anything that cannot proceed this
//! pass (empty queue, block not yet planned) is retried on the next.

pub mod timing;

mod driver;
mod timer;

pub use driver::{PinStepOutput, StepCounter, StepOutput, DEFAULT_PULSE_WIDTH_NS};
pub use timer::{with_suspended, SimulatedTimer, StepperTimer};

use crate::advance::{RoughAdvance, SmoothAdvance};
use crate::axis::{Axis, AxisBits, Direction, PerAxis, NUM_AXES};
use crate::config::{AdvanceMode, MachineConfig, MechanicalConstraints};
use crate::error::{Result, StepperError};
use crate::planner::{Block, MotionQueue};
use crate::shaping::{echo_delay, required_queue_depth, AxisShaper, ShapingQueue, SHAPING_QUEUE_SIZE};

use self::timing::{calc_timer_interval, multistep_interval, step_multiply, NEVER, STEPPER_TIMER_RATE};

/// Most passes per interrupt before giving the CPU back.
pub const MAX_ISR_LOOPS: u8 = 10;

/// Shortest interval the engine asks for, one microsecond.
pub const MIN_ISR_TICKS: u32 = STEPPER_TIMER_RATE / 1_000_000;

/// Poll interval while idle, one millisecond.
pub const IDLE_INTERVAL: u32 = STEPPER_TIMER_RATE / 1000;

/// Step execution engine.
///
/// Generic over the interrupt control `T` and the echo queue capacity `Q`.
/// Owns everything the interrupt touches except the block queue, which it
/// shares with the planner through a [`MotionQueue`].
///
/// # Example
///
/// ```rust,ignore
/// static QUEUE: MotionQueue = MotionQueue::new();
///
/// let mut planner: Planner = Planner::from_config(&config, &QUEUE)?;
/// let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new())?;
/// let mut output = StepCounter::new();
///
/// planner.enqueue(target, 50.0, 0, &MoveHints::default());
/// loop {
///     let ticks = stepper.isr(&QUEUE, &mut output);
///     // program the timer compare with `ticks`
/// }
/// ```
pub struct Stepper<T: StepperTimer, const Q: usize = SHAPING_QUEUE_SIZE> {
    timer: T,
    current: Option<Block>,
    abort_current_block: bool,

    // Bresenham
    delta_error: PerAxis<i64>,
    advance_dividend: PerAxis<i64>,
    advance_divisor: i64,
    step_event_count: u32,
    step_events_completed: u32,
    accelerate_before: u32,
    decelerate_start: u32,
    oversampling: u8,

    // Trapezoid timing
    acceleration_time: u32,
    deceleration_time: u32,
    acc_step_rate: u32,
    curr_step_rate: u32,
    ticks_nominal: u32,
    next_main_isr: u32,
    steps_per_isr: u8,
    multistepping_limit: u8,
    max_isr_frequency: u32,
    min_isr_frequency: u32,
    adaptive_step_smoothing: bool,

    // Directions and position
    last_direction_bits: AxisBits,
    directions_written: bool,
    invert_direction: AxisBits,
    count_direction: PerAxis<i64>,
    count_position: PerAxis<i64>,
    stepper_extruder: u8,
    last_moved_extruder: u8,
    triggered_position: PerAxis<i64>,
    triggered_axes: AxisBits,

    // Linear advance
    advance_mode: AdvanceMode,
    rough: RoughAdvance,
    smooth: SmoothAdvance,

    // Input shaping
    shapers: PerAxis<AxisShaper>,
    shaping: ShapingQueue<Q>,
    max_shaped_step_rate: f32,

    // Telemetry
    last_interval: u32,
    isr_busy_ticks: u64,
    isr_overruns: u32,
}

impl<T: StepperTimer, const Q: usize> Stepper<T, Q> {
    /// Build an idle engine at the origin.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingAxis` when an axis section is missing
    /// - `StepperError::ShapingNotSupported` for shaping on E
    /// - `StepperError::ShapingQueueTooSmall` when `Q` cannot hold half a
    ///   period of steps at the slowest shaped frequency
    /// - `StepperError::InvalidAdvanceTau` for a non-positive time constant
    pub fn new(config: &MachineConfig, timer: T) -> Result<Self> {
        let mech = MechanicalConstraints::from_config(config)?;
        let stepper = &config.stepper;

        let mut shapers = PerAxis::splat(AxisShaper::default());
        let mut shaping = ShapingQueue::new();
        let mut max_shaped_step_rate = 0.0;
        for axis in Axis::ALL {
            if let Some(s) = config.shaping(axis) {
                if axis == Axis::E {
                    return Err(StepperError::ShapingNotSupported(axis).into());
                }
                shapers[axis] = AxisShaper::new(s.frequency_hz, s.damping_ratio.value());
                shaping.set_delay(axis, echo_delay(s.frequency_hz));
                max_shaped_step_rate += mech.max_step_rate(axis);
            }
        }
        check_queue_depth::<Q>(&shapers, max_shaped_step_rate)?;

        Ok(Self {
            timer,
            current: None,
            abort_current_block: false,
            delta_error: PerAxis::splat(0),
            advance_dividend: PerAxis::splat(0),
            advance_divisor: 0,
            step_event_count: 0,
            step_events_completed: 0,
            accelerate_before: 0,
            decelerate_start: 0,
            oversampling: 0,
            acceleration_time: 0,
            deceleration_time: 0,
            acc_step_rate: 0,
            curr_step_rate: 0,
            ticks_nominal: 0,
            next_main_isr: 0,
            steps_per_isr: 1,
            multistepping_limit: stepper.multistepping_limit.max(1),
            max_isr_frequency: stepper.max_isr_frequency,
            min_isr_frequency: stepper.min_isr_frequency(),
            adaptive_step_smoothing: stepper.adaptive_step_smoothing,
            last_direction_bits: AxisBits::NONE,
            directions_written: false,
            invert_direction: mech.invert_direction,
            count_direction: PerAxis::splat(-1),
            count_position: PerAxis::splat(0),
            stepper_extruder: 0,
            last_moved_extruder: 0,
            triggered_position: PerAxis::splat(0),
            triggered_axes: AxisBits::NONE,
            advance_mode: config.advance.mode,
            rough: RoughAdvance::new(),
            smooth: SmoothAdvance::new(config.advance.tau)?,
            shapers,
            shaping,
            max_shaped_step_rate,
            last_interval: NEVER,
            isr_busy_ticks: 0,
            isr_overruns: 0,
        })
    }

    // ========================================================================
    // Interrupt
    // ========================================================================

    /// Run the step interrupt. Returns the ticks until the next call.
    ///
    /// Blocks are claimed from and retired to `queue`, each under its own
    /// short critical section.
    pub fn isr<const N: usize, O: StepOutput>(&mut self, queue: &MotionQueue<N>, out: &mut O) -> u32 {
        let mut next_isr_ticks: u32 = 0;
        let mut loops = MAX_ISR_LOOPS;

        loop {
            self.shaping_isr(out);

            if self.next_main_isr == 0 {
                self.pulse_phase(queue, out);
            }

            match self.advance_mode {
                AdvanceMode::Rough => {
                    if self.rough.due() {
                        self.advance_isr(out);
                        self.rough.rearm();
                    }
                }
                AdvanceMode::Smooth => {
                    if self.smooth.due() {
                        self.advance_isr(out);
                        self.smooth.rearm();
                    }
                }
                AdvanceMode::Disabled => {}
            }

            if self.next_main_isr == 0 {
                self.next_main_isr = self.block_phase(queue, out).max(1);
            }

            if self.advance_mode == AdvanceMode::Smooth && self.smooth.next_tick() == 0 {
                self.smooth_isr(queue, out);
            }

            let interval = self.next_interval();
            self.next_main_isr -= interval;
            self.shaping.decrement_delays(interval);
            self.rough.elapse(interval);
            self.smooth.elapse(interval);
            next_isr_ticks = next_isr_ticks.saturating_add(interval);

            loops -= 1;
            if loops == 0 || next_isr_ticks >= MIN_ISR_TICKS {
                break;
            }
        }

        let ticks = next_isr_ticks.max(MIN_ISR_TICKS);
        self.last_interval = ticks;
        ticks
    }

    /// Time until the earliest pending phase.
    fn next_interval(&self) -> u32 {
        let mut interval = self.next_main_isr;
        for axis in Axis::HEAD {
            if self.shapers[axis].enabled {
                interval = interval.min(self.shaping.peek(axis));
            }
        }
        match self.advance_mode {
            AdvanceMode::Rough => interval.min(self.rough.next_tick()),
            AdvanceMode::Smooth => interval.min(self.smooth.next_step()).min(self.smooth.next_tick()),
            AdvanceMode::Disabled => interval,
        }
    }

    /// Emit the step events due this pass.
    fn pulse_phase<const N: usize, O: StepOutput>(&mut self, queue: &MotionQueue<N>, out: &mut O) {
        if self.abort_current_block {
            self.abort_current_block = false;
            if self.current.is_some() {
                debug!("engine aborting block at event {}", self.step_events_completed);
                self.discard_current_block(queue);
                self.shaping.purge();
                for axis in Axis::HEAD {
                    let position = self.count_position[axis];
                    self.shapers[axis].reset(position);
                }
            }
        }

        if self.current.is_none() || self.step_events_completed >= self.step_event_count {
            return;
        }

        let pending = self.step_event_count - self.step_events_completed;
        let events_to_do = pending.min(self.steps_per_isr as u32);
        self.step_events_completed += events_to_do;

        for _ in 0..events_to_do {
            let mut step_needed = AxisBits::NONE;
            for axis in Axis::ALL {
                let mut de = self.delta_error[axis] + self.advance_dividend[axis];
                if de >= 0 {
                    step_needed.set(axis, true);
                    de -= self.advance_divisor;
                }
                self.delta_error[axis] = de;
            }

            match self.advance_mode {
                AdvanceMode::Rough => {
                    if step_needed.contains(Axis::E) && self.rough.absorb_main_step() {
                        step_needed.set(Axis::E, false);
                    }
                }
                // E belongs to the advance ticks
                AdvanceMode::Smooth => step_needed.set(Axis::E, false),
                AdvanceMode::Disabled => {}
            }

            let mut echoes = [None; NUM_AXES];
            for axis in Axis::HEAD {
                let shaper = &self.shapers[axis];
                if shaper.enabled && step_needed.contains(axis) {
                    echoes[axis.index()] = Some(shaper.forward);
                }
            }
            if echoes.iter().any(Option::is_some) {
                self.shaping.enqueue(echoes);
                for axis in Axis::HEAD {
                    if let Some(forward) = echoes[axis.index()] {
                        let dividend = self.shapers[axis].primary_dividend(forward);
                        match self.shapers[axis].prep_step(dividend) {
                            Some(step_forward) => self.follow_direction(axis, step_forward, out),
                            None => step_needed.set(axis, false),
                        }
                    }
                }
            }

            for axis in Axis::ALL {
                if step_needed.contains(axis) {
                    self.count_position[axis] += self.count_direction[axis];
                    out.pulse(axis);
                }
            }
        }
    }

    /// Emit every echo that is due, or that must go early to keep room in
    /// the queue for the next pulse phase.
    fn shaping_isr<O: StepOutput>(&mut self, out: &mut O) {
        loop {
            let mut stepped = false;
            for axis in Axis::HEAD {
                if !self.echo_due(axis) {
                    continue;
                }
                stepped = true;
                if let Some(forward) = self.shaping.dequeue(axis) {
                    let dividend = self.shapers[axis].echo_dividend(forward);
                    if let Some(step_forward) = self.shapers[axis].prep_step(dividend) {
                        self.follow_direction(axis, step_forward, out);
                        self.count_position[axis] += self.count_direction[axis];
                        out.pulse(axis);
                    }
                }
            }
            if !stepped {
                break;
            }
        }
    }

    fn echo_due(&self, axis: Axis) -> bool {
        self.shapers[axis].enabled
            && !self.shaping.is_empty(axis)
            && (self.shaping.peek(axis) == 0 || self.shaping.free_count(axis) < self.steps_per_isr as usize)
    }

    /// One linear advance E step.
    fn advance_isr<O: StepOutput>(&mut self, out: &mut O) {
        let step = match self.advance_mode {
            AdvanceMode::Rough => self.rough.tick(),
            _ => true,
        };
        if step {
            let sign = self.count_direction[Axis::E];
            self.count_position[Axis::E] += sign;
            if self.advance_mode == AdvanceMode::Rough {
                self.rough.record_step(sign as i32);
            }
            out.pulse(Axis::E);
        }
    }

    /// Re-evaluate the smooth advance E rate.
    fn smooth_isr<const N: usize, O: StepOutput>(&mut self, queue: &MotionQueue<N>, out: &mut O) {
        let step_rate = if self.current.is_some() {
            self.curr_step_rate
        } else {
            self.curr_step_rate = 0;
            0
        };
        let current = self.current.as_ref();
        let smooth = &mut self.smooth;
        let rate = queue.lock(|ring| smooth.evaluate(current, ring.future_blocks(0), step_rate));
        if let Some(forward) = self.smooth.set_rate(rate) {
            self.set_e_direction(forward, out);
        }
    }

    /// Advance the trapezoid, retire a finished block and load the next.
    ///
    /// Returns the interval until the next pulse phase.
    fn block_phase<const N: usize, O: StepOutput>(&mut self, queue: &MotionQueue<N>, out: &mut O) -> u32 {
        let mut interval = IDLE_INTERVAL;

        if let Some(block) = self.current {
            if self.step_events_completed >= self.step_event_count {
                self.discard_current_block(queue);
            } else if self.step_events_completed < self.accelerate_before {
                let rate = (step_multiply(self.acceleration_time, block.acceleration_rate) + block.initial_rate)
                    .min(block.nominal_rate);
                self.acc_step_rate = rate;
                interval = self.multistep_interval(rate << self.oversampling);
                self.acceleration_time = self.acceleration_time.saturating_add(interval);
                self.deceleration_time = 0;
                if let Some(lead) = block.advance.as_ref() {
                    self.rough.accelerate(lead, rate);
                }
                self.curr_step_rate = rate;
            } else if self.step_events_completed >= self.decelerate_start {
                let slowdown = step_multiply(self.deceleration_time, block.acceleration_rate);
                let rate = if slowdown < self.acc_step_rate {
                    (self.acc_step_rate - slowdown).max(block.final_rate)
                } else {
                    block.final_rate
                };
                interval = self.multistep_interval(rate << self.oversampling);
                self.deceleration_time = self.deceleration_time.saturating_add(interval);
                if let Some(lead) = block.advance.as_ref() {
                    if let Some(forward) = self.rough.decelerate(lead, rate) {
                        self.set_e_direction(forward, out);
                    }
                }
                self.curr_step_rate = rate;
            } else {
                if self.ticks_nominal == 0 {
                    self.ticks_nominal = self.multistep_interval(block.nominal_rate << self.oversampling);
                    self.acc_step_rate = block.nominal_rate;
                    self.curr_step_rate = block.nominal_rate;
                    self.deceleration_time = self.ticks_nominal / 2;
                    if let Some(lead) = block.advance.as_ref() {
                        self.rough.cruise(lead, block.nominal_rate);
                    }
                }
                interval = self.ticks_nominal;
            }
        }

        if self.current.is_none() {
            let mut block = match queue.get_current_block() {
                Some(block) => block,
                None => return interval,
            };
            while !block.is_move() {
                self.apply_position(&block.position);
                queue.discard_current_block();
                block = match queue.get_current_block() {
                    Some(block) => block,
                    None => return interval,
                };
            }
            interval = self.load_block(block, out);
        }

        interval
    }

    /// Set up Bresenham, directions and advance for a fresh block.
    fn load_block<O: StepOutput>(&mut self, mut block: Block, out: &mut O) -> u32 {
        self.oversampling = 0;
        if self.adaptive_step_smoothing {
            let mut max_rate = block.nominal_rate.max(1);
            while max_rate < self.min_isr_frequency {
                max_rate <<= 1;
                if max_rate < self.min_isr_frequency {
                    self.oversampling += 1;
                }
            }
            let headroom = block.step_event_count.leading_zeros().saturating_sub(2) as u8;
            self.oversampling = self.oversampling.min(headroom);
        }

        self.step_event_count = block.step_event_count << self.oversampling;
        let start_error = -(self.step_event_count as i64);
        self.delta_error = PerAxis::splat(start_error);
        self.advance_dividend = block.steps.map(|s| (s as i64) << 1);
        self.advance_divisor = (self.step_event_count as i64) << 1;

        for axis in Axis::HEAD {
            let shaper = &mut self.shapers[axis];
            if shaper.enabled {
                let forward = block.direction_bits.contains(axis);
                let steps = block.steps[axis] as i64;
                shaper.last_block_end_pos += if forward { steps } else { -steps };
                shaper.forward = forward;
                if !self.shaping.is_empty(axis) {
                    // Echoes of the previous block still own the DIR pin
                    block
                        .direction_bits
                        .set(axis, self.last_direction_bits.contains(axis));
                }
            }
        }

        self.step_events_completed = 0;
        self.accelerate_before = block.accelerate_before << self.oversampling;
        self.decelerate_start = block.decelerate_start << self.oversampling;

        self.stepper_extruder = block.extruder;
        let extruder_changed = self.stepper_extruder != self.last_moved_extruder;
        match self.advance_mode {
            AdvanceMode::Rough => self.rough.load(
                block.advance.as_ref(),
                self.advance_dividend[Axis::E],
                self.advance_divisor,
                start_error,
                self.oversampling,
                extruder_changed,
                block.initial_rate,
            ),
            AdvanceMode::Smooth => self.smooth.start_block(),
            AdvanceMode::Disabled => {}
        }

        if extruder_changed {
            self.last_moved_extruder = self.stepper_extruder;
            out.select_extruder(self.stepper_extruder);
        }
        if extruder_changed || !self.directions_written || block.direction_bits != self.last_direction_bits {
            self.set_directions(block.direction_bits, out);
        }

        self.ticks_nominal = 0;
        self.acc_step_rate = block.initial_rate;
        self.curr_step_rate = block.initial_rate;
        let interval = self.multistep_interval(block.initial_rate << self.oversampling);
        self.acceleration_time = interval / 2;
        self.deceleration_time = interval / 2;

        trace!(
            "engine loaded block: {} events, rates {}/{}/{}",
            block.step_event_count,
            block.initial_rate,
            block.nominal_rate,
            block.final_rate
        );
        self.current = Some(block);
        interval
    }

    fn discard_current_block<const N: usize>(&mut self, queue: &MotionQueue<N>) {
        self.current = None;
        queue.discard_current_block();
        self.rough.stop();
    }

    /// Interval for `rate` events per second, updating the steps per ISR.
    fn multistep_interval(&mut self, rate: u32) -> u32 {
        let (interval, multistep) = multistep_interval(rate, self.max_isr_frequency, self.multistepping_limit);
        self.steps_per_isr = multistep;
        interval.max(1)
    }

    // ========================================================================
    // Directions
    // ========================================================================

    fn write_direction<O: StepOutput>(&mut self, axis: Axis, out: &mut O) {
        let forward = self.last_direction_bits.contains(axis);
        self.count_direction[axis] = if forward { 1 } else { -1 };
        let pin = if forward ^ self.invert_direction.contains(axis) {
            Direction::Positive
        } else {
            Direction::Negative
        };
        out.set_direction(axis, pin);
    }

    fn set_directions<O: StepOutput>(&mut self, bits: AxisBits, out: &mut O) {
        for axis in Axis::ALL {
            if axis == Axis::E && self.directions_written && self.advance_mode == AdvanceMode::Smooth {
                // Smooth advance owns the E direction
                continue;
            }
            let forward = bits.contains(axis);
            if !self.directions_written || forward != self.last_direction_bits.contains(axis) {
                self.last_direction_bits.set(axis, forward);
                self.write_direction(axis, out);
            }
        }
        self.directions_written = true;
    }

    /// Point a shaped axis the way its next physical step goes.
    fn follow_direction<O: StepOutput>(&mut self, axis: Axis, forward: bool, out: &mut O) {
        if forward != self.last_direction_bits.contains(axis) {
            self.last_direction_bits.toggle(axis);
            self.write_direction(axis, out);
        }
    }

    fn set_e_direction<O: StepOutput>(&mut self, forward: bool, out: &mut O) {
        self.follow_direction(Axis::E, forward, out);
    }

    // ========================================================================
    // Main-context API
    // ========================================================================

    /// Mask the step interrupt. Returns whether it was enabled.
    #[inline]
    pub fn suspend(&mut self) -> bool {
        self.timer.suspend()
    }

    /// Unmask the step interrupt.
    #[inline]
    pub fn wake_up(&mut self) {
        self.timer.wake_up();
    }

    /// The interrupt control.
    #[inline]
    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Drop the executing block at the next pulse phase.
    pub fn quick_stop(&mut self) {
        self.abort_current_block = true;
        debug!("engine abort requested");
    }

    /// Whether an abort is pending.
    #[inline]
    pub fn abort_pending(&self) -> bool {
        self.abort_current_block
    }

    /// Declare the motor position, in motor steps.
    pub fn set_position(&mut self, position: &PerAxis<i64>) {
        let was_enabled = self.timer.suspend();
        self.apply_position(position);
        if was_enabled {
            self.timer.wake_up();
        }
    }

    /// Keep the unechoed offset of shaped axes across a position change.
    fn apply_position(&mut self, position: &PerAxis<i64>) {
        for axis in Axis::HEAD {
            let shaper = &mut self.shapers[axis];
            if shaper.enabled {
                let pending = self.count_position[axis] - shaper.last_block_end_pos;
                self.count_position[axis] = position[axis] + pending;
                shaper.last_block_end_pos = position[axis];
            } else {
                self.count_position[axis] = position[axis];
            }
        }
        self.count_position[Axis::E] = position[Axis::E];
    }

    /// Motor position, in motor steps.
    pub fn position(&mut self) -> PerAxis<i64> {
        let count_position = &self.count_position;
        with_suspended(&mut self.timer, || *count_position)
    }

    /// Record the position at an endstop hit on `axis` and abort the
    /// current block.
    pub fn endstop_triggered(&mut self, axis: Axis) {
        let was_enabled = self.timer.suspend();
        self.triggered_position = self.count_position;
        self.triggered_axes.set(axis, true);
        self.quick_stop();
        if was_enabled {
            self.timer.wake_up();
        }
        debug!("endstop {} triggered at {}", axis.name(), self.count_position[axis]);
    }

    /// Motor position at the last endstop hit.
    #[inline]
    pub fn triggered_position(&self) -> PerAxis<i64> {
        self.triggered_position
    }

    /// Axes whose endstop fired since the last [`Self::clear_triggered`].
    #[inline]
    pub fn triggered_axes(&self) -> AxisBits {
        self.triggered_axes
    }

    /// Forget recorded endstop hits.
    pub fn clear_triggered(&mut self) {
        self.triggered_axes = AxisBits::NONE;
    }

    /// Echoes still pending on any shaped axis.
    pub fn input_shaping_busy(&self) -> bool {
        Axis::HEAD
            .iter()
            .any(|&axis| self.shapers[axis].enabled && !self.shaping.is_empty(axis))
    }

    /// Change the shaped frequency of an axis; zero disables shaping.
    ///
    /// Only call with the queue drained: switching while moving loses steps.
    ///
    /// # Errors
    ///
    /// - `StepperError::ShapingNotSupported` on E
    /// - `StepperError::InvalidFrequency` for a negative or non-finite value
    /// - `StepperError::ShapingQueueTooSmall` when the echo queue cannot
    ///   cover the new frequency
    pub fn set_shaping_frequency(
        &mut self,
        axis: Axis,
        frequency: f32,
        mech: &MechanicalConstraints,
    ) -> core::result::Result<(), StepperError> {
        if axis == Axis::E {
            return Err(StepperError::ShapingNotSupported(axis));
        }
        if !frequency.is_finite() || frequency < 0.0 {
            return Err(StepperError::InvalidFrequency(frequency));
        }

        let mut shapers = self.shapers;
        let was_enabled = shapers[axis].enabled;
        shapers[axis].set_frequency(frequency, 0);
        let axis_rate = mech.max_step_rate(axis);
        let mut max_rate = self.max_shaped_step_rate;
        if shapers[axis].enabled && !was_enabled {
            max_rate += axis_rate;
        }
        check_queue_depth::<Q>(&shapers, max_rate)?;

        let suspended = self.timer.suspend();
        self.shaping.set_delay(axis, echo_delay(frequency));
        let position = self.count_position[axis];
        self.shapers[axis].set_frequency(frequency, position);
        self.max_shaped_step_rate = max_rate;
        if suspended {
            self.timer.wake_up();
        }
        debug!("shaping {} at {} Hz", axis.name(), frequency);
        Ok(())
    }

    /// Change the damping ratio of a shaped axis.
    ///
    /// # Errors
    ///
    /// `StepperError::ShapingNotSupported` on E,
    /// `StepperError::InvalidDampingRatio` outside `[0, 1]`.
    pub fn set_shaping_damping_ratio(&mut self, axis: Axis, zeta: f32) -> core::result::Result<(), StepperError> {
        if axis == Axis::E {
            return Err(StepperError::ShapingNotSupported(axis));
        }
        if !(0.0..=1.0).contains(&zeta) {
            return Err(StepperError::InvalidDampingRatio(zeta));
        }
        let shapers = &mut self.shapers;
        with_suspended(&mut self.timer, || shapers[axis].set_damping_ratio(zeta));
        Ok(())
    }

    /// Shaped frequency of an axis, zero when disabled.
    #[inline]
    pub fn shaping_frequency(&self, axis: Axis) -> f32 {
        self.shapers[axis].frequency()
    }

    /// Damping ratio of an axis.
    #[inline]
    pub fn shaping_damping_ratio(&self, axis: Axis) -> f32 {
        self.shapers[axis].damping_ratio()
    }

    /// Set the smooth advance time constant of an extruder.
    ///
    /// # Errors
    ///
    /// `StepperError::InvalidAdvanceTau` for a non-positive value or an
    /// unknown extruder.
    pub fn set_advance_tau(&mut self, extruder: u8, tau: f32) -> core::result::Result<(), StepperError> {
        let smooth = &mut self.smooth;
        with_suspended(&mut self.timer, || smooth.set_tau(extruder, tau))
    }

    /// Smooth advance time constant of an extruder.
    #[inline]
    pub fn advance_tau(&self, extruder: u8) -> f32 {
        self.smooth.tau(extruder)
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Account for one interrupt that ran for `spent_ticks`.
    ///
    /// An interrupt that took longer than the interval it had programmed
    /// counts as an overrun. Nothing is corrected: the next call simply
    /// starts late.
    pub fn record_isr_duration(&mut self, spent_ticks: u32) {
        self.isr_busy_ticks = self.isr_busy_ticks.saturating_add(spent_ticks as u64);
        if self.last_interval != NEVER && spent_ticks > self.last_interval {
            self.isr_overruns = self.isr_overruns.saturating_add(1);
            warn!("step isr overrun: {} ticks for a {} tick period", spent_ticks, self.last_interval);
        }
    }

    /// Ticks spent inside the interrupt so far.
    #[inline]
    pub fn isr_busy_ticks(&self) -> u64 {
        self.isr_busy_ticks
    }

    /// Interrupts that outran their period.
    #[inline]
    pub fn isr_overruns(&self) -> u32 {
        self.isr_overruns
    }

    /// Step events per interrupt chosen for the current rate.
    #[inline]
    pub fn steps_per_isr(&self) -> u8 {
        self.steps_per_isr
    }

    /// Whether a block is executing.
    #[inline]
    pub fn is_executing(&self) -> bool {
        self.current.is_some()
    }

    /// The executing block.
    #[inline]
    pub fn current_block(&self) -> Option<&Block> {
        self.current.as_ref()
    }

    /// Step events done in the executing block.
    #[inline]
    pub fn step_events_completed(&self) -> u32 {
        self.step_events_completed
    }

    /// Rate of the executing block right now, in events per second.
    #[inline]
    pub fn current_step_rate(&self) -> u32 {
        self.curr_step_rate
    }

    /// Oversampling shift of the executing block.
    #[inline]
    pub fn oversampling(&self) -> u8 {
        self.oversampling
    }

    /// Net E steps the rough advance is ahead of the plan.
    #[inline]
    pub fn advance_steps(&self) -> i32 {
        self.rough.advance_steps()
    }
}

fn check_queue_depth<const Q: usize>(
    shapers: &PerAxis<AxisShaper>,
    max_shaped_step_rate: f32,
) -> core::result::Result<(), StepperError> {
    let min_frequency = Axis::HEAD
        .iter()
        .filter(|&&a| shapers[a].enabled)
        .map(|&a| shapers[a].frequency())
        .fold(f32::INFINITY, f32::min);
    if !min_frequency.is_finite() {
        return Ok(());
    }
    let required = required_queue_depth(max_shaped_step_rate, min_frequency);
    if required > Q {
        return Err(StepperError::ShapingQueueTooSmall {
            required,
            capacity: Q,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AxisConfig, ShapingAxisConfig};
    use crate::config::units::{DampingRatio, MmPerSec, MmPerSecSquared};
    use crate::planner::{MoveHints, Planner};

    fn axis_config(steps_per_unit: f32) -> AxisConfig {
        AxisConfig {
            steps_per_unit,
            max_feedrate: MmPerSec(300.0),
            max_acceleration: MmPerSecSquared(3000.0),
            max_jerk: MmPerSec(10.0),
            invert_direction: false,
            edit_limits: None,
        }
    }

    fn test_config() -> MachineConfig {
        let mut config = MachineConfig::default();
        for (name, spu) in [("x", 80.0), ("y", 80.0), ("z", 400.0), ("e", 93.0)] {
            config
                .axes
                .insert(heapless::String::try_from(name).unwrap(), axis_config(spu))
                .unwrap();
        }
        config.planner.acceleration = MmPerSecSquared(500.0);
        config
    }

    fn shaped_config(frequency_hz: f32) -> MachineConfig {
        let mut config = test_config();
        config
            .shaping
            .insert(
                heapless::String::try_from("x").unwrap(),
                ShapingAxisConfig {
                    frequency_hz,
                    damping_ratio: DampingRatio::new(0.1).unwrap(),
                },
            )
            .unwrap();
        config
    }

    fn target(x: f32, y: f32) -> PerAxis<f32> {
        PerAxis([x, y, 0.0, 0.0])
    }

    fn run_until_idle<const Q: usize>(
        planner: &mut Planner<'_>,
        stepper: &mut Stepper<SimulatedTimer, Q>,
        out: &mut StepCounter,
    ) -> u64 {
        let mut ticks = 0u64;
        for _ in 0..5_000_000 {
            ticks += stepper.isr(planner.queue(), out) as u64;
            if !planner.busy(stepper) {
                break;
            }
        }
        ticks
    }

    #[test]
    fn test_single_move_reaches_target() {
        let config = test_config();
        let queue = MotionQueue::new();
        let mut planner: Planner<'_> = Planner::from_config(&config, &queue).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        assert!(planner.enqueue(target(10.0, 5.0), 50.0, 0, &MoveHints::default()));
        run_until_idle(&mut planner, &mut stepper, &mut out);

        assert_eq!(stepper.position()[Axis::X], 800);
        assert_eq!(stepper.position()[Axis::Y], 400);
        assert_eq!(out.position(), stepper.position());
        assert!(!stepper.is_executing());
    }

    #[test]
    fn test_move_duration_matches_profile() {
        let config = test_config();
        let queue = MotionQueue::new();
        let mut planner: Planner<'_> = Planner::from_config(&config, &queue).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        // 100 mm at 50 mm/s, 500 mm/s²: 0.1 s up, 1.9 s cruise, 0.1 s down
        assert!(planner.enqueue(target(100.0, 0.0), 50.0, 0, &MoveHints::default()));
        let ticks = run_until_idle(&mut planner, &mut stepper, &mut out);
        let seconds = ticks as f32 / STEPPER_TIMER_RATE as f32;
        // Plus the first-move delay of 100 idle polls
        assert!(seconds > 2.1 && seconds < 2.3, "took {} s", seconds);
        assert_eq!(out.pulses()[Axis::X], 8000);
    }

    #[test]
    fn test_reversal_writes_direction() {
        let mut config = test_config();
        config.axes.iter_mut().for_each(|(name, axis)| {
            if name.as_str() == "y" {
                axis.invert_direction = true;
            }
        });
        let queue = MotionQueue::new();
        let mut planner: Planner<'_> = Planner::from_config(&config, &queue).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        assert!(planner.enqueue(target(5.0, 5.0), 50.0, 0, &MoveHints::default()));
        assert!(planner.enqueue(target(0.0, 0.0), 50.0, 0, &MoveHints::default()));
        run_until_idle(&mut planner, &mut stepper, &mut out);

        assert_eq!(stepper.position()[Axis::X], 0);
        assert_eq!(stepper.position()[Axis::Y], 0);
        assert_eq!(out.position()[Axis::X], 0);
        // Inverted pin: counter sees the mirror image
        assert_eq!(out.pulses()[Axis::Y], 800);
        assert_eq!(out.position()[Axis::Y], 0);
    }

    #[test]
    fn test_sync_block_sets_position_in_order() {
        let config = test_config();
        let queue = MotionQueue::new();
        let mut planner: Planner<'_> = Planner::from_config(&config, &queue).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        assert!(planner.enqueue(target(10.0, 0.0), 50.0, 0, &MoveHints::default()));
        assert!(planner.set_position_mm(&mut stepper, target(100.0, 0.0)));
        assert!(planner.enqueue(target(110.0, 0.0), 50.0, 0, &MoveHints::default()));
        run_until_idle(&mut planner, &mut stepper, &mut out);

        assert_eq!(stepper.position()[Axis::X], 8800);
        assert_eq!(out.pulses()[Axis::X], 1600);
    }

    #[test]
    fn test_quick_stop_aborts_executing_block() {
        let config = test_config();
        let queue = MotionQueue::new();
        let mut planner: Planner<'_> = Planner::from_config(&config, &queue).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        for i in 1..=4 {
            assert!(planner.enqueue(target(20.0 * i as f32, 0.0), 50.0, 0, &MoveHints::default()));
        }
        while !stepper.is_executing() {
            stepper.isr(&queue, &mut out);
        }
        for _ in 0..100 {
            stepper.isr(&queue, &mut out);
        }

        planner.quick_stop(&mut stepper);
        assert!(stepper.abort_pending());
        assert_eq!(planner.queue().head(), planner.queue().tail());
        assert!(!planner.enqueue(target(0.0, 0.0), 50.0, 0, &MoveHints::default()));

        // The abort lands on the next pulse phase
        stepper.isr(&queue, &mut out);
        stepper.isr(&queue, &mut out);
        assert!(!stepper.is_executing());
        let stopped_at = stepper.position()[Axis::X];
        assert!(stopped_at > 0 && stopped_at < 1600);
        // Only the position read masks the interrupt
        assert_eq!(stepper.timer().suspend_count(), 1);
    }

    #[test]
    fn test_multistepping_at_high_rate() {
        let mut config = test_config();
        config.stepper.max_isr_frequency = 5_000;
        let queue = MotionQueue::new();
        let mut planner: Planner<'_> = Planner::from_config(&config, &queue).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        // 200 mm/s on X is 16000 steps/s
        assert!(planner.enqueue(target(200.0, 0.0), 200.0, 0, &MoveHints::default()));
        let mut max_multistep = 1;
        for _ in 0..1_000_000 {
            stepper.isr(&queue, &mut out);
            max_multistep = max_multistep.max(stepper.steps_per_isr());
            if !planner.busy(&stepper) {
                break;
            }
        }
        assert_eq!(max_multistep, 4);
        assert_eq!(stepper.position()[Axis::X], 16_000);
    }

    #[test]
    fn test_adaptive_smoothing_oversamples_slow_blocks() {
        let mut config = test_config();
        config.stepper.adaptive_step_smoothing = true;
        let queue = MotionQueue::new();
        let mut planner: Planner<'_> = Planner::from_config(&config, &queue).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        assert!(planner.enqueue(target(2.0, 1.0), 5.0, 0, &MoveHints::default()));
        while !stepper.is_executing() {
            stepper.isr(&queue, &mut out);
        }
        assert!(stepper.oversampling() > 0);
        run_until_idle(&mut planner, &mut stepper, &mut out);
        assert_eq!(stepper.position()[Axis::X], 160);
        assert_eq!(stepper.position()[Axis::Y], 80);
    }

    #[test]
    fn test_shaped_axis_ends_at_target() {
        let config = shaped_config(40.0);
        let queue = MotionQueue::new();
        let mut planner: Planner<'_> = Planner::from_config(&config, &queue).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        assert!(planner.enqueue(target(10.0, 0.0), 50.0, 0, &MoveHints::default()));
        assert!(planner.enqueue(target(0.0, 0.0), 50.0, 0, &MoveHints::default()));
        run_until_idle(&mut planner, &mut stepper, &mut out);

        assert!(!stepper.input_shaping_busy());
        assert_eq!(stepper.position()[Axis::X], 0);
        assert_eq!(out.position()[Axis::X], 0);
        // Echoes of the first move cancel some primaries of the second
        assert!(out.pulses()[Axis::X] <= 1600);
        assert!(out.direction_changes()[Axis::X] >= 1);
    }

    #[test]
    fn test_shaping_queue_too_small() {
        let config = shaped_config(1.0);
        let result: Result<Stepper<_, 64>> = Stepper::new(&config, SimulatedTimer::new());
        assert!(matches!(
            result,
            Err(crate::Error::Stepper(StepperError::ShapingQueueTooSmall { capacity: 64, .. }))
        ));
    }

    #[test]
    fn test_shaping_setters() {
        let config = test_config();
        let mech = MechanicalConstraints::from_config(&config).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();

        assert!(stepper.set_shaping_frequency(Axis::Y, 35.0, &mech).is_ok());
        assert_eq!(stepper.shaping_frequency(Axis::Y), 35.0);
        assert_eq!(
            stepper.set_shaping_frequency(Axis::E, 35.0, &mech),
            Err(StepperError::ShapingNotSupported(Axis::E))
        );
        assert!(matches!(
            stepper.set_shaping_frequency(Axis::X, 1.0, &mech),
            Err(StepperError::ShapingQueueTooSmall { .. })
        ));
        assert!(stepper.set_shaping_damping_ratio(Axis::Y, 0.3).is_ok());
        assert_eq!(stepper.shaping_damping_ratio(Axis::Y), 0.3);
        assert_eq!(
            stepper.set_shaping_damping_ratio(Axis::Y, 1.5),
            Err(StepperError::InvalidDampingRatio(1.5))
        );
    }

    #[test]
    fn test_overrun_counting() {
        let config = test_config();
        let queue: MotionQueue = MotionQueue::new();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        let period = stepper.isr(&queue, &mut out);
        stepper.record_isr_duration(period / 2);
        assert_eq!(stepper.isr_overruns(), 0);
        stepper.record_isr_duration(period + 1);
        assert_eq!(stepper.isr_overruns(), 1);
        assert_eq!(stepper.isr_busy_ticks(), (period / 2 + period + 1) as u64);
    }

    #[test]
    fn test_endstop_snapshot() {
        let config = test_config();
        let queue = MotionQueue::new();
        let mut planner: Planner<'_> = Planner::from_config(&config, &queue).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        assert!(planner.enqueue(target(50.0, 0.0), 50.0, 0, &MoveHints::default()));
        while stepper.position()[Axis::X] < 400 {
            stepper.isr(&queue, &mut out);
        }
        stepper.endstop_triggered(Axis::X);
        let hit = stepper.triggered_position()[Axis::X];
        assert!(hit >= 400);
        assert!(stepper.triggered_axes().contains(Axis::X));
        stepper.isr(&queue, &mut out);
        stepper.isr(&queue, &mut out);
        assert!(!stepper.is_executing());
        stepper.clear_triggered();
        assert!(!stepper.triggered_axes().any());
    }

    #[test]
    fn test_engine_runs_while_planner_keeps_queueing() {
        let config = test_config();
        let queue = MotionQueue::new();
        let mut planner: Planner<'_> = Planner::from_config(&config, &queue).unwrap();
        let mut stepper: Stepper<_> = Stepper::new(&config, SimulatedTimer::new()).unwrap();
        let mut out = StepCounter::new();

        assert!(planner.enqueue(target(20.0, 0.0), 50.0, 0, &MoveHints::default()));
        while !stepper.is_executing() {
            stepper.isr(&queue, &mut out);
        }
        let index = queue.tail();
        let claimed = queue.get(index);
        assert!(claimed.flags.busy);

        // 1600 events at no more than one per call: still on the first block
        for i in 2..=6 {
            for _ in 0..200 {
                stepper.isr(&queue, &mut out);
            }
            assert!(planner.enqueue(target(20.0 * i as f32, 0.0), 50.0, 0, &MoveHints::default()));
            assert_eq!(queue.tail(), index);
            assert_eq!(queue.get(index), claimed);
        }

        // Followers were planned against the frozen exit
        let follower = queue.peek(1).unwrap();
        assert_eq!(follower.initial_rate, claimed.final_rate);

        run_until_idle(&mut planner, &mut stepper, &mut out);
        assert_eq!(stepper.position()[Axis::X], 9600);
        assert!(queue.is_empty());
    }
}
