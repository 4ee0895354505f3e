//! Motion system facade.
//!
//! Couples one [`Planner`] and one [`Stepper`] built from the same
//! configuration around a shared [`MotionQueue`], plus the output the
//! engine pulses. On hardware the planner half runs in the main loop and
//! [`MotionSystem::isr`] in the timer interrupt; in a hosted simulation
//! both run on one thread.

use crate::axis::{Axis, PerAxis};
use crate::config::{validate_config, MachineConfig};
use crate::error::{Result, StepperError};
use crate::planner::{MotionQueue, MoveHints, Planner, BLOCK_BUFFER_SIZE};
use crate::shaping::SHAPING_QUEUE_SIZE;
use crate::stepper::timing::STEPPER_TIMER_RATE;
use crate::stepper::{StepOutput, Stepper, StepperTimer};
use crate::telemetry::Telemetry;

/// Timer ticks per housekeeping tick (1 kHz).
pub const HOUSEKEEPING_TICKS: u32 = STEPPER_TIMER_RATE / 1000;

/// A planner and its stepper engine.
///
/// Generic over:
/// - `T`: step interrupt control (must implement [`StepperTimer`])
/// - `O`: pulse output (must implement [`StepOutput`])
/// - `N`: block queue size
/// - `Q`: input shaping echo queue size
///
/// # Example
///
/// ```rust,ignore
/// use lookahead_motion::{MotionQueue, MotionSystem, SimulatedTimer, StepCounter};
///
/// let config = lookahead_motion::load_config("machine.toml")?;
/// let queue = MotionQueue::new();
/// let mut system: MotionSystem<_, _> =
///     MotionSystem::from_config(&config, &queue, SimulatedTimer::new(), StepCounter::new())?;
///
/// system.enqueue(PerAxis([100.0, 0.0, 0.0, 0.0]), 50.0, 0);
/// system.synchronize();
/// ```
pub struct MotionSystem<'q, T, O, const N: usize = BLOCK_BUFFER_SIZE, const Q: usize = SHAPING_QUEUE_SIZE>
where
    T: StepperTimer,
    O: StepOutput,
{
    planner: Planner<'q, N>,
    stepper: Stepper<T, Q>,
    output: O,
    elapsed_ticks: u64,
    housekeeping_due: u32,
}

impl<'q, T, O, const N: usize, const Q: usize> MotionSystem<'q, T, O, N, Q>
where
    T: StepperTimer,
    O: StepOutput,
{
    /// Validate `config` and build the planner and the engine at the origin,
    /// sharing `queue`.
    ///
    /// # Errors
    ///
    /// Returns the first configuration violation, or the engine's
    /// construction error.
    pub fn from_config(config: &MachineConfig, queue: &'q MotionQueue<N>, timer: T, output: O) -> Result<Self> {
        validate_config(config)?;
        Ok(Self {
            planner: Planner::from_config(config, queue)?,
            stepper: Stepper::new(config, timer)?,
            output,
            elapsed_ticks: 0,
            housekeeping_due: HOUSEKEEPING_TICKS,
        })
    }

    /// Queue a move to `target` (logical mm) at `feedrate` mm/s.
    ///
    /// Returns `false` when the planner refused the move.
    pub fn enqueue(&mut self, target: PerAxis<f32>, feedrate: f32, extruder: u8) -> bool {
        self.planner.enqueue(target, feedrate, extruder, &MoveHints::default())
    }

    /// Queue a move with caller-supplied hints.
    pub fn enqueue_with_hints(
        &mut self,
        target: PerAxis<f32>,
        feedrate: f32,
        extruder: u8,
        hints: &MoveHints,
    ) -> bool {
        self.planner.enqueue(target, feedrate, extruder, hints)
    }

    /// Run the step interrupt once. Returns the ticks until the next call.
    pub fn isr(&mut self) -> u32 {
        let queue = self.planner.queue();
        let ticks = self.stepper.isr(queue, &mut self.output);
        self.elapsed_ticks = self.elapsed_ticks.saturating_add(ticks as u64);
        ticks
    }

    /// Count down the post-stop cleaning window. Call at 1 kHz.
    pub fn housekeeping_tick(&mut self) {
        self.planner.housekeeping_tick();
    }

    /// Run the engine until everything queued has executed, ticking
    /// housekeeping from simulated time.
    pub fn synchronize(&mut self) {
        while self.planner.busy(&self.stepper) {
            let mut ticks = self.isr();
            while ticks >= self.housekeeping_due {
                ticks -= self.housekeeping_due;
                self.housekeeping_due = HOUSEKEEPING_TICKS;
                self.planner.housekeeping_tick();
            }
            self.housekeeping_due -= ticks;
        }
    }

    /// Drop everything queued and abort the executing block.
    pub fn quick_stop(&mut self) {
        self.planner.quick_stop(&mut self.stepper);
    }

    /// Take the planner position from the engine, after a stop.
    pub fn resync_position(&mut self) {
        self.planner.sync_from_engine(&mut self.stepper);
    }

    /// Declare the current logical position.
    ///
    /// Returns `false` when the position could not be queued.
    pub fn set_position_mm(&mut self, position: PerAxis<f32>) -> bool {
        self.planner.set_position_mm(&mut self.stepper, position)
    }

    /// Logical position at the end of the queue.
    pub fn position_mm(&self) -> PerAxis<f32> {
        self.planner.position_mm()
    }

    /// Logical position of the engine right now.
    pub fn axis_position_mm(&mut self) -> PerAxis<f32> {
        self.planner.axis_position_mm(&mut self.stepper)
    }

    /// Moves queued, a stop cleaning up or echoes pending.
    pub fn busy(&self) -> bool {
        self.planner.busy(&self.stepper)
    }

    /// Report an endstop hit on `axis`.
    pub fn endstop_triggered(&mut self, axis: Axis) {
        self.planner.endstop_triggered(&mut self.stepper, axis);
    }

    /// Logical position at the last endstop hit.
    pub fn triggered_position_mm(&self) -> PerAxis<f32> {
        self.planner.triggered_position_mm(&self.stepper)
    }

    /// Change the shaped frequency of an axis, waiting for motion to end
    /// first.
    ///
    /// # Errors
    ///
    /// See [`Stepper::set_shaping_frequency`].
    pub fn set_shaping_frequency(&mut self, axis: Axis, frequency: f32) -> core::result::Result<(), StepperError> {
        self.synchronize();
        let mech = self.planner.constraints().clone();
        self.stepper.set_shaping_frequency(axis, frequency, &mech)
    }

    /// Status snapshot.
    pub fn telemetry(&mut self) -> Telemetry {
        Telemetry::capture(&self.planner, &mut self.stepper)
    }

    /// Timer ticks simulated through [`Self::isr`].
    #[inline]
    pub fn elapsed_ticks(&self) -> u64 {
        self.elapsed_ticks
    }

    /// The planner.
    #[inline]
    pub fn planner(&self) -> &Planner<'q, N> {
        &self.planner
    }

    /// The planner, for setters.
    #[inline]
    pub fn planner_mut(&mut self) -> &mut Planner<'q, N> {
        &mut self.planner
    }

    /// The engine.
    #[inline]
    pub fn stepper(&self) -> &Stepper<T, Q> {
        &self.stepper
    }

    /// The engine, for setters and overrun accounting.
    #[inline]
    pub fn stepper_mut(&mut self) -> &mut Stepper<T, Q> {
        &mut self.stepper
    }

    /// The pulse output.
    #[inline]
    pub fn output(&self) -> &O {
        &self.output
    }

    /// Take the parts back.
    pub fn release(self) -> (Planner<'q, N>, Stepper<T, Q>, O) {
        (self.planner, self.stepper, self.output)
    }
}
