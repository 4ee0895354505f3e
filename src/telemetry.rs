//! Read-only status snapshots for a UI or host link.

use crate::axis::PerAxis;
use crate::planner::Planner;
use crate::stepper::{Stepper, StepperTimer};

/// Motion status at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    /// Blocks in the queue, including the executing one.
    pub queued_blocks: usize,
    /// Planned time of the blocks not yet claimed, in microseconds.
    pub buffer_runtime_us: u32,
    /// Timer ticks spent in the step interrupt so far.
    pub isr_busy_ticks: u64,
    /// Step interrupts that ran longer than their period.
    pub isr_overruns: u32,
    /// Engine motor position in steps.
    pub position: PerAxis<i64>,
    /// Step events emitted per interrupt at the current rate.
    pub steps_per_isr: u8,
    /// A block is executing.
    pub executing: bool,
}

impl Telemetry {
    /// Take a snapshot. The engine position is read with the interrupt
    /// suspended.
    pub fn capture<T: StepperTimer, const N: usize, const Q: usize>(
        planner: &Planner<'_, N>,
        stepper: &mut Stepper<T, Q>,
    ) -> Self {
        Self {
            queued_blocks: planner.queued_blocks(),
            buffer_runtime_us: planner.buffer_runtime_us(),
            isr_busy_ticks: stepper.isr_busy_ticks(),
            isr_overruns: stepper.isr_overruns(),
            position: stepper.position(),
            steps_per_isr: stepper.steps_per_isr(),
            executing: stepper.is_executing(),
        }
    }

    /// Fraction of CPU time spent in the step interrupt over `elapsed_ticks`.
    pub fn isr_load(&self, elapsed_ticks: u64) -> f32 {
        if elapsed_ticks == 0 {
            0.0
        } else {
            self.isr_busy_ticks as f32 / elapsed_ticks as f32
        }
    }
}
