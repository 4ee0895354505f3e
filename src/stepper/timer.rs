//! Step interrupt control.

/// Control over the step interrupt.
///
/// The main context suspends the interrupt around the few O(1) updates of
/// engine state it shares with the interrupt: position, endstop snapshot
/// and shaping or advance settings. The block queue has its own critical
/// sections. On a microcontroller this masks the timer IRQ; under RTIC or
/// a task executor it maps to the resource lock.
pub trait StepperTimer {
    /// Mask the step interrupt. Returns whether it was enabled before.
    fn suspend(&mut self) -> bool;

    /// Unmask the step interrupt.
    fn wake_up(&mut self);
}

/// Run `f` with the step interrupt masked, restoring the previous state.
pub fn with_suspended<T, R, F>(timer: &mut T, f: F) -> R
where
    T: StepperTimer,
    F: FnOnce() -> R,
{
    let was_enabled = timer.suspend();
    let result = f();
    if was_enabled {
        timer.wake_up();
    }
    result
}

/// Hosted timer for simulation and tests.
///
/// Tracks the enable state and counts critical sections.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTimer {
    suspended: bool,
    suspends: u32,
}

impl SimulatedTimer {
    /// Enabled timer.
    pub const fn new() -> Self {
        Self {
            suspended: false,
            suspends: 0,
        }
    }

    /// Whether the interrupt is currently masked.
    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Number of times the interrupt was masked from the enabled state.
    #[inline]
    pub fn suspend_count(&self) -> u32 {
        self.suspends
    }
}

impl StepperTimer for SimulatedTimer {
    fn suspend(&mut self) -> bool {
        let was_enabled = !self.suspended;
        if was_enabled {
            self.suspends += 1;
        }
        self.suspended = true;
        was_enabled
    }

    fn wake_up(&mut self) {
        self.suspended = false;
    }
}
