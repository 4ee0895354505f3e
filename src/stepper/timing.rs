//! Timer arithmetic shared by the planner and the engine.

/// Stepper timer tick rate in Hz.
pub const STEPPER_TIMER_RATE: u32 = 2_000_000;

/// Slowest step rate the timer can express in one period.
pub const MINIMAL_STEP_RATE: u32 = {
    let r = STEPPER_TIMER_RATE / u32::MAX;
    if r > 1 {
        r
    } else {
        1
    }
};

/// Interval value meaning "never fire".
pub const NEVER: u32 = u32::MAX;

/// Timer ticks between steps at `step_rate` steps per second.
#[inline]
pub fn calc_timer_interval(step_rate: u32) -> u32 {
    STEPPER_TIMER_RATE / step_rate.max(MINIMAL_STEP_RATE)
}

/// Steps per ISR and timer interval for `step_rate`.
///
/// While the rate is above `max_isr_frequency` it is halved and the number
/// of steps emitted per interrupt doubled, up to `limit`.
pub fn multistep_interval(mut step_rate: u32, max_isr_frequency: u32, limit: u8) -> (u32, u8) {
    let mut multistep: u8 = 1;
    while step_rate > max_isr_frequency && multistep < limit {
        step_rate >>= 1;
        multistep <<= 1;
    }
    (calc_timer_interval(step_rate), multistep)
}

/// `(time * rate) >> 24` without overflow.
#[inline]
pub fn step_multiply(time: u32, rate: u32) -> u32 {
    ((time as u64 * rate as u64) >> 24) as u32
}
