//! Linear advance, input shaping and stepper engine configuration.

use heapless::Vec;
use serde::Deserialize;

use super::units::DampingRatio;
use crate::axis::MAX_EXTRUDERS;

/// Linear advance strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvanceMode {
    /// E is stepped by the main Bresenham, no compensation.
    #[default]
    Disabled,
    /// Secondary accumulator running at the main step rate.
    Rough,
    /// Exponentially smoothed extruder rate on a fixed sub-interval.
    Smooth,
}

/// `[advance]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceConfig {
    /// Strategy.
    #[serde(default)]
    pub mode: AdvanceMode,

    /// Advance factor K per extruder, in seconds (mm of filament per mm/s).
    #[serde(default)]
    pub k: Vec<f32, MAX_EXTRUDERS>,

    /// Smoothing time constant for the smooth strategy, in seconds.
    #[serde(default = "default_tau", rename = "tau_s")]
    pub tau: f32,
}

fn default_tau() -> f32 {
    0.02
}

impl AdvanceConfig {
    /// K for an extruder, zero when not configured.
    pub fn k_for(&self, extruder: usize) -> f32 {
        self.k.get(extruder).copied().unwrap_or(0.0)
    }
}

impl Default for AdvanceConfig {
    fn default() -> Self {
        Self {
            mode: AdvanceMode::Disabled,
            k: Vec::new(),
            tau: default_tau(),
        }
    }
}

/// `[shaping.<axis>]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ShapingAxisConfig {
    /// Resonant frequency in Hz; zero disables shaping on the axis.
    pub frequency_hz: f32,

    /// Damping ratio of the resonance.
    #[serde(default)]
    pub damping_ratio: DampingRatio,
}

/// `[stepper]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StepperConfig {
    /// Highest step interrupt frequency before multistepping kicks in.
    #[serde(default = "default_max_isr_frequency", rename = "max_step_isr_frequency_hz")]
    pub max_isr_frequency: u32,

    /// Adaptive smoothing oversamples blocks below this ISR frequency.
    #[serde(default, rename = "min_step_isr_frequency_hz")]
    pub min_isr_frequency: Option<u32>,

    /// Upper bound on steps emitted per interrupt.
    #[serde(default = "default_multistepping_limit")]
    pub multistepping_limit: u8,

    /// Oversample slow blocks for smoother low-speed motion.
    #[serde(default)]
    pub adaptive_step_smoothing: bool,
}

fn default_max_isr_frequency() -> u32 {
    100_000
}

fn default_multistepping_limit() -> u8 {
    16
}

impl StepperConfig {
    /// Effective minimum ISR frequency for adaptive smoothing.
    pub fn min_isr_frequency(&self) -> u32 {
        self.min_isr_frequency.unwrap_or(self.max_isr_frequency / 2)
    }
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            max_isr_frequency: default_max_isr_frequency(),
            min_isr_frequency: None,
            multistepping_limit: default_multistepping_limit(),
            adaptive_step_smoothing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_k_lookup() {
        let mut config = AdvanceConfig::default();
        config.k.push(0.05).unwrap();
        assert_eq!(config.k_for(0), 0.05);
        assert_eq!(config.k_for(1), 0.0);
    }

    #[test]
    fn test_min_isr_frequency_default() {
        let config = StepperConfig::default();
        assert_eq!(config.min_isr_frequency(), 50_000);
    }
}
