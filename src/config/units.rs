//! Physical quantities read from the machine file.
//!
//! Bare floats in TOML, distinct types in the config structs so a jerk
//! cannot land in an acceleration field.

use serde::Deserialize;

use crate::error::ConfigError;

/// Length in millimeters (degrees for arm joints).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deserialize)]
#[serde(transparent)]
pub struct Millimeters(pub f32);

/// Speed in mm/s.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deserialize)]
#[serde(transparent)]
pub struct MmPerSec(pub f32);

/// Acceleration in mm/s².
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deserialize)]
#[serde(transparent)]
pub struct MmPerSecSquared(pub f32);

/// Damping ratio of a resonance, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct DampingRatio(f32);

impl DampingRatio {
    /// Typical printer frame damping.
    pub const TYPICAL: Self = Self(0.1);

    /// # Errors
    ///
    /// `ConfigError::InvalidDampingRatio` outside `[0, 1]` or for NaN.
    pub fn new(value: f32) -> Result<Self, ConfigError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ConfigError::InvalidDampingRatio(value))
        }
    }

    /// Raw ratio.
    #[inline]
    pub const fn value(self) -> f32 {
        self.0
    }
}

impl Default for DampingRatio {
    fn default() -> Self {
        Self::TYPICAL
    }
}

impl<'de> Deserialize<'de> for DampingRatio {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use core::fmt::Write;
        let value = f32::deserialize(deserializer)?;
        DampingRatio::new(value).map_err(|e| {
            let mut buf = heapless::String::<128>::new();
            let _ = write!(buf, "{}", e);
            serde::de::Error::custom(buf.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damping_ratio_valid_values() {
        for v in [0.0, 0.05, 0.1, 0.5, 1.0] {
            assert!(DampingRatio::new(v).is_ok());
        }
        assert_eq!(DampingRatio::default().value(), 0.1);
    }

    #[test]
    fn test_damping_ratio_invalid_values() {
        assert!(DampingRatio::new(-0.01).is_err());
        assert!(DampingRatio::new(1.5).is_err());
        assert!(DampingRatio::new(f32::NAN).is_err());
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_quantities_read_as_bare_floats() {
        #[derive(Deserialize)]
        struct Sample {
            length: Millimeters,
            speed: MmPerSec,
            accel: MmPerSecSquared,
            zeta: DampingRatio,
        }

        let s: Sample = toml::from_str("length = 0.013\nspeed = 50.0\naccel = 500.0\nzeta = 0.2").unwrap();
        assert_eq!(s.length, Millimeters(0.013));
        assert_eq!(s.speed, MmPerSec(50.0));
        assert_eq!(s.accel, MmPerSecSquared(500.0));
        assert_eq!(s.zeta.value(), 0.2);

        let err = toml::from_str::<Sample>("length = 1.0\nspeed = 1.0\naccel = 1.0\nzeta = 2.0");
        assert!(err.is_err());
    }
}
