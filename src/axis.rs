//! Axis identifiers and per-axis containers.

use core::fmt;
use core::ops::{Index, IndexMut};

/// Number of motion axes (X, Y, Z, E).
pub const NUM_AXES: usize = 4;

/// Maximum number of extruders sharing the E stepper channel.
pub const MAX_EXTRUDERS: usize = 4;

/// A motion axis.
///
/// For coupled geometries the same indices name motors: `X` is motor A,
/// `Y` motor B and `Z` motor C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    /// X axis or motor A.
    X = 0,
    /// Y axis or motor B.
    Y = 1,
    /// Z axis or motor C.
    Z = 2,
    /// Extruder.
    E = 3,
}

impl Axis {
    /// All axes in index order.
    pub const ALL: [Axis; NUM_AXES] = [Axis::X, Axis::Y, Axis::Z, Axis::E];

    /// Head axes (everything but the extruder).
    pub const HEAD: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Index into per-axis arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Parse a configuration key (`"x"`, `"y"`, `"z"`, `"e"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x" | "X" => Some(Axis::X),
            "y" | "Y" => Some(Axis::Y),
            "z" | "Z" => Some(Axis::Z),
            "e" | "E" => Some(Axis::E),
            _ => None,
        }
    }

    /// Lowercase name used in configuration files.
    pub const fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
            Axis::E => "e",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction of axis motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Toward positive coordinates (step count increases).
    Positive,
    /// Toward negative coordinates (step count decreases).
    Negative,
}

impl Direction {
    /// Get direction from signed step count.
    #[inline]
    pub fn from_steps(steps: i64) -> Self {
        if steps >= 0 {
            Direction::Positive
        } else {
            Direction::Negative
        }
    }

    /// Get the sign multiplier.
    #[inline]
    pub fn sign(self) -> i64 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => -1,
        }
    }

    /// Opposite direction.
    #[inline]
    pub fn reversed(self) -> Self {
        match self {
            Direction::Positive => Direction::Negative,
            Direction::Negative => Direction::Positive,
        }
    }
}

/// One value per axis, indexable by [`Axis`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PerAxis<T>(pub [T; NUM_AXES]);

impl<T: Copy> PerAxis<T> {
    /// Same value on every axis.
    #[inline]
    pub const fn splat(value: T) -> Self {
        Self([value; NUM_AXES])
    }

    /// Apply `f` to every axis value.
    #[inline]
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> PerAxis<U> {
        PerAxis(self.0.map(f))
    }

    /// Build from a function of the axis.
    #[inline]
    pub fn from_fn<F: FnMut(Axis) -> T>(mut f: F) -> Self {
        PerAxis(core::array::from_fn(|i| f(Axis::ALL[i])))
    }

    /// Iterate `(axis, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Axis, T)> + '_ {
        Axis::ALL.iter().map(move |&a| (a, self.0[a.index()]))
    }
}

impl<T> Index<Axis> for PerAxis<T> {
    type Output = T;

    #[inline]
    fn index(&self, axis: Axis) -> &T {
        &self.0[axis.index()]
    }
}

impl<T> IndexMut<Axis> for PerAxis<T> {
    #[inline]
    fn index_mut(&mut self, axis: Axis) -> &mut T {
        &mut self.0[axis.index()]
    }
}

/// Compact per-axis bit set; a set bit means positive direction for
/// direction masks and "stepped" for step masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AxisBits(u8);

impl AxisBits {
    /// No bits set.
    pub const NONE: Self = Self(0);

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether the bit for `axis` is set.
    #[inline]
    pub const fn contains(self, axis: Axis) -> bool {
        self.0 & (1 << axis as u8) != 0
    }

    /// Set or clear the bit for `axis`.
    #[inline]
    pub fn set(&mut self, axis: Axis, value: bool) {
        if value {
            self.0 |= 1 << axis as u8;
        } else {
            self.0 &= !(1 << axis as u8);
        }
    }

    /// Toggle the bit for `axis`.
    #[inline]
    pub fn toggle(&mut self, axis: Axis) {
        self.0 ^= 1 << axis as u8;
    }

    /// Whether any bit is set.
    #[inline]
    pub const fn any(self) -> bool {
        self.0 != 0
    }

    /// Direction encoded by the bit for `axis`.
    #[inline]
    pub const fn direction(self, axis: Axis) -> Direction {
        if self.contains(axis) {
            Direction::Positive
        } else {
            Direction::Negative
        }
    }
}
