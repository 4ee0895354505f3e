//! Machine geometry transforms.
//!
//! A closed set of geometries selected once from configuration. Every
//! variant maps logical head coordinates to motor coordinates and back;
//! [`Kinematics::plan_move`] turns a move into motor step deltas plus the
//! true head-frame length used for feedrate.
//!
//! Motors are addressed with the axis indices: `X` is motor A, `Y` motor B,
//! `Z` motor C. The extruder always passes through unchanged.

use libm::{atan2f, cosf, roundf, sinf, sqrtf};
use serde::Deserialize;

use crate::axis::{Axis, PerAxis};

/// Arm geometry for a two-link SCARA.
///
/// Motor A drives the shoulder angle, motor B the absolute elbow angle,
/// both in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScaraGeometry {
    /// Shoulder to elbow length.
    #[serde(rename = "proximal_arm_mm")]
    pub proximal_arm: f32,
    /// Elbow to nozzle length.
    #[serde(rename = "distal_arm_mm")]
    pub distal_arm: f32,
    /// Shoulder position relative to the bed origin.
    #[serde(default, rename = "offset_x_mm")]
    pub offset_x: f32,
    /// Shoulder position relative to the bed origin.
    #[serde(default, rename = "offset_y_mm")]
    pub offset_y: f32,
}

impl ScaraGeometry {
    /// Joint angles in degrees `(shoulder, elbow)` reaching `(x, y)`.
    ///
    /// Points out of reach are pulled onto the reachable circle.
    pub fn inverse(&self, x: f32, y: f32) -> (f32, f32) {
        let (l1, l2) = (self.proximal_arm, self.distal_arm);
        let sx = x - self.offset_x;
        let sy = y - self.offset_y;

        let c2 = ((sx * sx + sy * sy - l1 * l1 - l2 * l2) / (2.0 * l1 * l2)).clamp(-1.0, 1.0);
        let s2 = sqrtf(1.0 - c2 * c2);

        let k1 = l1 + l2 * c2;
        let k2 = l2 * s2;

        let theta = atan2f(sy, sx) - atan2f(k2, k1);
        let psi = atan2f(s2, c2);

        (theta.to_degrees(), (theta + psi).to_degrees())
    }

    /// Head position reached by joint angles in degrees.
    pub fn forward(&self, shoulder: f32, elbow: f32) -> (f32, f32) {
        let a = shoulder.to_radians();
        let b = elbow.to_radians();
        (
            self.proximal_arm * cosf(a) + self.distal_arm * cosf(b) + self.offset_x,
            self.proximal_arm * sinf(a) + self.distal_arm * sinf(b) + self.offset_y,
        )
    }
}

/// Machine geometry.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Kinematics {
    /// One motor per axis.
    #[default]
    Cartesian,
    /// A = X + Y, B = X - Y.
    CoreXy {
        /// Swap the sign of the difference motor.
        #[serde(default)]
        inverted: bool,
    },
    /// A = X + Z, C = X - Z.
    CoreXz {
        /// Swap the sign of the difference motor.
        #[serde(default)]
        inverted: bool,
    },
    /// B = Y + Z, C = Y - Z.
    CoreYz {
        /// Swap the sign of the difference motor.
        #[serde(default)]
        inverted: bool,
    },
    /// A = X + Y, B = Y.
    MarkforgedXy {
        /// A = X - Y instead.
        #[serde(default)]
        inverse: bool,
    },
    /// A = X, B = Y + X.
    MarkforgedYx {
        /// B = Y - X instead.
        #[serde(default)]
        inverse: bool,
    },
    /// Two-link arm, joints in degrees.
    Scara(ScaraGeometry),
}

/// Motor-space result of planning one move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveDelta {
    /// Absolute motor target in steps.
    pub target: PerAxis<i64>,
    /// Signed motor step deltas.
    pub steps: PerAxis<i64>,
    /// Head displacement in the logical frame (X, Y, Z).
    pub head: [f32; 3],
    /// Head-frame move length, excluding E.
    pub length: f32,
}

#[inline]
fn core_sign(inverted: bool) -> f32 {
    if inverted {
        -1.0
    } else {
        1.0
    }
}

impl Kinematics {
    /// Whether two or more motors share logical axes.
    pub fn is_coupled(&self) -> bool {
        !matches!(self, Kinematics::Cartesian)
    }

    /// Map a logical position to motor coordinates.
    pub fn to_motor(&self, p: PerAxis<f32>) -> PerAxis<f32> {
        let (x, y, z, e) = (p[Axis::X], p[Axis::Y], p[Axis::Z], p[Axis::E]);
        let (a, b, c) = match *self {
            Kinematics::Cartesian => (x, y, z),
            Kinematics::CoreXy { inverted } => (x + y, core_sign(inverted) * (x - y), z),
            Kinematics::CoreXz { inverted } => (x + z, y, core_sign(inverted) * (x - z)),
            Kinematics::CoreYz { inverted } => (x, y + z, core_sign(inverted) * (y - z)),
            Kinematics::MarkforgedXy { inverse } => (if inverse { x - y } else { x + y }, y, z),
            Kinematics::MarkforgedYx { inverse } => (x, if inverse { y - x } else { y + x }, z),
            Kinematics::Scara(g) => {
                let (shoulder, elbow) = g.inverse(x, y);
                (shoulder, elbow, z)
            }
        };
        PerAxis([a, b, c, e])
    }

    /// Map motor coordinates back to a logical position.
    pub fn to_logical(&self, m: PerAxis<f32>) -> PerAxis<f32> {
        let (a, b, c, e) = (m[Axis::X], m[Axis::Y], m[Axis::Z], m[Axis::E]);
        let (x, y, z) = match *self {
            Kinematics::Cartesian => (a, b, c),
            Kinematics::CoreXy { inverted } => {
                let s = core_sign(inverted);
                ((a + s * b) * 0.5, (a - s * b) * 0.5, c)
            }
            Kinematics::CoreXz { inverted } => {
                let s = core_sign(inverted);
                ((a + s * c) * 0.5, b, (a - s * c) * 0.5)
            }
            Kinematics::CoreYz { inverted } => {
                let s = core_sign(inverted);
                (a, (b + s * c) * 0.5, (b - s * c) * 0.5)
            }
            Kinematics::MarkforgedXy { inverse } => (if inverse { a + b } else { a - b }, b, c),
            Kinematics::MarkforgedYx { inverse } => (a, if inverse { b + a } else { b - a }, c),
            Kinematics::Scara(g) => {
                let (x, y) = g.forward(a, b);
                (x, y, c)
            }
        };
        PerAxis([x, y, z, e])
    }

    /// Motor position in steps for a logical position.
    pub fn to_motor_steps(&self, logical: PerAxis<f32>, steps_per_unit: &PerAxis<f32>) -> PerAxis<i64> {
        let motor = self.to_motor(logical);
        PerAxis::from_fn(|a| roundf(motor[a] * steps_per_unit[a]) as i64)
    }

    /// Logical position for a motor position in steps.
    pub fn to_logical_mm(&self, motor_steps: &PerAxis<i64>, steps_per_unit: &PerAxis<f32>) -> PerAxis<f32> {
        let motor = PerAxis::from_fn(|a| motor_steps[a] as f32 / steps_per_unit[a]);
        self.to_logical(motor)
    }

    /// Plan a move from `from_mm` (with motor position `from_steps`) to `to_mm`.
    ///
    /// Returns motor step deltas and the head-frame length. Coupled motors
    /// can travel further than the head on diagonals; the length always
    /// measures the head so feedrate applies to the toolpath.
    pub fn plan_move(
        &self,
        from_mm: &PerAxis<f32>,
        to_mm: &PerAxis<f32>,
        from_steps: &PerAxis<i64>,
        steps_per_unit: &PerAxis<f32>,
    ) -> MoveDelta {
        let target = self.to_motor_steps(*to_mm, steps_per_unit);
        let steps = PerAxis::from_fn(|a| target[a] - from_steps[a]);
        let head = [
            to_mm[Axis::X] - from_mm[Axis::X],
            to_mm[Axis::Y] - from_mm[Axis::Y],
            to_mm[Axis::Z] - from_mm[Axis::Z],
        ];
        let length = sqrtf(head[0] * head[0] + head[1] * head[1] + head[2] * head[2]);
        MoveDelta { target, steps, head, length }
    }
}
