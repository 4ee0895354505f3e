//! Cornering speed limits between consecutive blocks.
//!
//! Two models, selected once from configuration:
//!
//! - **Junction deviation**: the corner is replaced by a virtual arc that
//!   deviates at most `deviation` mm from the corner; the speed is the one
//!   at which centripetal acceleration on that arc equals the block
//!   acceleration.
//! - **Jerk**: the per-axis instantaneous velocity change across the
//!   junction is capped at each axis's `max_jerk`.

use core::f32::consts::FRAC_PI_2;

use libm::{fabsf, sqrtf};

use crate::axis::{Axis, PerAxis, NUM_AXES};
use crate::config::CorneringConfig;

/// Cosine above which the path reverses onto itself.
const REVERSAL_COS: f32 = 0.999_999;

/// Junction cosine below which a short segment (a turn under 45°) is
/// treated as part of an arc.
const SMALL_SEGMENT_COS: f32 = -0.707_106_78;

/// Runtime cornering model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cornering {
    /// Junction deviation in mm.
    JunctionDeviation(f32),
    /// Classic per-axis jerk.
    Jerk,
}

impl From<CorneringConfig> for Cornering {
    fn from(config: CorneringConfig) -> Self {
        match config {
            CorneringConfig::JunctionDeviation { deviation } => Cornering::JunctionDeviation(deviation.0),
            CorneringConfig::Jerk => Cornering::Jerk,
        }
    }
}

/// The block being populated, as seen by the cornering models.
#[derive(Debug, Clone, Copy)]
pub struct CornerMove {
    /// Direction of travel over head and E, normalized.
    pub unit_vec: [f32; NUM_AXES],
    /// Signed per-axis speed at nominal feed, mm/s.
    pub current_speed: PerAxis<f32>,
    /// Block length.
    pub millimeters: f32,
    /// Cruise speed.
    pub nominal_speed: f32,
    /// Block acceleration, mm/s².
    pub acceleration: f32,
    /// Numeric floor on speed².
    pub min_planner_speed_sqr: f32,
    /// Known path curvature at the junction.
    pub curve_radius: Option<f32>,
    /// Extra E jerk allowed after a rough advance block (mm/s).
    pub e_jerk_allowance: f32,
}

/// Per-axis limits the models read.
#[derive(Debug, Clone, Copy)]
pub struct CornerLimits<'a> {
    /// Max acceleration per axis, mm/s².
    pub max_acceleration: &'a PerAxis<f32>,
    /// Max jerk per axis, mm/s.
    pub max_jerk: &'a PerAxis<f32>,
    /// Limit short arcs built from many small segments.
    pub handle_small_segments: bool,
}

/// Exit state of the previously planned block.
#[derive(Debug, Clone, Copy, Default)]
pub struct JunctionState {
    /// Unit vector of the previous block.
    pub previous_unit_vec: [f32; NUM_AXES],
    /// Per-axis speed of the previous block at nominal feed.
    pub previous_speed: PerAxis<f32>,
    /// Nominal speed of the previous block; zero forces a stop.
    pub previous_nominal_speed: f32,
    /// Rough advance rate of the previous block.
    pub previous_advance_rate: u32,
    /// E mm per step of the previous block's extruder.
    pub previous_e_mm_per_step: f32,
}

impl JunctionState {
    /// Forget the previous block so the next one starts from rest.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record `mv` as the previous block.
    pub fn update(&mut self, mv: &CornerMove) {
        self.previous_unit_vec = mv.unit_vec;
        self.previous_speed = mv.current_speed;
        self.previous_nominal_speed = mv.nominal_speed;
    }
}

impl Cornering {
    /// Maximum junction speed² between the previous block and `mv`.
    ///
    /// `moves_queued` is false when nothing is waiting ahead of `mv`, in
    /// which case the junction is a start from rest.
    pub fn max_junction_speed_sqr(
        &self,
        state: &JunctionState,
        mv: &CornerMove,
        moves_queued: bool,
        limits: &CornerLimits<'_>,
    ) -> f32 {
        let vmax_sqr = match *self {
            Cornering::JunctionDeviation(deviation) => junction_deviation_sqr(deviation, state, mv, moves_queued, limits),
            Cornering::Jerk => jerk_sqr(state, mv, moves_queued, limits),
        };
        vmax_sqr.max(mv.min_planner_speed_sqr)
    }
}

fn junction_deviation_sqr(
    deviation: f32,
    state: &JunctionState,
    mv: &CornerMove,
    moves_queued: bool,
    limits: &CornerLimits<'_>,
) -> f32 {
    if !moves_queued || state.previous_nominal_speed == 0.0 {
        return mv.min_planner_speed_sqr;
    }

    let prev = &state.previous_unit_vec;
    let unit = &mv.unit_vec;
    let mut cos_theta: f32 = -(0..NUM_AXES).map(|i| prev[i] * unit[i]).sum::<f32>();

    if cos_theta > REVERSAL_COS {
        return mv.min_planner_speed_sqr;
    }

    let junction_vec = normalize(core::array::from_fn(|i| unit[i] - prev[i]));
    let junction_accel = limit_value_by_axis_maximum(mv.acceleration, &junction_vec, limits.max_acceleration);

    let vmax_sqr = match mv.curve_radius {
        Some(radius) if radius > 0.0 => junction_accel * radius,
        _ => {
            cos_theta = cos_theta.max(-REVERSAL_COS);
            let sin_theta_d2 = sqrtf(0.5 * (1.0 - cos_theta));
            let mut v = junction_accel * deviation * sin_theta_d2 / (1.0 - sin_theta_d2);

            if limits.handle_small_segments && mv.millimeters < 1.0 && cos_theta < SMALL_SEGMENT_COS {
                let theta = fast_acos_neg(cos_theta);
                v = v.min(mv.millimeters * junction_accel / theta);
            }
            v
        }
    };

    vmax_sqr
        .min(mv.nominal_speed * mv.nominal_speed)
        .min(state.previous_nominal_speed * state.previous_nominal_speed)
}

/// `acos(-t)` for the junction cosine, within about 0.033 rad.
///
/// Never returns less than about 0.033, so it is safe as a divisor.
pub fn fast_acos_neg(cos_theta: f32) -> f32 {
    let neg = if cos_theta < 0.0 { -1.0 } else { 1.0 };
    let t = neg * cos_theta;
    let asinx = 0.032_843_707
        + t * (-1.451_838_3
            + t * (29.661_54 + t * (-131.112_35 + t * (262.813_05 + t * (-242.719_96 + t * 84.314_66)))));
    FRAC_PI_2 + neg * asinx
}

fn jerk_sqr(state: &JunctionState, mv: &CornerMove, moves_queued: bool, limits: &CornerLimits<'_>) -> f32 {
    let mut max_j = *limits.max_jerk;
    max_j[Axis::E] += mv.e_jerk_allowance;

    let mut speed_diff = mv.current_speed;
    let prev_nominal = state.previous_nominal_speed;
    let vmax = if !moves_queued || fabsf(prev_nominal) < 1e-6 {
        mv.nominal_speed
    } else if mv.nominal_speed < prev_nominal {
        let scale = mv.nominal_speed / prev_nominal;
        for axis in Axis::ALL {
            speed_diff[axis] -= state.previous_speed[axis] * scale;
        }
        mv.nominal_speed
    } else {
        let scale = prev_nominal / mv.nominal_speed;
        for axis in Axis::ALL {
            speed_diff[axis] = speed_diff[axis] * scale - state.previous_speed[axis];
        }
        prev_nominal
    };

    let mut v_factor = 1.0f32;
    for axis in Axis::ALL {
        let jerk = fabsf(speed_diff[axis]);
        if jerk * v_factor > max_j[axis] {
            v_factor = max_j[axis] / jerk;
        }
    }
    let v = vmax * v_factor;
    v * v
}

/// Scale `v` to unit length; the zero vector stays zero.
pub fn normalize(v: [f32; NUM_AXES]) -> [f32; NUM_AXES] {
    let mag_sqr: f32 = v.iter().map(|c| c * c).sum();
    if mag_sqr <= 0.0 {
        return v;
    }
    let inv = 1.0 / sqrtf(mag_sqr);
    v.map(|c| c * inv)
}

/// Largest value along `unit_vec` not exceeding any axis limit.
pub fn limit_value_by_axis_maximum(max_value: f32, unit_vec: &[f32; NUM_AXES], limits: &PerAxis<f32>) -> f32 {
    let mut limit = max_value;
    for axis in Axis::ALL {
        let c = unit_vec[axis.index()];
        if c != 0.0 && limit * fabsf(c) > limits[axis] {
            limit = fabsf(limits[axis] / c);
        }
    }
    limit
}
