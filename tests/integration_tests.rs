//! Integration tests for lookahead-motion.
//!
//! These tests drive the planner and the step engine together from TOML
//! configuration, the way firmware would.

mod unit;

use libm::sqrtf;
use lookahead_motion::planner::{calculate_trapezoid, CLEANING_TICKS};
use lookahead_motion::{
    parse_config, AdvanceMode, Axis, Block, Direction, MachineConfig, MotionQueue, MotionSystem, MoveHints, PerAxis,
    Planner, PlannerError, SimulatedTimer, StepCounter, StepOutput, NUM_AXES,
};
use proptest::prelude::*;

// =============================================================================
// Test configuration data
// =============================================================================

const PRINTER_CONFIG: &str = r#"
[axes.x]
steps_per_unit = 80.0
max_feedrate_mm_s = 300.0
max_acceleration_mm_s2 = 3000.0

[axes.y]
steps_per_unit = 80.0
max_feedrate_mm_s = 300.0
max_acceleration_mm_s2 = 3000.0

[axes.z]
steps_per_unit = 400.0
max_feedrate_mm_s = 10.0
max_acceleration_mm_s2 = 100.0
max_jerk_mm_s = 0.3

[axes.e]
steps_per_unit = 93.0
max_feedrate_mm_s = 60.0
max_acceleration_mm_s2 = 5000.0
max_jerk_mm_s = 5.0

[planner]
acceleration_mm_s2 = 500.0
"#;

const JERK_CONFIG: &str = r#"
[axes.x]
steps_per_unit = 80.0
max_feedrate_mm_s = 300.0
max_acceleration_mm_s2 = 3000.0
max_jerk_mm_s = 10.0

[axes.y]
steps_per_unit = 80.0
max_feedrate_mm_s = 300.0
max_acceleration_mm_s2 = 3000.0
max_jerk_mm_s = 10.0

[axes.z]
steps_per_unit = 400.0
max_feedrate_mm_s = 10.0
max_acceleration_mm_s2 = 100.0

[axes.e]
steps_per_unit = 93.0
max_feedrate_mm_s = 60.0
max_acceleration_mm_s2 = 5000.0

[planner]
acceleration_mm_s2 = 500.0
cornering = { model = "jerk" }
"#;

fn printer_config() -> MachineConfig {
    parse_config(PRINTER_CONFIG).expect("printer config is valid")
}

fn planner<'q>(config: &MachineConfig, queue: &'q MotionQueue) -> Planner<'q> {
    Planner::from_config(config, queue).expect("planner from valid config")
}

fn xy(x: f32, y: f32) -> PerAxis<f32> {
    PerAxis([x, y, 0.0, 0.0])
}

fn queued_moves(planner: &Planner<'_>) -> Vec<Block> {
    (0..planner.queued_blocks())
        .filter_map(|i| planner.queue().peek(i))
        .filter(Block::is_move)
        .collect()
}

fn tolerance(a: f32, b: f32) -> f32 {
    1e-3 * (1.0 + a.abs().max(b.abs()))
}

/// Exit speed² the planner allowed the newest block when it was queued.
fn safe_exit_sqr(block: &Block) -> f32 {
    (0.5 * block.acceleration / block.steps_per_mm).min(block.nominal_speed * block.nominal_speed)
}

// =============================================================================
// Trapezoid shape
// =============================================================================

#[test]
fn long_move_is_symmetric_trapezoid_with_cruise() {
    let config = printer_config();
    let queue = MotionQueue::new();
    let mut planner = planner(&config, &queue);

    // 100 mm at 50 mm/s with 500 mm/s²
    assert!(planner.enqueue(xy(100.0, 0.0), 50.0, 0, &MoveHints::default()));
    let block = planner.get_future_block(0).expect("block planned");

    assert_eq!(block.step_event_count, 8000);
    assert_eq!(block.nominal_rate, 4000);
    assert_eq!(block.acceleration_steps_per_s2, 40_000);
    assert!((block.nominal_speed - 50.0).abs() < 1e-3);

    let accel_steps = block.accelerate_before;
    let decel_steps = block.step_event_count - block.decelerate_start;
    assert_eq!(accel_steps, decel_steps);
    assert!(block.decelerate_start > block.accelerate_before);
    assert_eq!(block.cruise_rate, block.nominal_rate);
    assert!(block.cruise_time > 0);
    assert_eq!(block.initial_rate, block.final_rate);
}

#[test]
fn short_move_degrades_to_triangle() {
    let config = printer_config();
    let queue = MotionQueue::new();
    let mut planner = planner(&config, &queue);

    assert!(planner.enqueue(xy(2.0, 0.0), 200.0, 0, &MoveHints::default()));
    let block = planner.get_future_block(0).expect("block planned");

    assert_eq!(block.accelerate_before, block.decelerate_start);
    assert!(block.cruise_rate < block.nominal_rate);
    assert_eq!(block.cruise_time, 0);
}

// =============================================================================
// Junction speeds
// =============================================================================

#[test]
fn collinear_moves_join_at_nominal_speed() {
    let config = printer_config();
    let queue = MotionQueue::new();
    let mut planner = planner(&config, &queue);

    assert!(planner.enqueue(xy(50.0, 0.0), 50.0, 0, &MoveHints::default()));
    assert!(planner.enqueue(xy(100.0, 0.0), 50.0, 0, &MoveHints::default()));

    let second = planner.get_future_block(1).expect("second block planned");
    assert!((sqrtf(second.entry_speed_sqr) - second.nominal_speed).abs() < 1e-3);

    // The first block leaves at the junction speed
    let first = planner.get_future_block(0).expect("first block planned");
    assert_eq!(first.decelerate_start, first.step_event_count);
}

#[test]
fn right_angle_corner_uses_junction_deviation() {
    let config = printer_config();
    let queue = MotionQueue::new();
    let mut planner = planner(&config, &queue);

    assert!(planner.enqueue(xy(20.0, 0.0), 50.0, 0, &MoveHints::default()));
    assert!(planner.enqueue(xy(20.0, 20.0), 50.0, 0, &MoveHints::default()));

    let corner = planner.get_future_block(1).expect("corner block planned");
    let s = sqrtf(0.5);
    let expected = 500.0 * 0.013 * s / (1.0 - s);

    assert!((corner.max_entry_speed_sqr - expected).abs() < 1e-2 * expected);
    assert!((corner.entry_speed_sqr - expected).abs() < 1e-2 * expected);
    assert!(sqrtf(corner.entry_speed_sqr) < 50.0);
}

#[test]
fn right_angle_corner_with_jerk_model() {
    let config = parse_config(JERK_CONFIG).expect("jerk config is valid");
    let queue = MotionQueue::new();
    let mut planner = planner(&config, &queue);

    assert!(planner.enqueue(xy(20.0, 0.0), 50.0, 0, &MoveHints::default()));
    assert!(planner.enqueue(xy(20.0, 20.0), 50.0, 0, &MoveHints::default()));

    let corner = planner.get_future_block(1).expect("corner block planned");
    assert!(corner.entry_speed_sqr >= corner.min_entry_speed_sqr);
    assert!(sqrtf(corner.entry_speed_sqr) < 50.0);
    assert!(corner.entry_speed_sqr <= corner.max_entry_speed_sqr + 1e-3);
}

#[test]
fn reversal_stops_at_the_junction() {
    let config = printer_config();
    let queue = MotionQueue::new();
    let mut planner = planner(&config, &queue);

    assert!(planner.enqueue(xy(20.0, 0.0), 50.0, 0, &MoveHints::default()));
    assert!(planner.enqueue(xy(0.0, 0.0), 50.0, 0, &MoveHints::default()));

    // Only the minimum planner speed: half a step's worth of acceleration
    let back = planner.get_future_block(1).expect("return block planned");
    assert!((back.entry_speed_sqr - 0.5 * 500.0 / 80.0).abs() < 1e-4);
}

// =============================================================================
// Quick stop
// =============================================================================

#[test]
fn quick_stop_empties_queue_and_refuses_moves_while_cleaning() {
    let config = printer_config();
    let queue = MotionQueue::new();
    let mut system: MotionSystem<'_, SimulatedTimer, StepCounter> =
        MotionSystem::from_config(&config, &queue, SimulatedTimer::new(), StepCounter::new()).expect("system");

    for x in [20.0, 40.0, 60.0, 80.0, 100.0] {
        assert!(system.enqueue(xy(x, 0.0), 50.0, 0));
    }

    // Let the engine claim the first block
    let mut guard = 0;
    while !system.stepper().is_executing() {
        system.isr();
        guard += 1;
        assert!(guard < 10_000, "engine never claimed a block");
    }
    assert_eq!(system.planner().queue().nonbusy_len(), 4);

    system.quick_stop();
    assert_eq!(queue.head(), queue.tail());
    assert_eq!(queue.len(), 0);

    assert!(!system.enqueue(xy(0.0, 0.0), 50.0, 0));
    for _ in 0..CLEANING_TICKS - 1 {
        system.housekeeping_tick();
    }
    assert!(!system.enqueue(xy(0.0, 0.0), 50.0, 0));
    system.housekeeping_tick();
    assert_eq!(system.planner().cleaning(), 0);

    system.resync_position();
    assert!(system.enqueue(xy(0.0, 0.0), 50.0, 0));
    system.synchronize();
    assert_eq!(system.output().position()[Axis::X], 0);
}

// =============================================================================
// End-to-end execution
// =============================================================================

#[test]
fn square_path_on_corexy_returns_home() {
    let toml = format!("kinematics = {{ type = \"core_xy\" }}\n{}", PRINTER_CONFIG);
    let config = parse_config(&toml).expect("corexy config is valid");
    let queue = MotionQueue::new();
    let mut system: MotionSystem<'_, SimulatedTimer, StepCounter> =
        MotionSystem::from_config(&config, &queue, SimulatedTimer::new(), StepCounter::new()).expect("system");

    for (x, y) in [(10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)] {
        assert!(system.enqueue(xy(x, y), 40.0, 0));
    }
    system.synchronize();

    assert_eq!(system.output().position(), PerAxis([0, 0, 0, 0]));
    // Every side moves both belts
    assert!(system.output().pulses()[Axis::X] >= 3200);
    assert!(system.output().pulses()[Axis::Y] >= 3200);
}

fn run_advance(mode: &str) -> (i64, i64, i64, u64) {
    let toml = format!("{}\n[advance]\nmode = \"{}\"\nk = [0.05]\n", PRINTER_CONFIG, mode);
    let config = parse_config(&toml).expect("advance config is valid");
    let queue = MotionQueue::new();
    let mut system: MotionSystem<'_, SimulatedTimer, StepCounter> =
        MotionSystem::from_config(&config, &queue, SimulatedTimer::new(), StepCounter::new()).expect("system");

    let mut e = 0.0;
    for (x, y) in [(40.0, 0.0), (40.0, 40.0), (0.0, 40.0), (0.0, 0.0)] {
        e += 2.0;
        assert!(system.enqueue(PerAxis([x, y, 0.0, e]), 40.0, 0));
    }
    system.synchronize();
    // Let the extruder settle
    for _ in 0..4000 {
        system.isr();
    }

    let engine_e = system.telemetry().position[Axis::E];
    let output = system.output();
    (
        output.position()[Axis::E],
        engine_e,
        (e * 93.0) as i64,
        output.pulses()[Axis::E],
    )
}

#[test]
fn rough_advance_extrudes_the_planned_filament() {
    let (emitted, engine, target, pulses) = run_advance("rough");
    assert_eq!(emitted, engine);
    assert!(pulses > 0);
    assert!((emitted - target).abs() <= target / 4, "E at {} for {}", emitted, target);
}

#[test]
fn smooth_advance_extrudes_the_planned_filament() {
    let (emitted, engine, target, pulses) = run_advance("smooth");
    assert_eq!(emitted, engine);
    assert!(pulses > 0);
    assert!((emitted - target).abs() <= target / 4, "E at {} for {}", emitted, target);
}

#[test]
fn disabled_advance_is_exact() {
    let (emitted, engine, target, _) = run_advance("disabled");
    assert_eq!(emitted, engine);
    assert_eq!(emitted, target);
}

#[test]
fn input_shaping_keeps_positions() {
    let toml = format!(
        "{}\n[shaping.x]\nfrequency_hz = 40.0\ndamping_ratio = 0.1\n\n[shaping.y]\nfrequency_hz = 35.0\n",
        PRINTER_CONFIG
    );
    let config = parse_config(&toml).expect("shaping config is valid");
    let queue = MotionQueue::new();
    let mut system: MotionSystem<'_, SimulatedTimer, StepCounter> =
        MotionSystem::from_config(&config, &queue, SimulatedTimer::new(), StepCounter::new()).expect("system");

    for (x, y) in [(15.0, 5.0), (30.0, 0.0), (15.0, -5.0), (0.0, 0.0)] {
        assert!(system.enqueue(xy(x, y), 60.0, 0));
    }
    system.synchronize();

    assert!(!system.stepper().input_shaping_busy());
    assert_eq!(system.output().position(), PerAxis([0, 0, 0, 0]));
    assert_eq!(system.telemetry().position, PerAxis([0, 0, 0, 0]));
}

// =============================================================================
// Runtime limit edits
// =============================================================================

#[test]
fn edit_limits_reject_and_clamp() {
    let toml = PRINTER_CONFIG.replace(
        "[axes.y]",
        "[axes.x.edit_limits]\nmax_feedrate_mm_s = 400.0\npolicy = \"reject\"\n\n[axes.y]",
    );
    let config = parse_config(&toml).expect("edit limit config is valid");
    let queue = MotionQueue::new();
    let mut planner = planner(&config, &queue);

    assert!(planner.set_max_feedrate(Axis::X, 350.0).is_ok());
    assert!(matches!(
        planner.set_max_feedrate(Axis::X, 500.0),
        Err(PlannerError::LimitExceeded { axis: Axis::X, .. })
    ));

    // Y clamps to twice its configured value
    assert!(planner.set_max_feedrate(Axis::Y, 1000.0).is_ok());
    assert!((planner.constraints().max_feedrate[Axis::Y] - 600.0).abs() < 1e-3);
}

#[test]
fn advance_mode_from_config() {
    let toml = format!("{}\n[advance]\nmode = \"smooth\"\nk = [0.04, 0.06]\n", PRINTER_CONFIG);
    let config = parse_config(&toml).expect("advance config is valid");
    assert_eq!(config.advance.mode, AdvanceMode::Smooth);

    let queue = MotionQueue::new();
    let mut planner = planner(&config, &queue);
    assert_eq!(planner.advance().extruders(), 2);
    assert!(planner.enqueue(PerAxis([10.0, 0.0, 0.0, 1.0]), 30.0, 1, &MoveHints::default()));
    assert!(!planner.enqueue(PerAxis([20.0, 0.0, 0.0, 2.0]), 30.0, 2, &MoveHints::default()));
}

// =============================================================================
// Planner properties
// =============================================================================

fn plan_path<'q>(moves: &[(f32, f32, f32)], queue: &'q MotionQueue) -> Planner<'q> {
    let config = printer_config();
    let mut planner = planner(&config, queue);
    let (mut x, mut y) = (0.0f32, 0.0f32);
    for &(dx, dy, feedrate) in moves {
        x += dx;
        y += dy;
        assert!(planner.enqueue(xy(x, y), feedrate, 0, &MoveHints::default()));
    }
    planner
}

fn path_strategy() -> impl Strategy<Value = Vec<(f32, f32, f32)>> {
    prop::collection::vec((-40.0f32..40.0, -40.0f32..40.0, 10.0f32..150.0), 1..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The oldest block enters at its minimum. Every later block enters at
    /// the lower of its junction limit and the speed it can still shed
    /// before the next entry (or the safe exit), and can be reached from
    /// the previous one.
    #[test]
    fn recompute_leaves_feasible_entries(moves in path_strategy()) {
        let queue = MotionQueue::new();
        let planner = plan_path(&moves, &queue);
        let blocks = queued_moves(&planner);
        prop_assume!(!blocks.is_empty());

        prop_assert_eq!(blocks[0].entry_speed_sqr, blocks[0].min_entry_speed_sqr);

        let safe_exit = safe_exit_sqr(&blocks[blocks.len() - 1]);
        for (i, block) in blocks.iter().enumerate() {
            prop_assert!(!block.flags.recalculate);

            let limit = block.max_entry_speed_sqr.max(block.min_entry_speed_sqr);
            prop_assert!(block.entry_speed_sqr <= limit + tolerance(limit, 0.0));

            let next_entry = blocks.get(i + 1).map_or(safe_exit, |n| n.entry_speed_sqr);
            let reachable = next_entry + 2.0 * block.acceleration * block.millimeters;
            if i > 0 {
                let expected = block.max_entry_speed_sqr.min(reachable);
                prop_assert!(
                    (block.entry_speed_sqr - expected).abs() <= tolerance(block.entry_speed_sqr, expected),
                    "block {} enters at {}, expected {}", i, block.entry_speed_sqr, expected
                );
            } else {
                prop_assert!(block.entry_speed_sqr <= reachable + tolerance(block.entry_speed_sqr, reachable));
            }

            if let Some(next) = blocks.get(i + 1) {
                let forward = block.entry_speed_sqr + 2.0 * block.acceleration * block.millimeters;
                prop_assert!(next.entry_speed_sqr <= forward + tolerance(next.entry_speed_sqr, forward));
            }

            // The trapezoid starts at the planned entry
            let entry_rate = (sqrtf(block.entry_speed_sqr) * block.steps_per_mm).round().max(1.0);
            prop_assert!((block.initial_rate as f32 - entry_rate).abs() <= 1.0);
        }
    }

    #[test]
    fn recompute_is_idempotent(moves in path_strategy()) {
        let queue = MotionQueue::new();
        let mut planner = plan_path(&moves, &queue);
        let before = queued_moves(&planner);
        prop_assume!(!before.is_empty());

        let safe_exit = safe_exit_sqr(&before[before.len() - 1]);
        planner.recompute(safe_exit);
        let once = queued_moves(&planner);
        planner.recompute(safe_exit);
        let twice = queued_moves(&planner);

        prop_assert_eq!(&before, &once);
        prop_assert_eq!(&once, &twice);
    }

    /// The profile starts at the entry rate and ends within one step's worth
    /// of acceleration of the exit rate.
    #[test]
    fn trapezoid_reproduces_entry_and_exit(
        length in 5.0f32..100.0,
        angle in 0.0f32..6.28,
        feedrate in 10.0f32..150.0,
        entry_frac in 0.0f32..1.0,
        exit_frac in 0.0f32..1.0,
    ) {
        let config = printer_config();
        let queue = MotionQueue::new();
        let mut planner = planner(&config, &queue);
        let target = xy(length * libm::cosf(angle), length * libm::sinf(angle));
        prop_assert!(planner.enqueue(target, feedrate, 0, &MoveHints::default()));
        let mut block = queue.peek(0).expect("block queued");

        let nominal = block.nominal_speed;
        let span = 0.9 * 2.0 * block.acceleration * block.millimeters;
        let mut entry = 1.0 + (nominal - 1.0).max(0.0) * entry_frac;
        let exit = (1.0 + (nominal - 1.0).max(0.0) * exit_frac).min(sqrtf(entry * entry + span));
        entry = entry.min(sqrtf(exit * exit + span));

        calculate_trapezoid(&mut block, entry, exit);

        let spmm = block.steps_per_mm;
        let one_step = sqrtf(2.0 * block.acceleration_steps_per_s2 as f32) + 2.0;
        let start = block.rate_at_step(0);
        let end = block.rate_at_step(block.step_event_count - 1);

        prop_assert!((start - entry * spmm).abs() <= 2.0 + 0.01 * entry * spmm,
            "starts at {} for entry {}", start, entry * spmm);
        prop_assert!((end - exit * spmm).abs() <= one_step + 0.01 * exit * spmm,
            "ends at {} for exit {}", end, exit * spmm);
        prop_assert!(block.accelerate_before <= block.decelerate_start);
        prop_assert!(block.decelerate_start <= block.step_event_count);
    }

    /// Minor axis pulses never stray more than one step from the line.
    #[test]
    fn bresenham_stays_on_the_line(dx in 6i64..400, minor in 0.0f64..=1.0) {
        let dy = ((dx as f64) * minor).round() as i64;
        let config = printer_config();
        let queue = MotionQueue::new();
        let mut system: MotionSystem<'_, SimulatedTimer, LineRecorder> =
            MotionSystem::from_config(&config, &queue, SimulatedTimer::new(), LineRecorder::new(dx, dy)).expect("system");

        prop_assert!(system.enqueue(xy(dx as f32 / 80.0, dy as f32 / 80.0), 20.0, 0));
        system.synchronize();

        let recorder = system.output();
        prop_assert_eq!((recorder.x, recorder.y), (dx, dy));
        prop_assert!(recorder.worst <= dx, "deviation {} over {} events", recorder.worst, dx);
    }
}

/// Records the worst cross-track error of an XY move, in `dx` units.
struct LineRecorder {
    direction: PerAxis<Direction>,
    x: i64,
    y: i64,
    dx: i64,
    dy: i64,
    worst: i64,
}

impl LineRecorder {
    fn new(dx: i64, dy: i64) -> Self {
        Self {
            direction: PerAxis([Direction::Positive; NUM_AXES]),
            x: 0,
            y: 0,
            dx,
            dy,
            worst: 0,
        }
    }
}

impl StepOutput for LineRecorder {
    fn set_direction(&mut self, axis: Axis, direction: Direction) {
        self.direction[axis] = direction;
    }

    fn pulse(&mut self, axis: Axis) {
        match axis {
            Axis::X => {
                let deviation = (self.y * self.dx - self.x * self.dy).abs();
                self.worst = self.worst.max(deviation);
                self.x += self.direction[axis].sign();
            }
            Axis::Y => self.y += self.direction[axis].sign(),
            _ => {}
        }
    }
}
