//! Unit tests for TOML configuration parsing.

use lookahead_motion::config::{load_config, parse_config, CorneringConfig, LimitPolicy, MachineConfig};
use lookahead_motion::{AdvanceMode, Axis, ConfigError, Error, Kinematics};

const AXES: &str = r#"
[axes.x]
steps_per_unit = 80.0
max_feedrate_mm_s = 300.0
max_acceleration_mm_s2 = 3000.0
max_jerk_mm_s = 10.0

[axes.y]
steps_per_unit = 80.0
max_feedrate_mm_s = 300.0
max_acceleration_mm_s2 = 3000.0
invert_direction = true

[axes.z]
steps_per_unit = 400.0
max_feedrate_mm_s = 5.0
max_acceleration_mm_s2 = 100.0
max_jerk_mm_s = 0.3

[axes.e]
steps_per_unit = 93.0
max_feedrate_mm_s = 25.0
max_acceleration_mm_s2 = 10000.0
max_jerk_mm_s = 5.0
"#;

/// Test parsing the axis tables and their defaults.
#[test]
fn test_parse_axis_config() {
    let config: MachineConfig = toml::from_str(AXES).expect("Failed to parse TOML");

    let x = config.axis(Axis::X).expect("X not found");
    assert_eq!(x.steps_per_unit, 80.0);
    assert_eq!(x.max_feedrate.0, 300.0);
    assert_eq!(x.max_acceleration.0, 3000.0);
    assert_eq!(x.max_jerk.0, 10.0);
    assert!(!x.invert_direction);

    let y = config.axis(Axis::Y).expect("Y not found");
    assert!(y.invert_direction);
    // Jerk defaults when omitted
    assert_eq!(y.max_jerk.0, 10.0);
    assert!(y.edit_limits.is_none());
}

/// Test the defaults of every optional section.
#[test]
fn test_defaults_for_optional_sections() {
    let config = parse_config(AXES).expect("Failed to parse config");

    assert_eq!(config.kinematics, Kinematics::Cartesian);
    assert_eq!(config.planner.acceleration.0, 1000.0);
    assert_eq!(config.planner.travel_acceleration(), 1000.0);
    assert_eq!(
        config.planner.cornering,
        CorneringConfig::JunctionDeviation {
            deviation: lookahead_motion::Millimeters(0.013)
        }
    );
    assert_eq!(config.advance.mode, AdvanceMode::Disabled);
    assert_eq!(config.extruders(), 1);
    assert!(config.shaping.is_empty());
    assert_eq!(config.stepper.multistepping_limit, 16);
    assert_eq!(config.stepper.min_isr_frequency(), config.stepper.max_isr_frequency / 2);
}

/// Test parsing a fully populated machine.
#[test]
fn test_parse_full_config() {
    let toml_str = format!(
        r#"
kinematics = {{ type = "markforged_xy" }}
{}
[axes.x.edit_limits]
max_feedrate_mm_s = 500.0
policy = "reject"

[planner]
acceleration_mm_s2 = 1500.0
travel_acceleration_mm_s2 = 3000.0
retract_acceleration_mm_s2 = 2500.0
min_feedrate_mm_s = 0.5
cornering = {{ model = "junction_deviation", deviation_mm = 0.02 }}
handle_small_segments = false

[advance]
mode = "rough"
k = [0.05, 0.08]

[shaping.x]
frequency_hz = 42.0
damping_ratio = 0.15

[shaping.y]
frequency_hz = 38.5

[stepper]
max_step_isr_frequency_hz = 80000
min_step_isr_frequency_hz = 20000
multistepping_limit = 8
adaptive_step_smoothing = true
"#,
        AXES
    );

    let config = parse_config(&toml_str).expect("Failed to parse config");

    assert_eq!(config.kinematics, Kinematics::MarkforgedXy { inverse: false });
    let limits = config
        .axis(Axis::X)
        .and_then(|x| x.edit_limits.as_ref())
        .expect("edit limits");
    assert_eq!(limits.max_feedrate.map(|v| v.0), Some(500.0));
    assert_eq!(limits.policy, LimitPolicy::Reject);

    assert_eq!(config.planner.travel_acceleration(), 3000.0);
    assert_eq!(config.planner.retract_acceleration(), 2500.0);
    assert!(!config.planner.handle_small_segments);

    assert_eq!(config.advance.mode, AdvanceMode::Rough);
    assert_eq!(config.extruders(), 2);
    assert_eq!(config.advance.k_for(1), 0.08);
    assert_eq!(config.advance.k_for(3), 0.0);

    let x = config.shaping(Axis::X).expect("X shaping");
    assert_eq!(x.frequency_hz, 42.0);
    assert_eq!(x.damping_ratio.value(), 0.15);
    assert_eq!(config.shaping(Axis::Y).expect("Y shaping").damping_ratio.value(), 0.1);
    assert!(config.shaping(Axis::Z).is_none());

    assert_eq!(config.stepper.max_isr_frequency, 80_000);
    assert_eq!(config.stepper.min_isr_frequency(), 20_000);
    assert!(config.stepper.adaptive_step_smoothing);
}

/// Test parsing SCARA geometry.
#[test]
fn test_parse_scara_geometry() {
    let toml_str = format!(
        "kinematics = {{ type = \"scara\", proximal_arm_mm = 150.0, distal_arm_mm = 120.0 }}\n{}",
        AXES
    );
    let config = parse_config(&toml_str).expect("Failed to parse config");
    match config.kinematics {
        Kinematics::Scara(g) => {
            assert_eq!(g.proximal_arm, 150.0);
            assert_eq!(g.distal_arm, 120.0);
        }
        other => panic!("unexpected kinematics {:?}", other),
    }
}

/// Test that malformed TOML surfaces as a parse error.
#[test]
fn test_malformed_toml() {
    let result = parse_config("[axes.x\nsteps_per_unit = 80.0");
    assert!(matches!(result, Err(Error::Config(ConfigError::ParseError(_)))));
}

/// Test that a damping ratio outside [0, 1] fails at parse time.
#[test]
fn test_damping_ratio_out_of_range() {
    let toml_str = format!("{}\n[shaping.x]\nfrequency_hz = 40.0\ndamping_ratio = 1.5\n", AXES);
    let result = parse_config(&toml_str);
    assert!(matches!(result, Err(Error::Config(ConfigError::ParseError(_)))));
}

/// Test loading configuration from a file.
#[test]
fn test_load_config_from_file() {
    let path = std::env::temp_dir().join(format!("lookahead-motion-{}.toml", std::process::id()));
    std::fs::write(&path, AXES).expect("Failed to write config");

    let config = load_config(&path).expect("Failed to load config");
    assert_eq!(config.axis(Axis::Z).map(|z| z.steps_per_unit), Some(400.0));

    std::fs::remove_file(&path).ok();
}

/// Test that a missing file is an I/O error.
#[test]
fn test_load_missing_file() {
    let result = load_config("/nonexistent/machine.toml");
    assert!(matches!(result, Err(Error::Config(ConfigError::IoError(_)))));
}
