//! Unit tests for configuration validation.

use lookahead_motion::config::{validate_config, MachineConfig};
use lookahead_motion::error::{ConfigError, Error};
use lookahead_motion::Axis;

const AXES: &str = r#"
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
max_feedrate_mm_s = 5.0
max_acceleration_mm_s2 = 100.0

[axes.e]
steps_per_unit = 93.0
max_feedrate_mm_s = 25.0
max_acceleration_mm_s2 = 10000.0
"#;

fn with(extra: &str) -> MachineConfig {
    toml::from_str(&format!("{}\n{}", AXES, extra)).expect("Failed to parse TOML")
}

fn config_error(config: &MachineConfig) -> ConfigError {
    match validate_config(config) {
        Err(Error::Config(e)) => e,
        other => panic!("expected a config error, got {:?}", other),
    }
}

/// Test validation of a valid configuration.
#[test]
fn test_valid_config_passes_validation() {
    let config = with("[planner]\nacceleration_mm_s2 = 1200.0\n");
    assert!(validate_config(&config).is_ok());
}

/// Test validation fails when an axis section is missing.
#[test]
fn test_missing_extruder_axis() {
    let toml_str = AXES.split("[axes.e]").next().unwrap_or_default();
    let config: MachineConfig = toml::from_str(toml_str).expect("Failed to parse TOML");
    assert_eq!(config_error(&config), ConfigError::MissingAxis(Axis::E));
}

/// Test validation fails for an axis name that is not x, y, z or e.
#[test]
fn test_unknown_axis_name() {
    let config = with("[axes.w]\nsteps_per_unit = 10.0\nmax_feedrate_mm_s = 1.0\nmax_acceleration_mm_s2 = 1.0\n");
    assert!(matches!(config_error(&config), ConfigError::UnknownAxis(name) if name.as_str() == "w"));
}

/// Test validation fails for non-positive steps per unit.
#[test]
fn test_invalid_steps_per_unit() {
    let toml_str = AXES.replacen("steps_per_unit = 400.0", "steps_per_unit = 0.0", 1);
    let config: MachineConfig = toml::from_str(&toml_str).expect("Failed to parse TOML");
    assert!(matches!(
        config_error(&config),
        ConfigError::InvalidStepsPerUnit { axis: Axis::Z, .. }
    ));
}

/// Test validation fails for an edit ceiling below the configured value.
#[test]
fn test_edit_ceiling_below_value() {
    let config = with("[axes.x.edit_limits]\nmax_acceleration_mm_s2 = 1000.0\n");
    assert_eq!(config_error(&config), ConfigError::InvalidEditLimits(Axis::X));
}

/// Test validation fails for a non-positive planner acceleration.
#[test]
fn test_invalid_planner_acceleration() {
    let config = with("[planner]\ntravel_acceleration_mm_s2 = -5.0\n");
    assert_eq!(config_error(&config), ConfigError::InvalidAcceleration(-5.0));
}

/// Test validation fails for a zero junction deviation.
#[test]
fn test_invalid_junction_deviation() {
    let config = with("[planner]\ncornering = { model = \"junction_deviation\", deviation_mm = 0.0 }\n");
    assert_eq!(config_error(&config), ConfigError::InvalidJunctionDeviation(0.0));
}

/// Test validation fails for a negative advance factor.
#[test]
fn test_negative_advance_factor() {
    let config = with("[advance]\nmode = \"rough\"\nk = [0.05, -0.1]\n");
    assert_eq!(config_error(&config), ConfigError::InvalidAdvanceFactor(-0.1));
}

/// Test validation fails for a zero smoothing time constant.
#[test]
fn test_zero_advance_tau() {
    let config = with("[advance]\nmode = \"smooth\"\nk = [0.05]\ntau_s = 0.0\n");
    assert_eq!(config_error(&config), ConfigError::InvalidAdvanceTau(0.0));
}

/// Test validation fails for input shaping on the extruder.
#[test]
fn test_shaping_on_extruder() {
    let config = with("[shaping.e]\nfrequency_hz = 40.0\n");
    assert_eq!(config_error(&config), ConfigError::ShapingNotSupported(Axis::E));
}

/// Test validation fails for a negative shaping frequency.
#[test]
fn test_negative_shaping_frequency() {
    let config = with("[shaping.y]\nfrequency_hz = -1.0\n");
    assert!(matches!(
        config_error(&config),
        ConfigError::InvalidShapingFrequency { axis: Axis::Y, .. }
    ));
}

/// Test validation fails for a multistepping limit that is not a power of two.
#[test]
fn test_invalid_multistepping_limit() {
    let config = with("[stepper]\nmultistepping_limit = 3\n");
    assert_eq!(config_error(&config), ConfigError::InvalidMultistepping(3));
}

/// Test validation fails when the minimum ISR frequency exceeds the maximum.
#[test]
fn test_inverted_isr_frequencies() {
    let config = with("[stepper]\nmax_step_isr_frequency_hz = 10000\nmin_step_isr_frequency_hz = 20000\n");
    assert_eq!(
        config_error(&config),
        ConfigError::InvalidIsrFrequency { min: 20_000, max: 10_000 }
    );
}

/// Test validation fails for SCARA arms of zero length.
#[test]
fn test_invalid_scara_arms() {
    let toml_str = format!(
        "kinematics = {{ type = \"scara\", proximal_arm_mm = 0.0, distal_arm_mm = 100.0 }}\n{}",
        AXES
    );
    let config: MachineConfig = toml::from_str(&toml_str).expect("Failed to parse TOML");
    assert!(matches!(config_error(&config), ConfigError::InvalidArmGeometry { .. }));
}
