//! TOML configuration loading with validation.
//!
//! Loads a simulation/bench scenario: the control tick period, the set of
//! motors (model, port, optional tuning overrides) and the motion command
//! each motor executes. Parsing and semantic validation are separate steps
//! so a config that parses but makes no physical sense is still rejected.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::actuation::StopAction;
use crate::device::{DeviceType, settings_for};
use crate::settings::{ControlSettings, ObserverSettings};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(String),

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Top-level scenario configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    /// Control tick period [ms].
    pub tick_ms: u32,
    /// Total simulated run time [ms].
    pub run_time_ms: u32,
    /// Motors participating in the scenario.
    pub motors: Vec<MotorConfig>,
}

/// One motor in the scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct MotorConfig {
    /// Port label, unique within the scenario.
    pub port: String,
    /// Actuator model; selects the built-in tuning pair.
    pub device: DeviceType,
    /// Optional tuning overrides applied on top of the built-in pair.
    #[serde(default)]
    pub overrides: Option<SettingsOverrides>,
    /// Constant external load torque opposing forward motion [µNm].
    #[serde(default)]
    pub load_torque: Option<i32>,
    /// Hard mechanical end stop [deg], for stall scenarios.
    #[serde(default)]
    pub end_stop_deg: Option<i32>,
    /// The motion command this motor executes.
    pub command: CommandConfig,
}

/// Sparse overrides for the built-in control settings.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SettingsOverrides {
    pub speed_max: Option<i32>,
    pub acceleration: Option<i32>,
    pub deceleration: Option<i32>,
    pub actuation_max: Option<i32>,
    pub position_tolerance: Option<i32>,
    pub speed_tolerance: Option<i32>,
    pub stall_speed_limit: Option<i32>,
    pub stall_time: Option<u32>,
}

/// Motion command issued to a motor at scenario start.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommandConfig {
    /// Run at a constant speed until the scenario ends.
    Run {
        /// Target speed [mdeg/s].
        speed: i32,
    },
    /// Run at a speed for a fixed duration.
    RunForDuration {
        /// Target speed [mdeg/s].
        speed: i32,
        /// Duration [ms].
        duration_ms: i32,
        /// What to do on completion.
        #[serde(default)]
        then: StopAction,
    },
    /// Run at a speed until the motor stalls.
    RunUntilStalled {
        /// Target speed [mdeg/s].
        speed: i32,
        /// What to do on completion.
        #[serde(default)]
        then: StopAction,
    },
    /// Rotate to an absolute target angle.
    RunToTarget {
        /// Target angle [deg].
        target_deg: i32,
        /// Target speed [mdeg/s]; the device default when omitted.
        speed: Option<i32>,
        /// What to do on completion.
        #[serde(default)]
        then: StopAction,
    },
}

impl ScenarioConfig {
    /// Load and validate a scenario from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = %path.display(), "loading scenario configuration");
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    /// Parse and validate a scenario from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: ScenarioConfig =
            toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Run all semantic validation rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.tick_ms) {
            return Err(ConfigError::Validation(format!(
                "tick_ms must be in 1..=100, got {}",
                self.tick_ms
            )));
        }
        if self.run_time_ms == 0 {
            return Err(ConfigError::Validation("run_time_ms must be positive".into()));
        }
        if self.motors.is_empty() {
            return Err(ConfigError::Validation("at least one motor is required".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for motor in &self.motors {
            if !seen.insert(motor.port.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate motor port '{}'",
                    motor.port
                )));
            }
            // Resolve the tuning pair now so a bad override is caught here,
            // not mid-run.
            motor.resolve_settings().map_err(|e| {
                ConfigError::Validation(format!("motor '{}': {e}", motor.port))
            })?;
        }
        Ok(())
    }
}

impl MotorConfig {
    /// Resolve the built-in tuning pair with overrides applied.
    pub fn resolve_settings(&self) -> Result<(ControlSettings, ObserverSettings), String> {
        let (mut control, observer) = settings_for(self.device)
            .ok_or_else(|| "device has no closed-loop tuning".to_string())?;
        if let Some(ov) = &self.overrides {
            control.set_limits(
                ov.speed_max.unwrap_or(control.speed_max),
                ov.acceleration.unwrap_or(control.acceleration),
                ov.deceleration.unwrap_or(control.deceleration),
                ov.actuation_max.unwrap_or(control.actuation_max),
            )
            .map_err(|e| e.to_string())?;
            control
                .set_target_tolerances(
                    ov.speed_tolerance.unwrap_or(control.speed_tolerance),
                    ov.position_tolerance.unwrap_or(control.position_tolerance),
                )
                .map_err(|e| e.to_string())?;
            control
                .set_stall_tolerances(
                    ov.stall_speed_limit.unwrap_or(control.stall_speed_limit),
                    ov.stall_time.unwrap_or(control.stall_time),
                )
                .map_err(|e| e.to_string())?;
        }
        Ok((control, observer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        tick_ms = 5
        run_time_ms = 2000

        [[motors]]
        port = "A"
        device = "medium_motor"
        command = { action = "run_for_duration", speed = 500000, duration_ms = 1000, then = "brake" }
    "#;

    #[test]
    fn minimal_scenario_parses() {
        let config = ScenarioConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.tick_ms, 5);
        assert_eq!(config.motors.len(), 1);
        assert!(matches!(
            config.motors[0].command,
            CommandConfig::RunForDuration {
                speed: 500_000,
                duration_ms: 1000,
                then: StopAction::Brake,
            }
        ));
    }

    #[test]
    fn rejects_zero_tick() {
        let raw = MINIMAL.replace("tick_ms = 5", "tick_ms = 0");
        assert!(matches!(
            ScenarioConfig::from_toml(&raw),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_duplicate_ports() {
        let raw = format!(
            "{MINIMAL}\n[[motors]]\nport = \"A\"\ndevice = \"small_motor\"\ncommand = {{ action = \"run\", speed = 100000 }}\n"
        );
        let err = ScenarioConfig::from_toml(&raw).unwrap_err();
        assert!(format!("{err}").contains("duplicate"));
    }

    #[test]
    fn rejects_invalid_override() {
        let raw = format!(
            "{}\n[motors.overrides]\nacceleration = 0\n",
            MINIMAL.trim_end()
        );
        // Overrides attached to the last [[motors]] entry.
        let err = ScenarioConfig::from_toml(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn plant_side_fields_parse() {
        let raw = format!(
            "{}\nload_torque = 40000\nend_stop_deg = 90\n",
            MINIMAL.trim_end()
        );
        let config = ScenarioConfig::from_toml(&raw).unwrap();
        assert_eq!(config.motors[0].load_torque, Some(40_000));
        assert_eq!(config.motors[0].end_stop_deg, Some(90));
    }

    #[test]
    fn applies_overrides() {
        let raw = format!(
            "{}\n[motors.overrides]\nspeed_max = 750000\nstall_time = 150\n",
            MINIMAL.trim_end()
        );
        let config = ScenarioConfig::from_toml(&raw).unwrap();
        let (control, _) = config.motors[0].resolve_settings().unwrap();
        assert_eq!(control.speed_max, 750_000);
        assert_eq!(control.stall_time, 150);
    }

    #[test]
    fn load_round_trips_through_a_real_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = ScenarioConfig::load(file.path()).unwrap();
        assert_eq!(config.run_time_ms, 2000);
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = ScenarioConfig::load(Path::new("/nonexistent/scenario.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
