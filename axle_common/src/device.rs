//! Per-device tuning tables.
//!
//! Each supported actuator model maps to one `(ControlSettings,
//! ObserverSettings)` pair, tuned for the standard 5 ms control tick. The
//! lookup is pure and is performed once at actuator setup.

use serde::{Deserialize, Serialize};

use crate::settings::{ControlSettings, ObserverSettings};

/// Identifies the actuator model attached to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Small geared motor with integrated encoder.
    SmallMotor,
    /// Medium geared motor, the most common actuator class.
    MediumMotor,
    /// High-torque geared motor.
    LargeMotor,
}

/// Look up the tuning pair for a device model.
///
/// Returns `None` for models without position feedback, which cannot run
/// closed-loop control.
pub fn settings_for(device: DeviceType) -> Option<(ControlSettings, ObserverSettings)> {
    let pair = match device {
        DeviceType::SmallMotor => (
            ControlSettings {
                ctl_steps_per_app_step: 1000,
                stall_speed_limit: 15_000,
                stall_time: 200,
                speed_max: 1_300_000,
                speed_default: 500_000,
                speed_tolerance: 50_000,
                position_tolerance: 10_000,
                acceleration: 4_000_000,
                deceleration: 4_000_000,
                actuation_max: 100_000,
                pid_kp: 8,
                pid_ki: 15_000,
                pid_kd: 20,
                pid_kp_low_pct: 60,
                pid_kp_low_error_threshold: 5_000,
                pid_kp_low_speed_threshold: 30_000,
                integral_deadzone: 3_000,
                integral_change_max: 15_000,
                smart_passive_hold_time: 1_000,
            },
            ObserverSettings {
                phi_01: 50,
                phi_11: 917,
                gam_0: 29_700,
                gam_1: 11_900_000,
                k_0: 10_000,
                k_1: 42,
                k_2: 700,
                f_low: 9_000,
                obs_gain: 40,
            },
        ),
        DeviceType::MediumMotor => (
            ControlSettings {
                ctl_steps_per_app_step: 1000,
                stall_speed_limit: 20_000,
                stall_time: 200,
                speed_max: 1_000_000,
                speed_default: 500_000,
                speed_tolerance: 50_000,
                position_tolerance: 10_000,
                acceleration: 2_000_000,
                deceleration: 2_000_000,
                actuation_max: 300_000,
                pid_kp: 20,
                pid_ki: 40_000,
                pid_kd: 60,
                pid_kp_low_pct: 50,
                pid_kp_low_error_threshold: 5_000,
                pid_kp_low_speed_threshold: 50_000,
                integral_deadzone: 5_000,
                integral_change_max: 20_000,
                smart_passive_hold_time: 1_000,
            },
            ObserverSettings {
                phi_01: 50,
                phi_11: 950,
                gam_0: 4_400,
                gam_1: 1_770_000,
                k_0: 10_000,
                k_1: 280,
                k_2: 2_820,
                f_low: 18_000,
                obs_gain: 150,
            },
        ),
        DeviceType::LargeMotor => (
            ControlSettings {
                ctl_steps_per_app_step: 1000,
                stall_speed_limit: 20_000,
                stall_time: 200,
                speed_max: 800_000,
                speed_default: 400_000,
                speed_tolerance: 50_000,
                position_tolerance: 10_000,
                acceleration: 1_500_000,
                deceleration: 1_500_000,
                actuation_max: 560_000,
                pid_kp: 35,
                pid_ki: 60_000,
                pid_kd: 110,
                pid_kp_low_pct: 45,
                pid_kp_low_error_threshold: 5_000,
                pid_kp_low_speed_threshold: 40_000,
                integral_deadzone: 5_000,
                integral_change_max: 20_000,
                smart_passive_hold_time: 1_000,
            },
            ObserverSettings {
                phi_01: 50,
                phi_11: 967,
                gam_0: 1_270,
                gam_1: 507_000,
                k_0: 10_000,
                k_1: 985,
                k_2: 6_560,
                f_low: 35_000,
                obs_gain: 400,
            },
        ),
    };
    Some(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_models_have_valid_settings() {
        for device in [
            DeviceType::SmallMotor,
            DeviceType::MediumMotor,
            DeviceType::LargeMotor,
        ] {
            let (control, observer) = settings_for(device).unwrap();
            control.validate().unwrap();
            observer.validate().unwrap();
        }
    }

    #[test]
    fn larger_motors_allow_more_torque() {
        let (small, _) = settings_for(DeviceType::SmallMotor).unwrap();
        let (medium, _) = settings_for(DeviceType::MediumMotor).unwrap();
        let (large, _) = settings_for(DeviceType::LargeMotor).unwrap();
        assert!(small.actuation_max < medium.actuation_max);
        assert!(medium.actuation_max < large.actuation_max);
    }

    #[test]
    fn device_type_toml_names() {
        #[derive(serde::Deserialize)]
        struct Probe {
            device: DeviceType,
        }
        let p: Probe = toml::from_str("device = \"medium_motor\"").unwrap();
        assert_eq!(p.device, DeviceType::MediumMotor);
    }
}
