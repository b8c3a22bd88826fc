//! Validated, unit-scaled tuning parameters per actuator class.
//!
//! All values are expressed in control units: millidegrees for positions,
//! mdeg/s for speeds, mdeg/s² for accelerations, µNm for actuation, and
//! milliseconds for time. Settings are chosen once at actuator setup and
//! read every tick; the control loop never mutates them.

use serde::{Deserialize, Serialize};

use crate::error::MotionError;

/// Upper bound on any configurable speed [mdeg/s]. Together with the
/// acceleration bounds this keeps every closed-form profile integral
/// within `i64` intermediates.
pub const SPEED_LIMIT_MAX: i32 = 2_000_000;
/// Lowest accepted acceleration [mdeg/s²].
pub const ACCELERATION_MIN: i32 = 100;
/// Highest accepted acceleration [mdeg/s²].
pub const ACCELERATION_MAX: i32 = 20_000_000;

/// Control-loop tuning parameters for one actuator class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Millidegree control steps per application step (e.g. 1000 for an
    /// application working in whole degrees on a 1:1 output).
    pub ctl_steps_per_app_step: i32,
    /// If this speed [mdeg/s] cannot be reached even at `actuation_max`,
    /// the controller is considered stalled.
    pub stall_speed_limit: i32,
    /// Minimum consecutive time [ms] below the stall speed before the stall
    /// flags may be raised.
    pub stall_time: u32,
    /// Upper bound applied to user speed input [mdeg/s].
    pub speed_max: i32,
    /// Speed used for calls without a speed argument [mdeg/s].
    pub speed_default: i32,
    /// Allowed speed deviation for the controller to be on target [mdeg/s].
    pub speed_tolerance: i32,
    /// Allowed position deviation for the controller to be on target [mdeg].
    pub position_tolerance: i32,
    /// Speed ramp-up rate [mdeg/s²].
    pub acceleration: i32,
    /// Speed ramp-down rate [mdeg/s²].
    pub deceleration: i32,
    /// Maximum feedback actuation [µNm].
    pub actuation_max: i32,
    /// Position error feedback constant [µNm/mdeg].
    pub pid_kp: i32,
    /// Accumulated position error feedback constant [µNm/(mdeg·s)].
    pub pid_ki: i32,
    /// Speed error feedback constant [µNm/(mdeg/ms)].
    pub pid_kd: i32,
    /// Percentage of `pid_kp` applied inside the low-speed band.
    pub pid_kp_low_pct: i32,
    /// Position error [mdeg] below which the reduced gain band applies.
    pub pid_kp_low_error_threshold: i32,
    /// Reference speed [mdeg/s] below which the reduced gain band applies.
    pub pid_kp_low_speed_threshold: i32,
    /// Position error [mdeg] treated as zero by the integrator.
    pub integral_deadzone: i32,
    /// Bound on the integrator's accumulation rate [mdeg per tick].
    pub integral_change_max: i32,
    /// How long a passive brake is held after a stop before releasing to
    /// coast [ms]. Zero keeps the brake applied indefinitely.
    pub smart_passive_hold_time: u32,
}

impl ControlSettings {
    /// Check every parameter for physical validity.
    ///
    /// Limits and gains must be non-negative; kinematic limits and the
    /// application scale must be strictly positive.
    pub fn validate(&self) -> Result<(), MotionError> {
        if self.ctl_steps_per_app_step < 1 {
            return Err(MotionError::InvalidArgument("application scale must be positive"));
        }
        if self.speed_max < 1 || self.speed_max > SPEED_LIMIT_MAX || self.speed_default < 1 {
            return Err(MotionError::InvalidArgument("speed limits out of range"));
        }
        if self.speed_default > self.speed_max {
            return Err(MotionError::InvalidArgument("default speed exceeds speed limit"));
        }
        if !(ACCELERATION_MIN..=ACCELERATION_MAX).contains(&self.acceleration)
            || !(ACCELERATION_MIN..=ACCELERATION_MAX).contains(&self.deceleration)
        {
            return Err(MotionError::InvalidArgument("acceleration limits out of range"));
        }
        if self.actuation_max < 1 {
            return Err(MotionError::InvalidArgument("actuation limit must be positive"));
        }
        if self.pid_kp < 0 || self.pid_ki < 0 || self.pid_kd < 0 {
            return Err(MotionError::InvalidArgument("pid gains must not be negative"));
        }
        if !(0..=100).contains(&self.pid_kp_low_pct) {
            return Err(MotionError::InvalidArgument("low-speed gain percentage out of range"));
        }
        if self.pid_kp_low_error_threshold < 0 || self.pid_kp_low_speed_threshold < 0 {
            return Err(MotionError::InvalidArgument("low-speed band thresholds must not be negative"));
        }
        if self.stall_speed_limit < 0 {
            return Err(MotionError::InvalidArgument("stall speed limit must not be negative"));
        }
        if self.speed_tolerance < 0 || self.position_tolerance < 0 {
            return Err(MotionError::InvalidArgument("tolerances must not be negative"));
        }
        if self.integral_deadzone < 0 || self.integral_change_max < 1 {
            return Err(MotionError::InvalidArgument("integrator bounds out of range"));
        }
        Ok(())
    }

    /// Get the kinematic limits: (speed, acceleration, deceleration, actuation).
    pub fn limits(&self) -> (i32, i32, i32, i32) {
        (self.speed_max, self.acceleration, self.deceleration, self.actuation_max)
    }

    /// Replace the kinematic limits, validating the result.
    pub fn set_limits(
        &mut self,
        speed: i32,
        acceleration: i32,
        deceleration: i32,
        actuation: i32,
    ) -> Result<(), MotionError> {
        let mut updated = *self;
        updated.speed_max = speed;
        updated.speed_default = updated.speed_default.min(speed);
        updated.acceleration = acceleration;
        updated.deceleration = deceleration;
        updated.actuation_max = actuation;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Get the PID gains: (kp, ki, kd, integral_change_max).
    pub fn pid(&self) -> (i32, i32, i32, i32) {
        (self.pid_kp, self.pid_ki, self.pid_kd, self.integral_change_max)
    }

    /// Replace the PID gains, validating the result.
    pub fn set_pid(
        &mut self,
        kp: i32,
        ki: i32,
        kd: i32,
        integral_change_max: i32,
    ) -> Result<(), MotionError> {
        let mut updated = *self;
        updated.pid_kp = kp;
        updated.pid_ki = ki;
        updated.pid_kd = kd;
        updated.integral_change_max = integral_change_max;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Get the on-target tolerances: (speed, position).
    pub fn target_tolerances(&self) -> (i32, i32) {
        (self.speed_tolerance, self.position_tolerance)
    }

    /// Replace the on-target tolerances, validating the result.
    pub fn set_target_tolerances(&mut self, speed: i32, position: i32) -> Result<(), MotionError> {
        let mut updated = *self;
        updated.speed_tolerance = speed;
        updated.position_tolerance = position;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Get the stall tolerances: (speed, time).
    pub fn stall_tolerances(&self) -> (i32, u32) {
        (self.stall_speed_limit, self.stall_time)
    }

    /// Replace the stall tolerances, validating the result.
    pub fn set_stall_tolerances(&mut self, speed: i32, time: u32) -> Result<(), MotionError> {
        let mut updated = *self;
        updated.stall_speed_limit = speed;
        updated.stall_time = time;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

/// Fixed observer gain matrix for one actuator model.
///
/// The gains discretize the motor's state-space model at the control tick
/// period, so they are valid only for the tick rate they were tuned at.
/// They never change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverSettings {
    /// Position gain on the previous speed estimate, ×10⁻⁴ per tick.
    pub phi_01: i32,
    /// Speed retention per tick, ×10⁻³.
    pub phi_11: i32,
    /// Torque-to-position coupling per tick, ×10⁻⁴ [µdeg/µNm].
    pub gam_0: i32,
    /// Torque-to-speed coupling per tick, ×10⁻⁴ [(µdeg/s)/µNm].
    pub gam_1: i32,
    /// Actuation-to-torque constant, ×10⁻⁴ [µNm/µNm]; identity (10_000)
    /// when the actuator applies torque directly.
    pub k_0: i32,
    /// Acceleration feedforward constant, ×10⁻⁴ [µNm/(mdeg/s²)].
    pub k_1: i32,
    /// Back-EMF feedforward constant, ×10⁻⁴ [µNm/(mdeg/s)].
    pub k_2: i32,
    /// Static friction torque [µNm].
    pub f_low: i32,
    /// Correction gain on the position estimation error, ×10⁻⁴ [µNm/µdeg].
    pub obs_gain: i32,
}

impl ObserverSettings {
    /// Check every gain for physical validity.
    pub fn validate(&self) -> Result<(), MotionError> {
        if self.phi_01 < 1 || self.phi_11 < 1 {
            return Err(MotionError::InvalidArgument("observer model gains must be positive"));
        }
        if self.gam_0 < 0 || self.gam_1 < 1 {
            return Err(MotionError::InvalidArgument("observer input gains out of range"));
        }
        if self.k_0 < 1 {
            return Err(MotionError::InvalidArgument("torque constant must be positive"));
        }
        if self.k_1 < 0 || self.k_2 < 0 || self.f_low < 0 {
            return Err(MotionError::InvalidArgument("feedforward constants must not be negative"));
        }
        if self.obs_gain < 0 {
            return Err(MotionError::InvalidArgument("observer gain must not be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceType, settings_for};

    fn valid() -> ControlSettings {
        let (control, _) = settings_for(DeviceType::MediumMotor).unwrap();
        control
    }

    #[test]
    fn builtin_settings_are_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_kinematic_limits() {
        let mut s = valid();
        s.acceleration = 0;
        assert!(matches!(s.validate(), Err(MotionError::InvalidArgument(_))));

        let mut s = valid();
        s.speed_max = -100;
        assert!(s.validate().is_err());

        let mut s = valid();
        s.actuation_max = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_negative_gains() {
        let mut s = valid();
        s.pid_ki = -1;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_bad_low_speed_band() {
        let mut s = valid();
        s.pid_kp_low_pct = 150;
        assert!(s.validate().is_err());
    }

    #[test]
    fn setters_leave_state_unchanged_on_error() {
        let mut s = valid();
        let before = s;
        assert!(s.set_limits(0, 1000, 1000, 100_000).is_err());
        assert_eq!(s, before);

        assert!(s.set_pid(-1, 0, 0, 500).is_err());
        assert_eq!(s, before);
    }

    #[test]
    fn setters_apply_valid_values() {
        let mut s = valid();
        s.set_target_tolerances(75, 9_000).unwrap();
        assert_eq!(s.target_tolerances(), (75, 9_000));

        s.set_stall_tolerances(15_000, 250).unwrap();
        assert_eq!(s.stall_tolerances(), (15_000, 250));
    }

    #[test]
    fn set_limits_caps_default_speed() {
        let mut s = valid();
        let lowered = s.speed_default / 2;
        s.set_limits(lowered, s.acceleration, s.deceleration, s.actuation_max)
            .unwrap();
        assert_eq!(s.speed_default, lowered);
    }

    #[test]
    fn observer_settings_reject_zero_model() {
        let (_, mut o) = settings_for(DeviceType::MediumMotor).unwrap();
        assert!(o.validate().is_ok());
        o.phi_11 = 0;
        assert!(o.validate().is_err());
    }
}
