//! Sensor-fused state observer.
//!
//! A fixed-gain Luenberger observer: each tick the previous estimate is
//! advanced through a discrete model of the motor, driven by the torque that
//! was actually commanded, and corrected toward the measured encoder angle.
//! The resulting speed estimate is far less noisy than a per-tick angle
//! difference, and the correction torque doubles as a load estimate.
//!
//! All state is `i64` fixed point in microdegrees; gains come from
//! [`ObserverSettings`] and embed the tick period, so one observer instance
//! is only valid at the tick rate its gains were tuned for.

use bitflags::bitflags;

use axle_common::angle::Angle;
use axle_common::settings::ObserverSettings;

use crate::math::clamp_i32;

/// Denominator for ×10⁻⁴ scaled gains.
const MODEL_SCALE: i64 = 10_000;
/// Denominator for the ×10⁻³ speed retention gain.
const RETAIN_SCALE: i64 = 1_000;
/// Microdegrees per millidegree.
const UDEG_PER_MDEG: i64 = 1_000;
/// Load filter constant, per mille per tick.
const LOAD_FILTER_PERMILLE: i64 = 50;

bitflags! {
    /// Independent stall conditions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StallFlags: u8 {
        /// Proportional feedback saturated while the motor barely moves.
        const PROPORTIONAL = 0b01;
        /// Integral feedback saturated while the motor barely moves.
        const INTEGRAL = 0b10;
    }
}

/// Discrete-time state estimator for one actuator.
#[derive(Debug, Clone)]
pub struct Observer {
    settings: ObserverSettings,
    /// Estimated position [µdeg].
    est_position: i64,
    /// Estimated speed [µdeg/s].
    est_speed: i64,
    /// Filtered load estimate [µNm].
    load: i64,
}

impl Observer {
    /// Create an observer at the zero state.
    pub fn new(settings: ObserverSettings) -> Observer {
        Observer {
            settings,
            est_position: 0,
            est_speed: 0,
            load: 0,
        }
    }

    /// Reset the estimate to a known state, discarding all history.
    pub fn reset(&mut self, position: &Angle, speed: i32) {
        self.est_position = position.total_mdeg() * UDEG_PER_MDEG;
        self.est_speed = speed as i64 * UDEG_PER_MDEG;
        self.load = 0;
    }

    /// Advance the estimate by one tick.
    ///
    /// `measured` is the fresh encoder reading; `actuation` is the torque
    /// [µNm] that was commanded on the *previous* tick.
    pub fn update(&mut self, measured: &Angle, actuation: i32) {
        let s = &self.settings;

        // Torque applied by the motor, and the correction torque implied by
        // the gap between prediction and measurement.
        let tau_e = s.k_0 as i64 * actuation as i64 / MODEL_SCALE;
        let err = measured.total_mdeg() * UDEG_PER_MDEG - self.est_position;
        // Saturate the correction so a wildly stale estimate cannot push
        // the arithmetic out of range; it converges over multiple ticks.
        let tau_o = (s.obs_gain as i64 * err / MODEL_SCALE)
            .clamp(-1_000_000_000, 1_000_000_000);

        // Friction opposes motion; at standstill it opposes the drive and
        // cancels it entirely below the static threshold.
        let f_low = s.f_low as i64;
        let tau_f = if self.est_speed > 0 {
            f_low
        } else if self.est_speed < 0 {
            -f_low
        } else {
            (tau_e + tau_o).clamp(-f_low, f_low)
        };

        let net = tau_e + tau_o - tau_f;
        let next_position = self.est_position
            + s.phi_01 as i64 * self.est_speed / MODEL_SCALE
            + s.gam_0 as i64 * net / MODEL_SCALE;
        let without_friction = s.phi_11 as i64 * self.est_speed / RETAIN_SCALE
            + s.gam_1 as i64 * (tau_e + tau_o) / MODEL_SCALE;
        let mut next_speed = without_friction - s.gam_1 as i64 * tau_f / MODEL_SCALE;

        // Friction may slow the motor to a standstill but never reverse it.
        if (next_speed < 0) != (without_friction < 0) {
            next_speed = 0;
        }

        self.est_position = next_position;
        self.est_speed = next_speed;
        // The correction torque is the model-unexplained component: filter
        // it into a slow-moving load estimate.
        self.load += LOAD_FILTER_PERMILLE * (tau_o - self.load) / 1000;
    }

    /// Estimated position.
    pub fn position(&self) -> Angle {
        Angle::from_mdeg(self.est_position / UDEG_PER_MDEG)
    }

    /// Estimated speed [mdeg/s].
    pub fn speed(&self) -> i32 {
        clamp_i32(self.est_speed / UDEG_PER_MDEG)
    }

    /// Filtered load estimate [µNm]. Positive when the mechanism resists
    /// forward motion.
    pub fn load(&self) -> i32 {
        clamp_i32(self.load)
    }

    /// Torque expected to sustain the reference motion: static friction plus
    /// speed-proportional and acceleration-proportional terms.
    pub fn feedforward_torque(&self, speed_ref: i32, accel_ref: i32) -> i32 {
        let s = &self.settings;
        let friction = s.f_low as i64 * (speed_ref as i64).signum();
        let back_emf = s.k_2 as i64 * speed_ref as i64 / MODEL_SCALE;
        let acceleration = s.k_1 as i64 * accel_ref as i64 / MODEL_SCALE;
        clamp_i32(friction + back_emf + acceleration)
    }
}

/// Tracks how long each stall condition has been continuously present.
///
/// A flag is raised only after its condition has held for the configured
/// stall time, and is cleared the instant the speed recovers above the
/// stall threshold.
#[derive(Debug, Clone, Default)]
pub struct StallDetector {
    flags: StallFlags,
    proportional_since: Option<u32>,
    integral_since: Option<u32>,
}

impl StallDetector {
    /// Create a detector with no condition pending.
    pub fn new() -> StallDetector {
        StallDetector::default()
    }

    /// Clear all pending state, e.g. when a new maneuver starts.
    pub fn reset(&mut self) {
        *self = StallDetector::default();
    }

    /// Feed one tick of evidence.
    ///
    /// `below_limit` is whether the speed estimate is under the stall speed
    /// threshold; the two saturation inputs say which feedback terms are
    /// pinned at their ceiling this tick.
    pub fn update(
        &mut self,
        now: u32,
        below_limit: bool,
        proportional_saturated: bool,
        integral_saturated: bool,
        stall_time: u32,
    ) {
        if !below_limit {
            // Speed recovered: clear instantly, qualification restarts.
            self.reset();
            return;
        }

        self.flags.set(
            StallFlags::PROPORTIONAL,
            Self::qualify(&mut self.proportional_since, proportional_saturated, now, stall_time),
        );
        self.flags.set(
            StallFlags::INTEGRAL,
            Self::qualify(&mut self.integral_since, integral_saturated, now, stall_time),
        );
    }

    fn qualify(since: &mut Option<u32>, active: bool, now: u32, stall_time: u32) -> bool {
        if !active {
            *since = None;
            return false;
        }
        let start = *since.get_or_insert(now);
        now.wrapping_sub(start) >= stall_time
    }

    /// Currently raised stall flags.
    #[inline]
    pub fn flags(&self) -> StallFlags {
        self.flags
    }
}
