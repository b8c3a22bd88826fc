//! Motion-profile generator.
//!
//! A motion command is compiled once into a [`Trajectory`]: up to three
//! phases (accelerate, cruise, decelerate) of a trapezoidal speed profile,
//! or a triangular profile when the kinematic limits are never reached.
//! The trajectory is immutable once computed and is *evaluated* at arbitrary
//! times; it is never advanced or mutated by the control loop.
//!
//! All phase math is integer with `i64` intermediates. The only floating
//! point is in [`Trajectory::stretched`], which re-times a follower onto a
//! leader trajectory and runs far outside the per-tick path.

use axle_common::angle::Angle;
use axle_common::error::MotionError;
use axle_common::settings::{ACCELERATION_MAX, ACCELERATION_MIN, SPEED_LIMIT_MAX};

use crate::math::{clamp_i32, dist_from_accel, dist_from_speed, isqrt, time_from_speed};

/// Longest finite maneuver accepted [ms]. Keeps every phase integral within
/// `i64` intermediates and `i32` results.
pub const MAX_DURATION_MS: i32 = 600_000;

/// Fictitious horizon [ms] used to compile open-ended commands. The cruise
/// phase extrapolates past it, so the value only bounds the ramp math.
const RUN_HORIZON_MS: i32 = 60_000;

/// Endpoint of a motion command: a position to reach or a time to run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Rotate to an absolute position.
    Position(Angle),
    /// Run for a wall-clock duration [ms].
    Duration(i32),
}

/// A motion request, compiled once into a [`Trajectory`].
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryCommand {
    /// Absolute start time [ms].
    pub time_start: u32,
    /// Position at the start of the maneuver.
    pub position_start: Angle,
    /// Speed at the start of the maneuver [mdeg/s].
    pub speed_start: i32,
    /// Requested cruise speed [mdeg/s]; sign selects the direction for
    /// time-based commands.
    pub speed_target: i32,
    /// Upper bound on any speed in the profile [mdeg/s].
    pub speed_max: i32,
    /// Ramp-up rate [mdeg/s²].
    pub acceleration: i32,
    /// Ramp-down rate [mdeg/s²].
    pub deceleration: i32,
    /// Keep cruising past the endpoint instead of stopping there.
    pub continue_running: bool,
    /// Position or duration endpoint.
    pub target: Target,
}

/// Reference state at one instant of a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    /// Reference position.
    pub position: Angle,
    /// Reference speed [mdeg/s].
    pub speed: i32,
    /// Reference acceleration [mdeg/s²].
    pub acceleration: i32,
}

/// A compiled motion profile.
///
/// Phase boundaries are relative to `time_start` and time-ordered:
/// `0 <= t1 <= t2 <= t3`. Position offsets `th1..th3` are relative to
/// `position_start` in millidegrees.
#[derive(Debug, Clone, Copy)]
pub struct Trajectory {
    time_start: u32,
    position_start: Angle,
    /// End of the acceleration phase [ms].
    t1: i32,
    /// End of the cruise phase [ms].
    t2: i32,
    /// End of the maneuver [ms].
    t3: i32,
    /// Position offsets at the phase boundaries [mdeg].
    th1: i32,
    th2: i32,
    th3: i32,
    /// Speed at the start, during cruise, and after the end [mdeg/s].
    w0: i32,
    w1: i32,
    w3: i32,
    /// Acceleration during ramp-up and ramp-down [mdeg/s²].
    a0: i32,
    a2: i32,
    continue_running: bool,
}

impl Trajectory {
    /// Compile a command into a trajectory.
    ///
    /// Fails with `InvalidArgument` on non-positive kinematic limits, a zero
    /// target speed for a position command, or an out-of-range duration.
    /// Nothing is mutated on failure.
    pub fn from_command(command: &TrajectoryCommand) -> Result<Trajectory, MotionError> {
        if command.speed_max < 1 || command.speed_max > SPEED_LIMIT_MAX {
            return Err(MotionError::InvalidArgument("speed limit out of range"));
        }
        if !(ACCELERATION_MIN..=ACCELERATION_MAX).contains(&command.acceleration)
            || !(ACCELERATION_MIN..=ACCELERATION_MAX).contains(&command.deceleration)
        {
            return Err(MotionError::InvalidArgument("acceleration limits out of range"));
        }
        match command.target {
            Target::Position(position_end) => Self::new_angle_command(command, position_end),
            Target::Duration(duration) => Self::new_time_command(command, duration),
        }
    }

    /// A zero-phase trajectory cruising at a constant speed from the given
    /// start state. Used when no acceleration ramp is requested.
    pub fn make_constant(time_start: u32, position_start: Angle, speed: i32) -> Trajectory {
        Trajectory {
            time_start,
            position_start,
            t1: 0,
            t2: 0,
            t3: 0,
            th1: 0,
            th2: 0,
            th3: 0,
            w0: speed,
            w1: speed,
            w3: speed,
            a0: 0,
            a2: 0,
            continue_running: true,
        }
    }

    /// A zero-length trajectory holding a single point. Completes
    /// immediately; used for position tracking and hold.
    pub fn make_stationary(time_start: u32, position: Angle) -> Trajectory {
        Trajectory {
            continue_running: false,
            w0: 0,
            w1: 0,
            w3: 0,
            ..Self::make_constant(time_start, position, 0)
        }
    }

    /// Compile a fixed-duration command.
    fn new_time_command(
        command: &TrajectoryCommand,
        duration: i32,
    ) -> Result<Trajectory, MotionError> {
        if duration < 0 || duration > MAX_DURATION_MS {
            return Err(MotionError::InvalidArgument("duration out of range"));
        }
        if duration == 0 && !command.continue_running {
            return Err(MotionError::InvalidArgument("zero duration for a finite maneuver"));
        }

        // The ramp math runs over a fictitious horizon for open-ended
        // commands; the cruise phase extrapolates past it.
        let d = if command.continue_running {
            RUN_HORIZON_MS as i64
        } else {
            duration as i64
        };

        // Mirror backward maneuvers into the forward frame.
        let backward = command.speed_target < 0;
        let direction = if backward { -1 } else { 1 };
        let wt = (command.speed_target as i64 * direction).min(command.speed_max as i64);
        let a_up = command.acceleration as i64;
        let a_dn = command.deceleration as i64;

        // Bound the initial speed so the profile can always reach zero (or
        // the cruise speed) within the allotted time.
        let w0 = (command.speed_start as i64 * direction)
            .clamp(-(command.speed_max as i64), command.speed_max as i64)
            .clamp(-(a_up * d / 1000), a_dn * d / 1000);

        let (a0, w1, t1) = if w0 < wt {
            // Accelerate. The peak speed is capped by what can still be
            // wound down within the remaining time.
            let peak = (a_dn * (w0 + a_up * d / 1000)) / (a_up + a_dn);
            let w1 = if peak >= wt { wt } else { peak.max(0) };
            (a_up, w1, time_from_speed(w1 - w0, a_up))
        } else {
            // Initial speed exceeds the target: decelerate onto it.
            (-a_dn, wt, time_from_speed(w0 - wt, a_dn))
        };

        let t3 = d;
        let t2 = (t3 - time_from_speed(w1, a_dn)).max(t1);

        let th1 = dist_from_speed(w0, t1) + dist_from_accel(a0, t1);
        let th2 = th1 + dist_from_speed(w1, t2 - t1);
        let th3 = th2 + dist_from_speed(w1, t3 - t2) + dist_from_accel(-a_dn, t3 - t2);

        let trajectory = Trajectory {
            time_start: command.time_start,
            position_start: command.position_start,
            t1: clamp_i32(t1),
            t2: clamp_i32(t2),
            t3: clamp_i32(t3),
            th1: clamp_i32(th1 * direction as i64),
            th2: clamp_i32(th2 * direction as i64),
            th3: clamp_i32(th3 * direction as i64),
            w0: clamp_i32(w0 * direction as i64),
            w1: clamp_i32(w1 * direction as i64),
            w3: if command.continue_running {
                clamp_i32(w1 * direction as i64)
            } else {
                0
            },
            a0: clamp_i32(a0 * direction as i64),
            a2: clamp_i32(-a_dn * direction as i64),
            continue_running: command.continue_running,
        };
        debug_assert!(trajectory.t1 >= 0 && trajectory.t1 <= trajectory.t2);
        debug_assert!(trajectory.t2 <= trajectory.t3);
        Ok(trajectory)
    }

    /// Compile an absolute-position command.
    fn new_angle_command(
        command: &TrajectoryCommand,
        position_end: Angle,
    ) -> Result<Trajectory, MotionError> {
        if command.speed_target == 0 {
            return Err(MotionError::InvalidArgument("zero speed for a position maneuver"));
        }
        // The displacement must collapse into 32 bits; a farther target is a
        // rejected argument, never a silent wrap.
        let displacement = position_end.diff_mdeg(&command.position_start)?;
        if displacement == 0 {
            // Already there: a zero-length maneuver that completes at once.
            return Ok(Self::make_stationary(command.time_start, command.position_start));
        }

        // Mirror backward maneuvers into the forward frame.
        let backward = displacement < 0;
        let direction = if backward { -1i64 } else { 1 };
        let th3 = displacement as i64 * direction;
        let wt = (command.speed_target as i64)
            .abs()
            .min(command.speed_max as i64);
        let a_up = command.acceleration as i64;
        let a_dn = command.deceleration as i64;

        // Bound the initial speed so the profile can still stop within the
        // commanded displacement.
        let mut w0 = (command.speed_start as i64 * direction)
            .clamp(-(command.speed_max as i64), command.speed_max as i64);
        if w0 > 0 && w0 * w0 / (2 * a_dn) > th3 {
            w0 = isqrt(2 * a_dn * th3);
        }

        let (a0, w1, th1, th2) = if w0 < wt {
            // Accelerate toward the cruise speed. `thf` is the fictitious
            // zero-speed point of the ramp-up arc.
            let thf = -(w0 * w0) / (2 * a_up);
            if th3 - thf >= wt * wt / (2 * a_up) + wt * wt / (2 * a_dn) {
                // Full trapezoid at the requested speed.
                (a_up, wt, thf + wt * wt / (2 * a_up), th3 - wt * wt / (2 * a_dn))
            } else {
                // Triangular: the ramps intersect below the cruise speed.
                // The harmonic mean is taken first to keep the product in
                // range for steep limits.
                let w1 = isqrt(2 * (a_up * a_dn / (a_up + a_dn)) * (th3 - thf));
                let th1 = thf + w1 * w1 / (2 * a_up);
                (a_up, w1, th1, th1)
            }
        } else {
            // Initial speed exceeds the target: decelerate onto it first.
            (-a_dn, wt, (w0 * w0 - wt * wt) / (2 * a_dn), th3 - wt * wt / (2 * a_dn))
        };

        let t1 = if a0 != 0 { time_from_speed(w1 - w0, a0) } else { 0 };
        let t2 = t1 + if w1 > 0 { (th2 - th1) * 1000 / w1 } else { 0 };
        let t3 = t2 + time_from_speed(w1, a_dn);

        let trajectory = Trajectory {
            time_start: command.time_start,
            position_start: command.position_start,
            t1: clamp_i32(t1),
            t2: clamp_i32(t2),
            t3: clamp_i32(t3),
            th1: clamp_i32(th1 * direction),
            th2: clamp_i32(th2 * direction),
            th3: clamp_i32(th3 * direction),
            w0: clamp_i32(w0 * direction),
            w1: clamp_i32(w1 * direction),
            w3: 0,
            a0: clamp_i32(a0 * direction),
            a2: clamp_i32(-a_dn * direction),
            continue_running: false,
        };
        debug_assert!(trajectory.t1 >= 0 && trajectory.t1 <= trajectory.t2);
        debug_assert!(trajectory.t2 <= trajectory.t3);
        Ok(trajectory)
    }

    /// Evaluate the reference state at an absolute time.
    ///
    /// Pure and deterministic: repeated calls with the same time yield
    /// bit-identical results. Times before the start clamp to the start
    /// state; times past the end clamp to the endpoint unless the trajectory
    /// continues running, in which case the cruise speed is held and the
    /// position extrapolates linearly.
    pub fn get_reference(&self, time: u32) -> Reference {
        let elapsed = (time.wrapping_sub(self.time_start) as i32).max(0) as i64;
        let t1 = self.t1 as i64;
        let t2 = self.t2 as i64;
        let t3 = self.t3 as i64;

        let (offset, speed, acceleration) = if elapsed < t1 {
            // Ramp-up phase.
            (
                dist_from_speed(self.w0 as i64, elapsed)
                    + dist_from_accel(self.a0 as i64, elapsed),
                self.w0 as i64 + self.a0 as i64 * elapsed / 1000,
                self.a0,
            )
        } else if self.continue_running || elapsed <= t2 {
            // Cruise phase; open-ended maneuvers never leave it.
            (
                self.th1 as i64 + dist_from_speed(self.w1 as i64, elapsed - t1),
                self.w1 as i64,
                0,
            )
        } else if elapsed < t3 {
            // Ramp-down phase.
            let dt = elapsed - t2;
            (
                self.th2 as i64
                    + dist_from_speed(self.w1 as i64, dt)
                    + dist_from_accel(self.a2 as i64, dt),
                self.w1 as i64 + self.a2 as i64 * dt / 1000,
                self.a2,
            )
        } else {
            // At or past the endpoint.
            (self.th3 as i64, self.w3 as i64, 0)
        };

        Reference {
            position: self.position_start.sum(&Angle::from_mdeg(offset)),
            speed: clamp_i32(speed),
            acceleration,
        }
    }

    /// Whether the maneuver's active window has ended at the given time.
    ///
    /// Open-ended trajectories never finish.
    pub fn is_done(&self, time: u32) -> bool {
        !self.continue_running && time.wrapping_sub(self.time_start) as i32 >= self.t3
    }

    /// The commanded endpoint position.
    pub fn end_position(&self) -> Angle {
        self.position_start.sum(&Angle::from_mdeg(self.th3 as i64))
    }

    /// Absolute start time [ms].
    #[inline]
    pub const fn start_time(&self) -> u32 {
        self.time_start
    }

    /// Duration of the compiled profile [ms].
    #[inline]
    pub const fn duration(&self) -> i32 {
        self.t3
    }

    /// Whether the trajectory cruises on past its endpoint.
    #[inline]
    pub const fn continues(&self) -> bool {
        self.continue_running
    }

    /// Re-time this trajectory onto a leader's phase boundaries.
    ///
    /// Position offsets are preserved; speeds and accelerations are rescaled
    /// so that both trajectories pass their phase boundaries together. Used
    /// to keep synchronized actuators (e.g. two drivebase wheels) arriving
    /// at the same moment. Ratio math is floating point; this runs when a
    /// maneuver is (re)planned, not inside the tick.
    pub fn stretched(&self, leader: &Trajectory) -> Trajectory {
        if leader.t3 == 0 || self.t3 == 0 {
            return Self::make_stationary(leader.time_start, self.position_start);
        }
        let scale = self.t3 as f64 / leader.t3 as f64;
        let speed = |w: i32| clamp_i32((w as f64 * scale) as i64);
        let accel = |a: i32| clamp_i32((a as f64 * scale * scale) as i64);
        Trajectory {
            time_start: leader.time_start,
            position_start: self.position_start,
            t1: leader.t1,
            t2: leader.t2,
            t3: leader.t3,
            th1: self.th1,
            th2: self.th2,
            th3: self.th3,
            w0: speed(self.w0),
            w1: speed(self.w1),
            w3: speed(self.w3),
            a0: accel(self.a0),
            a2: accel(self.a2),
            continue_running: self.continue_running,
        }
    }
}
