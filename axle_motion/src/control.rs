//! Top-level per-actuator control state machine.
//!
//! A [`Control`] owns one trajectory, one observer and one tuning set, and
//! turns motion commands into a per-tick torque stream. Commands recompute
//! the trajectory atomically from the live state; the tick itself evaluates
//! the reference, updates the observer, runs the PID law and emits exactly
//! one actuation.
//!
//! Position-based maneuvers (`RunToTarget`, `TrackTarget`) integrate the
//! position error over time; time-based maneuvers (`Run`, `RunForDuration`,
//! `RunUntilStalled`) use the position shortfall as an exact speed-error
//! integral. Both regimes pause integration while the proportional term is
//! saturated, which is also the evidence the stall detector feeds on.
//!
//! Everything in the tick path is integer math.

pub mod integrator;

use tracing::debug;

use axle_common::actuation::{ActuationCommand, Actuator, ExecMode, StopAction, Tacho};
use axle_common::angle::Angle;
use axle_common::error::MotionError;
use axle_common::settings::{ControlSettings, ObserverSettings};

use crate::control::integrator::{PositionIntegrator, SpeedIntegrator};
use crate::math::clamp_i32;
use crate::observer::{Observer, StallDetector, StallFlags};
use crate::trajectory::{MAX_DURATION_MS, Target, Trajectory, TrajectoryCommand};

/// The motion command a controller is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Cruise at a speed until told otherwise.
    Run {
        /// Target speed [mdeg/s].
        speed: i32,
    },
    /// Cruise at a speed for a fixed duration, then stop.
    RunForDuration {
        /// Target speed [mdeg/s].
        speed: i32,
        /// Duration [ms].
        duration: i32,
    },
    /// Cruise at a speed until the motor stalls.
    RunUntilStalled {
        /// Target speed [mdeg/s].
        speed: i32,
    },
    /// Rotate to an absolute angle and come to rest there.
    RunToTarget {
        /// Target position.
        target: Angle,
    },
    /// Actively track a fixed position without a motion profile.
    TrackTarget,
}

/// Lifecycle state of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    /// No control output; the actuator is free.
    #[default]
    Passive,
    /// An unrecoverable collaborator fault was observed.
    Errored,
    /// PID running; the issuer does not wait.
    ActiveBackground,
    /// PID running; the issuer waits for completion.
    ActiveForeground,
}

/// Result of advancing the controller by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    /// A maneuver is in progress.
    Active,
    /// The maneuver completed (or no maneuver is running).
    Done,
    /// A stall condition is present; for `RunUntilStalled` this is the
    /// completing tick.
    Stalled,
    /// The controller is in the errored state.
    Error,
}

/// Integrator regime, selected by the command family.
#[derive(Debug, Clone)]
enum Integrator {
    Position(PositionIntegrator),
    Speed(SpeedIntegrator),
}

/// Per-actuator motion controller.
#[derive(Debug, Clone)]
pub struct Control {
    settings: ControlSettings,
    tick_ms: u32,
    observer: Observer,
    trajectory: Trajectory,
    action: Action,
    after_stop: StopAction,
    state: ControlState,
    integrator: Integrator,
    stall: StallDetector,
    /// Torque commanded on the previous tick [µNm]; feeds the observer.
    last_torque: i32,
    /// An explicit stop request, honored at the next tick.
    stop_pending: Option<StopAction>,
    /// When a post-stop brake releases to coast, if bounded.
    brake_release_at: Option<u32>,
    /// Whether the current/last maneuver has reached its goal.
    done: bool,
    /// Whether a foreground wait was superseded by a stop.
    canceled: bool,
    /// The fault that moved the controller to `Errored`, if any.
    last_error: Option<MotionError>,
}

impl Control {
    /// Create a passive controller for one actuator.
    ///
    /// Both tuning sets are validated; the tick period must be positive and
    /// match the period the observer gains were discretized at.
    pub fn new(
        settings: ControlSettings,
        observer_settings: ObserverSettings,
        tick_ms: u32,
    ) -> Result<Control, MotionError> {
        settings.validate()?;
        observer_settings.validate()?;
        if tick_ms == 0 {
            return Err(MotionError::InvalidArgument("tick period must be positive"));
        }
        Ok(Control {
            settings,
            tick_ms,
            observer: Observer::new(observer_settings),
            trajectory: Trajectory::make_stationary(0, Angle::ZERO),
            action: Action::TrackTarget,
            after_stop: StopAction::Coast,
            state: ControlState::Passive,
            integrator: Integrator::Position(PositionIntegrator::new()),
            stall: StallDetector::new(),
            last_torque: 0,
            stop_pending: None,
            brake_release_at: None,
            done: true,
            canceled: false,
            last_error: None,
        })
    }

    /// The tuning parameters in use.
    #[inline]
    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    /// Replace the tuning parameters. Only allowed while passive.
    pub fn set_settings(&mut self, settings: ControlSettings) -> Result<(), MotionError> {
        if self.is_active() {
            return Err(MotionError::NotSupported);
        }
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Whether a maneuver is currently being serviced.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ControlState::ActiveBackground | ControlState::ActiveForeground
        )
    }

    /// Whether the current or last maneuver reached its goal. Passive and
    /// errored controllers report done.
    #[inline]
    pub fn is_done(&self) -> bool {
        !self.is_active() || self.done
    }

    /// Whether the controller is fully at rest: passive with no deferred
    /// brake release outstanding.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.state == ControlState::Passive && self.brake_release_at.is_none()
    }

    /// Which stall conditions are currently raised.
    #[inline]
    pub fn is_stalled(&self) -> StallFlags {
        self.stall.flags()
    }

    /// Outcome of a foreground wait: `None` while the maneuver runs,
    /// `Some(Err(Canceled))` if a stop superseded it, `Some(Ok(()))` once
    /// complete.
    pub fn wait_outcome(&self) -> Option<Result<(), MotionError>> {
        if self.is_active() && !self.done {
            return None;
        }
        if self.canceled {
            return Some(Err(MotionError::Canceled));
        }
        if self.state == ControlState::Errored {
            return Some(Err(self.last_error.unwrap_or(MotionError::Io)));
        }
        Some(Ok(()))
    }

    // ── Motion commands ─────────────────────────────────────────────

    /// Cruise at `speed` until told otherwise.
    pub fn run(
        &mut self,
        now: u32,
        tacho: &mut dyn Tacho,
        speed: i32,
        mode: ExecMode,
    ) -> Result<(), MotionError> {
        let (position, start_speed) = self.start_state(tacho)?;
        let command = self.time_command(now, position, start_speed, speed, 0, true);
        let trajectory = Trajectory::from_command(&command)?;
        self.engage_time_based(trajectory, Action::Run { speed }, StopAction::Coast, mode, now);
        Ok(())
    }

    /// Cruise at `speed` for `duration` ms, then perform `after_stop`.
    pub fn run_for_duration(
        &mut self,
        now: u32,
        tacho: &mut dyn Tacho,
        speed: i32,
        duration: i32,
        after_stop: StopAction,
        mode: ExecMode,
    ) -> Result<(), MotionError> {
        // Argument checks come before any state is touched.
        if duration <= 0 || duration > MAX_DURATION_MS {
            return Err(MotionError::InvalidArgument("duration out of range"));
        }
        let (position, start_speed) = self.start_state(tacho)?;
        let command = self.time_command(now, position, start_speed, speed, duration, false);
        let trajectory = Trajectory::from_command(&command)?;
        self.engage_time_based(
            trajectory,
            Action::RunForDuration { speed, duration },
            after_stop,
            mode,
            now,
        );
        Ok(())
    }

    /// Cruise at `speed` until a stall condition qualifies, then perform
    /// `after_stop`.
    pub fn run_until_stalled(
        &mut self,
        now: u32,
        tacho: &mut dyn Tacho,
        speed: i32,
        after_stop: StopAction,
        mode: ExecMode,
    ) -> Result<(), MotionError> {
        let (position, start_speed) = self.start_state(tacho)?;
        let command = self.time_command(now, position, start_speed, speed, 0, true);
        let trajectory = Trajectory::from_command(&command)?;
        self.engage_time_based(
            trajectory,
            Action::RunUntilStalled { speed },
            after_stop,
            mode,
            now,
        );
        Ok(())
    }

    /// Rotate to `target` at `speed`, then perform `after_stop`.
    pub fn run_to_target(
        &mut self,
        now: u32,
        tacho: &mut dyn Tacho,
        target: Angle,
        speed: i32,
        after_stop: StopAction,
        mode: ExecMode,
    ) -> Result<(), MotionError> {
        // Argument checks come before any state is touched.
        if speed == 0 {
            return Err(MotionError::InvalidArgument("zero speed for a position maneuver"));
        }
        let (position, start_speed) = self.start_state(tacho)?;
        let command = TrajectoryCommand {
            time_start: now,
            position_start: position,
            speed_start: start_speed,
            speed_target: speed,
            speed_max: self.settings.speed_max,
            acceleration: self.settings.acceleration,
            deceleration: self.settings.deceleration,
            continue_running: false,
            target: Target::Position(target),
        };
        let trajectory = Trajectory::from_command(&command)?;
        self.engage_position_based(
            trajectory,
            Action::RunToTarget { target },
            after_stop,
            mode,
            now,
        );
        Ok(())
    }

    /// Track `target` without a motion profile: full feedback authority is
    /// applied immediately. Used for hold and for externally generated
    /// setpoint streams.
    pub fn track_target(
        &mut self,
        now: u32,
        tacho: &mut dyn Tacho,
        target: Angle,
    ) -> Result<(), MotionError> {
        // Reading the start state keeps the observer primed when engaging
        // from passive; the trajectory itself is just the target point.
        let _ = self.start_state(tacho)?;
        let trajectory = Trajectory::make_stationary(now, target);
        self.engage_position_based(
            trajectory,
            Action::TrackTarget,
            StopAction::Hold,
            ExecMode::Background,
            now,
        );
        Ok(())
    }

    /// Actively hold the current position.
    pub fn hold(&mut self, now: u32, tacho: &mut dyn Tacho) -> Result<(), MotionError> {
        let (position, _) = self.start_state(tacho)?;
        self.track_target(now, tacho, position)
    }

    /// Request a stop. Honored at the next tick, which reports `Done` with
    /// the requested after-stop actuation applied. A waiting foreground
    /// issuer observes `Canceled`.
    pub fn stop(&mut self, after_stop: StopAction) {
        if self.is_active() {
            self.stop_pending = Some(after_stop);
        }
    }

    /// Leave the errored state and return to passive so new commands are
    /// accepted again.
    pub fn reset_error(&mut self) {
        if self.state == ControlState::Errored {
            self.state = ControlState::Passive;
            self.done = true;
            self.last_error = None;
        }
    }

    // ── Per-tick update ─────────────────────────────────────────────

    /// Advance control by one scheduler tick and produce the next actuation.
    ///
    /// Reads the encoder (a genuine side effect), updates the observer,
    /// evaluates the trajectory, runs the feedback law and commands the
    /// actuator. Collaborator faults transition to `Errored` and surface
    /// immediately; they are never retried here.
    pub fn tick(
        &mut self,
        now: u32,
        tacho: &mut dyn Tacho,
        actuator: &mut dyn Actuator,
    ) -> Result<ControlStatus, MotionError> {
        match self.state {
            ControlState::Errored => return Ok(ControlStatus::Error),
            ControlState::Passive => {
                if let Some(release_at) = self.brake_release_at {
                    if time_passed(now, release_at) {
                        self.brake_release_at = None;
                        if let Err(e) = actuator.actuate(ActuationCommand::Coast) {
                            return Err(self.enter_errored(actuator, e.into()));
                        }
                    }
                }
                return Ok(ControlStatus::Done);
            }
            ControlState::ActiveBackground | ControlState::ActiveForeground => {}
        }

        let measured = match tacho.angle() {
            Ok(angle) => angle,
            Err(e) => return Err(self.enter_errored(actuator, e.into())),
        };
        self.observer.update(&measured, self.last_torque);

        if let Some(after_stop) = self.stop_pending.take() {
            if self.state == ControlState::ActiveForeground {
                self.canceled = true;
            }
            debug!(?after_stop, "motion stopped by request");
            return self.finish(now, actuator, after_stop, measured);
        }

        match self.integrator {
            Integrator::Position(_) => self.tick_position_based(now, actuator, &measured),
            Integrator::Speed(_) => self.tick_time_based(now, actuator, &measured),
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    /// The start condition for a new maneuver: the live reference state when
    /// already active, otherwise a fresh encoder read that also primes the
    /// observer.
    fn start_state(&mut self, tacho: &mut dyn Tacho) -> Result<(Angle, i32), MotionError> {
        if self.is_active() {
            return Ok((self.observer.position(), self.observer.speed()));
        }
        let angle = tacho.angle()?;
        self.observer.reset(&angle, 0);
        Ok((angle, 0))
    }

    fn time_command(
        &self,
        now: u32,
        position: Angle,
        start_speed: i32,
        speed: i32,
        duration: i32,
        continue_running: bool,
    ) -> TrajectoryCommand {
        TrajectoryCommand {
            time_start: now,
            position_start: position,
            speed_start: start_speed,
            speed_target: speed,
            speed_max: self.settings.speed_max,
            acceleration: self.settings.acceleration,
            deceleration: self.settings.deceleration,
            continue_running,
            target: Target::Duration(duration),
        }
    }

    fn engage_time_based(
        &mut self,
        trajectory: Trajectory,
        action: Action,
        after_stop: StopAction,
        mode: ExecMode,
        now: u32,
    ) {
        let position = self.observer.position().total_mdeg();
        let reference = trajectory.get_reference(now).position.total_mdeg();
        self.integrator = Integrator::Speed(SpeedIntegrator::new(position, reference));
        self.engage(trajectory, action, after_stop, mode);
    }

    fn engage_position_based(
        &mut self,
        trajectory: Trajectory,
        action: Action,
        after_stop: StopAction,
        mode: ExecMode,
        _now: u32,
    ) {
        self.integrator = Integrator::Position(PositionIntegrator::new());
        self.engage(trajectory, action, after_stop, mode);
    }

    fn engage(
        &mut self,
        trajectory: Trajectory,
        action: Action,
        after_stop: StopAction,
        mode: ExecMode,
    ) {
        debug!(?action, ?after_stop, ?mode, "maneuver engaged");
        self.trajectory = trajectory;
        self.action = action;
        self.after_stop = after_stop;
        self.state = match mode {
            ExecMode::Foreground => ControlState::ActiveForeground,
            ExecMode::Background => ControlState::ActiveBackground,
        };
        self.stall.reset();
        self.stop_pending = None;
        self.brake_release_at = None;
        self.done = false;
        self.canceled = false;
    }

    fn tick_position_based(
        &mut self,
        now: u32,
        actuator: &mut dyn Actuator,
        measured: &Angle,
    ) -> Result<ControlStatus, MotionError> {
        let s = self.settings;
        let Integrator::Position(ref mut it) = self.integrator else {
            unreachable!("position action always carries a position integrator");
        };

        // Stall pauses freeze the reference clock, so the maneuver resumes
        // where it left off instead of jumping ahead.
        let ref_time = it.ref_time(now);
        let reference = self.trajectory.get_reference(ref_time);

        let error = match reference.position.diff_mdeg(measured) {
            Ok(e) => e,
            Err(e) => return Err(self.enter_errored(actuator, e)),
        };
        let speed_error = reference.speed as i64 - self.observer.speed() as i64;

        // Proportional term, with the reduced gain band near standstill to
        // avoid buzzing against the target.
        let in_low_band = reference.speed.abs() < s.pid_kp_low_speed_threshold
            && error.abs() < s.pid_kp_low_error_threshold;
        let kp_scaled = if in_low_band {
            s.pid_kp as i64 * s.pid_kp_low_pct as i64 / 100
        } else {
            s.pid_kp as i64
        };
        let torque_p = kp_scaled * error as i64;

        // Integral term with deadzone, change clamp and absolute bound.
        let integral_max = s.actuation_max as i64 * 1_000_000 / (s.pid_ki.max(1) as i64);
        let integral = it.update(
            error,
            s.integral_deadzone,
            s.integral_change_max,
            self.tick_ms,
            integral_max,
        );
        let torque_i = s.pid_ki as i64 * integral / 1_000_000;

        // Derivative on the speed error, using the filtered estimate.
        let torque_d = s.pid_kd as i64 * speed_error / 1000;

        let torque_ff = self.observer.feedforward_torque(reference.speed, reference.acceleration);
        let total = torque_p + torque_i + torque_d + torque_ff as i64;
        let limited = total.clamp(-(s.actuation_max as i64), s.actuation_max as i64);

        // Position anti-windup: while the proportional term alone saturates
        // in the direction we still need to move, further integration only
        // winds up error the actuator cannot act on.
        let saturated_p = (torque_p >= s.actuation_max as i64 && speed_error > 0)
            || (torque_p <= -(s.actuation_max as i64) && speed_error < 0);
        if saturated_p {
            it.pause(now);
        } else {
            it.resume(now);
        }
        let saturated_i = integral.abs() >= integral_max;

        let paused = it.paused();
        self.stall.update(
            now,
            self.observer.speed().abs() < s.stall_speed_limit,
            paused,
            saturated_i,
            s.stall_time,
        );

        // On-target detection for position maneuvers.
        if let Action::RunToTarget { .. } = self.action {
            let end = self.trajectory.end_position();
            let on_target = self.trajectory.is_done(ref_time)
                && end
                    .diff_mdeg(measured)
                    .map(|e| e.abs() <= s.position_tolerance)
                    .unwrap_or(false)
                && self.observer.speed().abs() <= s.speed_tolerance;
            if on_target {
                return self.finish(now, actuator, self.after_stop, end);
            }
        }

        self.apply_torque(actuator, clamp_i32(limited))?;
        Ok(self.active_status())
    }

    fn tick_time_based(
        &mut self,
        now: u32,
        actuator: &mut dyn Actuator,
        measured: &Angle,
    ) -> Result<ControlStatus, MotionError> {
        let s = self.settings;
        let Integrator::Speed(ref mut it) = self.integrator else {
            unreachable!("time action always carries a speed integrator");
        };

        let reference = self.trajectory.get_reference(now);
        let position = measured.total_mdeg();
        let ref_position = reference.position.total_mdeg();

        // The speed-error integral is exactly the position shortfall, so
        // proportional position feedback implements integral speed control.
        let integral = clamp_i32(it.get(position, ref_position)) as i64;
        let speed_error = reference.speed as i64 - self.observer.speed() as i64;

        let torque_p = s.pid_kp as i64 * integral;
        let torque_d = s.pid_kd as i64 * speed_error / 1000;
        let torque_ff = self.observer.feedforward_torque(reference.speed, reference.acceleration);
        let total = torque_p + torque_d + torque_ff as i64;
        let limited = total.clamp(-(s.actuation_max as i64), s.actuation_max as i64);

        let saturated_p = (torque_p >= s.actuation_max as i64 && speed_error > 0)
            || (torque_p <= -(s.actuation_max as i64) && speed_error < 0);
        if saturated_p {
            it.pause(position, ref_position);
        } else {
            it.resume(position, ref_position);
        }

        let paused = it.paused();
        self.stall.update(
            now,
            self.observer.speed().abs() < s.stall_speed_limit,
            paused,
            false,
            s.stall_time,
        );

        match self.action {
            Action::RunForDuration { .. } if self.trajectory.is_done(now) => {
                return self.finish(now, actuator, self.after_stop, *measured);
            }
            Action::RunUntilStalled { .. } if !self.stall.flags().is_empty() => {
                let flags = self.stall.flags();
                debug!(?flags, "stall qualified, maneuver complete");
                self.finish(now, actuator, self.after_stop, *measured)?;
                return Ok(ControlStatus::Stalled);
            }
            _ => {}
        }

        self.apply_torque(actuator, clamp_i32(limited))?;
        Ok(self.active_status())
    }

    /// Complete the maneuver: apply the after-stop behavior and transition.
    fn finish(
        &mut self,
        now: u32,
        actuator: &mut dyn Actuator,
        after_stop: StopAction,
        hold_position: Angle,
    ) -> Result<ControlStatus, MotionError> {
        self.done = true;
        match after_stop {
            StopAction::Coast => {
                if let Err(e) = actuator.actuate(ActuationCommand::Coast) {
                    return Err(self.enter_errored(actuator, e.into()));
                }
                self.last_torque = 0;
                self.state = ControlState::Passive;
                self.brake_release_at = None;
            }
            StopAction::Brake => {
                if let Err(e) = actuator.actuate(ActuationCommand::Brake) {
                    return Err(self.enter_errored(actuator, e.into()));
                }
                self.last_torque = 0;
                self.state = ControlState::Passive;
                self.brake_release_at = (self.settings.smart_passive_hold_time > 0)
                    .then(|| now.wrapping_add(self.settings.smart_passive_hold_time));
            }
            StopAction::Hold => {
                // Re-enter active control with a zero-displacement target;
                // feedback resists disturbance from the next tick on.
                self.trajectory = Trajectory::make_stationary(now, hold_position);
                self.action = Action::TrackTarget;
                self.integrator = Integrator::Position(PositionIntegrator::new());
                self.state = ControlState::ActiveBackground;
                self.stall.reset();
                if let Err(e) = actuator.actuate(ActuationCommand::Torque(0)) {
                    return Err(self.enter_errored(actuator, e.into()));
                }
                self.last_torque = 0;
            }
        }
        debug!(?after_stop, "maneuver complete");
        Ok(ControlStatus::Done)
    }

    fn apply_torque(
        &mut self,
        actuator: &mut dyn Actuator,
        torque: i32,
    ) -> Result<(), MotionError> {
        if let Err(e) = actuator.actuate(ActuationCommand::Torque(torque)) {
            return Err(self.enter_errored(actuator, e.into()));
        }
        self.last_torque = torque;
        Ok(())
    }

    fn active_status(&self) -> ControlStatus {
        if self.stall.flags().is_empty() {
            ControlStatus::Active
        } else {
            ControlStatus::Stalled
        }
    }

    /// Record a collaborator fault: best-effort coast, then `Errored`.
    fn enter_errored(&mut self, actuator: &mut dyn Actuator, error: MotionError) -> MotionError {
        // The coast is best effort; the underlying fault is what surfaces.
        let _ = actuator.actuate(ActuationCommand::Coast);
        self.state = ControlState::Errored;
        self.last_torque = 0;
        self.last_error = Some(error);
        debug!(?error, "controller entered errored state");
        error
    }
}

/// Whether `now` is at or past `deadline`, wraparound-safe.
#[inline]
fn time_passed(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) as i32 >= 0
}
