//! End-to-end maneuver tests against a simulated motor.
//!
//! The plant is a second-order DC motor model whose constants match the
//! medium-motor tuning tables, quantized to millidegrees at the encoder,
//! driven through the full control pipeline at the standard 5 ms tick.

use std::cell::RefCell;
use std::rc::Rc;

use axle_common::actuation::{ActuationCommand, Actuator, ExecMode, StopAction, Tacho};
use axle_common::angle::Angle;
use axle_common::device::{DeviceType, settings_for};
use axle_common::error::{DeviceError, MotionError};
use axle_motion::control::{Control, ControlState, ControlStatus};
use axle_motion::observer::StallFlags;

const TICK_MS: u32 = 5;
const DT_S: f64 = 0.005;

/// Simulated medium motor.
///
/// `position` and `speed` are in microdegrees; torque inputs are µNm. The
/// inertia, damping and static friction mirror the medium-motor model, so
/// the engine's feedforward nearly cancels the plant and feedback only has
/// to clean up the residual.
struct Plant {
    position: f64,
    speed: f64,
    inertia: f64,
    damping: f64,
    static_friction: f64,
    /// External load torque opposing forward motion [µNm].
    load: f64,
    /// A hard mechanical end stop, if present [µdeg].
    wall: Option<f64>,
    applied: ActuationCommand,
    brake_count: u32,
    coast_count: u32,
    fail_reads: bool,
}

impl Plant {
    fn medium() -> Plant {
        Plant {
            position: 0.0,
            speed: 0.0,
            inertia: 2.82e-5,
            damping: 2.82e-4,
            static_friction: 18_000.0,
            load: 0.0,
            wall: None,
            applied: ActuationCommand::Coast,
            brake_count: 0,
            coast_count: 0,
            fail_reads: false,
        }
    }

    fn step(&mut self, dt: f64) {
        let drive = match self.applied {
            ActuationCommand::Torque(t) => t as f64,
            ActuationCommand::Voltage(v) => v as f64 * 30.0, // crude volt→torque
            ActuationCommand::Coast => 0.0,
            // Shorted terminals: strong extra damping, no drive.
            ActuationCommand::Brake => -self.speed * self.damping * 10.0,
        };
        let friction = if self.speed.abs() > 1.0 {
            self.static_friction * self.speed.signum()
        } else {
            // Static regime: friction cancels the drive up to its limit.
            drive.clamp(-self.static_friction, self.static_friction)
        };
        let net = drive - friction - self.load - self.damping * self.speed;
        self.speed += net / self.inertia * dt;
        self.position += self.speed * dt;
        if let Some(wall) = self.wall {
            if self.position >= wall {
                self.position = wall;
                self.speed = self.speed.min(0.0);
            }
        }
    }

    fn position_mdeg(&self) -> i64 {
        (self.position / 1000.0) as i64
    }
}

struct Encoder(Rc<RefCell<Plant>>);

impl Tacho for Encoder {
    fn angle(&mut self) -> Result<Angle, DeviceError> {
        let plant = self.0.borrow();
        if plant.fail_reads {
            return Err(DeviceError::NoDevice);
        }
        Ok(Angle::from_mdeg(plant.position_mdeg()))
    }
}

struct Driver(Rc<RefCell<Plant>>);

impl Actuator for Driver {
    fn actuate(&mut self, command: ActuationCommand) -> Result<(), DeviceError> {
        let mut plant = self.0.borrow_mut();
        plant.applied = command;
        match command {
            ActuationCommand::Brake => plant.brake_count += 1,
            ActuationCommand::Coast => plant.coast_count += 1,
            _ => {}
        }
        Ok(())
    }
}

struct Rig {
    plant: Rc<RefCell<Plant>>,
    encoder: Encoder,
    driver: Driver,
    control: Control,
    now: u32,
}

impl Rig {
    fn new() -> Rig {
        let plant = Rc::new(RefCell::new(Plant::medium()));
        let (settings, observer) = settings_for(DeviceType::MediumMotor).unwrap();
        Rig {
            encoder: Encoder(plant.clone()),
            driver: Driver(plant.clone()),
            plant,
            control: Control::new(settings, observer, TICK_MS).unwrap(),
            now: 0,
        }
    }

    /// Advance one tick: control update, then 5 ms of plant physics.
    fn tick(&mut self) -> Result<ControlStatus, MotionError> {
        let status = self
            .control
            .tick(self.now, &mut self.encoder, &mut self.driver);
        self.plant.borrow_mut().step(DT_S);
        self.now += TICK_MS;
        status
    }

    /// Tick until the controller reports done, or the deadline passes.
    fn run_until_done(&mut self, deadline_ms: u32) -> ControlStatus {
        let mut status = ControlStatus::Active;
        while self.now < deadline_ms {
            status = self.tick().expect("collaborators are healthy");
            if self.control.is_done() {
                break;
            }
        }
        status
    }
}

#[test]
fn run_for_duration_traces_the_trapezoid() {
    let mut rig = Rig::new();
    rig.control
        .run_for_duration(
            0,
            &mut rig.encoder,
            500_000,
            1000,
            StopAction::Brake,
            ExecMode::Background,
        )
        .unwrap();

    let status = rig.run_until_done(2_000);
    assert_eq!(status, ControlStatus::Done);

    // Completion lands on the maneuver's end time.
    assert!(rig.now >= 1_000 && rig.now <= 1_020, "done at {} ms", rig.now);

    // Closed-form trapezoid area: 500 deg/s * 0.75 s = 375 deg. Allow the
    // position tolerance either side.
    let final_position = rig.plant.borrow().position_mdeg();
    assert!(
        (final_position - 375_000).abs() <= 15_000,
        "final position {final_position} mdeg"
    );

    // The after-stop brake was applied exactly once.
    assert_eq!(rig.plant.borrow().brake_count, 1);

    // Subsequent ticks stay passive and do not re-apply it.
    for _ in 0..10 {
        assert_eq!(rig.tick().unwrap(), ControlStatus::Done);
    }
    assert_eq!(rig.plant.borrow().brake_count, 1);
    assert_eq!(rig.control.state(), ControlState::Passive);
}

#[test]
fn timed_brake_releases_to_coast() {
    let mut rig = Rig::new();
    rig.control
        .run_for_duration(
            0,
            &mut rig.encoder,
            300_000,
            500,
            StopAction::Brake,
            ExecMode::Background,
        )
        .unwrap();
    rig.run_until_done(1_000);
    let done_at = rig.now;
    assert_eq!(rig.plant.borrow().coast_count, 0);

    // The brake is held for the configured hold time, then released.
    let hold = rig.control.settings().smart_passive_hold_time;
    while rig.now < done_at + hold + 3 * TICK_MS {
        rig.tick().unwrap();
    }
    assert_eq!(rig.plant.borrow().coast_count, 1);
    assert!(matches!(rig.plant.borrow().applied, ActuationCommand::Coast));
}

#[test]
fn stop_coast_reports_done_on_the_very_next_tick() {
    let mut rig = Rig::new();
    rig.control
        .run_for_duration(
            0,
            &mut rig.encoder,
            500_000,
            1000,
            StopAction::Hold,
            ExecMode::Background,
        )
        .unwrap();

    // Let it get well into the cruise phase.
    for _ in 0..60 {
        assert_eq!(rig.tick().unwrap(), ControlStatus::Active);
    }

    rig.control.stop(StopAction::Coast);
    assert_eq!(rig.tick().unwrap(), ControlStatus::Done);
    assert!(matches!(rig.plant.borrow().applied, ActuationCommand::Coast));
    assert_eq!(rig.control.state(), ControlState::Passive);
    assert!(rig.control.is_done());
}

#[test]
fn run_to_target_at_start_position_is_done_immediately() {
    let mut rig = Rig::new();
    rig.control
        .run_to_target(
            0,
            &mut rig.encoder,
            Angle::ZERO,
            500_000,
            StopAction::Coast,
            ExecMode::Background,
        )
        .unwrap();
    // Zero-length trajectory: the very next tick reports done.
    assert_eq!(rig.tick().unwrap(), ControlStatus::Done);
    assert!(rig.control.is_done());
}

#[test]
fn run_to_target_converges_and_holds() {
    let mut rig = Rig::new();
    rig.control
        .run_to_target(
            0,
            &mut rig.encoder,
            Angle::from_mdeg(180_000),
            500_000,
            StopAction::Hold,
            ExecMode::Background,
        )
        .unwrap();

    let status = rig.run_until_done(4_000);
    assert_eq!(status, ControlStatus::Done);

    let position = rig.plant.borrow().position_mdeg();
    let tolerance = rig.control.settings().position_tolerance as i64;
    assert!(
        (position - 180_000).abs() <= tolerance,
        "position {position} mdeg"
    );

    // Hold re-enters background control and keeps resisting.
    assert_eq!(rig.control.state(), ControlState::ActiveBackground);
    assert!(rig.control.is_done());

    // Push the load against the hold; control pushes back and the position
    // stays near the target.
    rig.plant.borrow_mut().load = 40_000.0;
    for _ in 0..400 {
        rig.tick().unwrap();
    }
    let disturbed = rig.plant.borrow().position_mdeg();
    assert!(
        (disturbed - 180_000).abs() <= 3 * tolerance,
        "held position {disturbed} mdeg"
    );
}

#[test]
fn backward_target_arrives_from_the_other_side() {
    let mut rig = Rig::new();
    rig.control
        .run_to_target(
            0,
            &mut rig.encoder,
            Angle::from_mdeg(-90_000),
            400_000,
            StopAction::Coast,
            ExecMode::Background,
        )
        .unwrap();
    rig.run_until_done(4_000);
    let position = rig.plant.borrow().position_mdeg();
    assert!(
        (position + 90_000).abs() <= rig.control.settings().position_tolerance as i64,
        "position {position} mdeg"
    );
}

#[test]
fn run_until_stalled_detects_the_wall() {
    let mut rig = Rig::new();
    // A hard stop one quarter turn ahead.
    rig.plant.borrow_mut().wall = Some(90_000_000.0);
    rig.control
        .run_until_stalled(
            0,
            &mut rig.encoder,
            500_000,
            StopAction::Coast,
            ExecMode::Background,
        )
        .unwrap();

    let mut status = ControlStatus::Active;
    while rig.now < 5_000 {
        status = rig.tick().unwrap();
        if rig.control.is_done() {
            break;
        }
    }
    assert_eq!(status, ControlStatus::Stalled);
    assert!(rig.control.is_stalled().contains(StallFlags::PROPORTIONAL));
    assert_eq!(rig.control.state(), ControlState::Passive);

    // The motor pressed against the wall before giving up.
    let position = rig.plant.borrow().position_mdeg();
    assert!(position > 80_000, "position {position} mdeg");
}

#[test]
fn stall_is_not_raised_during_free_running() {
    let mut rig = Rig::new();
    rig.control
        .run_for_duration(
            0,
            &mut rig.encoder,
            500_000,
            1000,
            StopAction::Coast,
            ExecMode::Background,
        )
        .unwrap();
    while !rig.control.is_done() && rig.now < 2_000 {
        let status = rig.tick().unwrap();
        assert_ne!(status, ControlStatus::Stalled);
    }
    assert!(rig.control.is_stalled().is_empty());
}

#[test]
fn encoder_fault_surfaces_and_latches() {
    let mut rig = Rig::new();
    rig.control
        .run_for_duration(
            0,
            &mut rig.encoder,
            500_000,
            1000,
            StopAction::Coast,
            ExecMode::Background,
        )
        .unwrap();
    for _ in 0..20 {
        rig.tick().unwrap();
    }

    rig.plant.borrow_mut().fail_reads = true;
    let err = rig.tick().unwrap_err();
    assert_eq!(err, MotionError::NoDevice);
    assert_eq!(rig.control.state(), ControlState::Errored);
    // The motor was released on the way down.
    assert!(matches!(rig.plant.borrow().applied, ActuationCommand::Coast));

    // Later ticks report the errored state instead of retrying.
    assert_eq!(rig.tick().unwrap(), ControlStatus::Error);
    assert_eq!(rig.control.wait_outcome(), Some(Err(MotionError::NoDevice)));
}

#[test]
fn foreground_stop_reports_canceled() {
    let mut rig = Rig::new();
    rig.control
        .run_for_duration(
            0,
            &mut rig.encoder,
            500_000,
            1000,
            StopAction::Coast,
            ExecMode::Foreground,
        )
        .unwrap();
    assert_eq!(rig.control.state(), ControlState::ActiveForeground);
    assert_eq!(rig.control.wait_outcome(), None);

    for _ in 0..40 {
        rig.tick().unwrap();
    }
    rig.control.stop(StopAction::Coast);
    rig.tick().unwrap();
    assert_eq!(rig.control.wait_outcome(), Some(Err(MotionError::Canceled)));
}

#[test]
fn replanning_mid_motion_is_atomic() {
    let mut rig = Rig::new();
    rig.control
        .run_to_target(
            0,
            &mut rig.encoder,
            Angle::from_mdeg(360_000),
            500_000,
            StopAction::Coast,
            ExecMode::Background,
        )
        .unwrap();
    for _ in 0..80 {
        rig.tick().unwrap();
    }
    // Redirect to a new target mid-flight; the new trajectory starts from
    // the live estimate, so motion stays continuous.
    let now = rig.now;
    rig.control
        .run_to_target(
            now,
            &mut rig.encoder,
            Angle::from_mdeg(90_000),
            500_000,
            StopAction::Coast,
            ExecMode::Background,
        )
        .unwrap();
    rig.run_until_done(6_000);
    let position = rig.plant.borrow().position_mdeg();
    assert!(
        (position - 90_000).abs() <= rig.control.settings().position_tolerance as i64,
        "position {position} mdeg"
    );
}

#[test]
fn invalid_commands_leave_state_untouched() {
    let mut rig = Rig::new();
    // Zero speed for a position maneuver.
    let err = rig
        .control
        .run_to_target(
            0,
            &mut rig.encoder,
            Angle::from_mdeg(90_000),
            0,
            StopAction::Coast,
            ExecMode::Background,
        )
        .unwrap_err();
    assert!(matches!(err, MotionError::InvalidArgument(_)));
    assert_eq!(rig.control.state(), ControlState::Passive);

    // Zero duration for a finite timed maneuver.
    let err = rig
        .control
        .run_for_duration(
            0,
            &mut rig.encoder,
            500_000,
            0,
            StopAction::Coast,
            ExecMode::Background,
        )
        .unwrap_err();
    assert!(matches!(err, MotionError::InvalidArgument(_)));
    assert_eq!(rig.control.state(), ControlState::Passive);
}
