//! Virtual motor plant.
//!
//! A second-order DC motor model (inertia, viscous damping, static
//! friction) with an optional external load and hard end stop. The encoder
//! view quantizes to millidegrees; the driver view accepts the engine's
//! actuation commands. Both views share one plant through `Rc<RefCell>`,
//! mirroring a real motor that is one physical object behind two hardware
//! interfaces.

use std::cell::RefCell;
use std::rc::Rc;

use axle_common::actuation::{ActuationCommand, Actuator, Tacho};
use axle_common::angle::Angle;
use axle_common::device::DeviceType;
use axle_common::error::DeviceError;

/// Simulated motor state. Positions/speeds in microdegrees, torque in µNm.
#[derive(Debug)]
pub struct Plant {
    position: f64,
    speed: f64,
    inertia: f64,
    damping: f64,
    static_friction: f64,
    /// External load torque opposing forward motion [µNm].
    pub load: f64,
    /// Hard mechanical end stop [µdeg], if present.
    pub end_stop: Option<f64>,
    applied: ActuationCommand,
}

impl Plant {
    /// A plant matching the given device model's rated torque and speed.
    pub fn for_device(device: DeviceType) -> Plant {
        // Damping is rated net torque over rated speed; inertia follows
        // from the mechanical time constant of the class.
        let (damping, time_constant, static_friction) = match device {
            DeviceType::SmallMotor => (7.0e-5, 0.06, 9_000.0),
            DeviceType::MediumMotor => (2.82e-4, 0.10, 18_000.0),
            DeviceType::LargeMotor => (6.56e-4, 0.15, 35_000.0),
        };
        Plant {
            position: 0.0,
            speed: 0.0,
            inertia: damping * time_constant,
            damping,
            static_friction,
            load: 0.0,
            end_stop: None,
            applied: ActuationCommand::Coast,
        }
    }

    /// Advance the physics by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        let drive = match self.applied {
            ActuationCommand::Torque(t) => t as f64,
            ActuationCommand::Voltage(v) => v as f64 * 30.0,
            ActuationCommand::Coast => 0.0,
            ActuationCommand::Brake => -self.speed * self.damping * 10.0,
        };
        let friction = if self.speed.abs() > 1.0 {
            self.static_friction * self.speed.signum()
        } else {
            (drive - self.load).clamp(-self.static_friction, self.static_friction)
        };
        let net = drive - friction - self.load - self.damping * self.speed;
        self.speed += net / self.inertia * dt;
        self.position += self.speed * dt;
        if let Some(stop) = self.end_stop {
            if self.position >= stop {
                self.position = stop;
                self.speed = self.speed.min(0.0);
            }
        }
    }

    /// Encoder view of the position [mdeg].
    pub fn position_mdeg(&self) -> i64 {
        (self.position / 1000.0) as i64
    }

    /// Current speed [mdeg/s].
    pub fn speed_mdeg(&self) -> i64 {
        (self.speed / 1000.0) as i64
    }

    /// The last actuation command applied.
    pub fn applied(&self) -> ActuationCommand {
        self.applied
    }
}

/// Encoder half of the plant: direction and zero point already applied.
pub struct Encoder(pub Rc<RefCell<Plant>>);

impl Tacho for Encoder {
    fn angle(&mut self) -> Result<Angle, DeviceError> {
        Ok(Angle::from_mdeg(self.0.borrow().position_mdeg()))
    }
}

/// Driver half of the plant.
pub struct Driver(pub Rc<RefCell<Plant>>);

impl Actuator for Driver {
    fn actuate(&mut self, command: ActuationCommand) -> Result<(), DeviceError> {
        self.0.borrow_mut().applied = command;
        Ok(())
    }
}
