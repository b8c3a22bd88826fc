//! Actuation commands and the collaborator seam.
//!
//! The engine consumes exactly two services from the outside world: "read
//! the current absolute angle" ([`Tacho`]) and "apply an output actuation"
//! ([`Actuator`]). Everything hardware-specific (PWM, H-bridge, encoder
//! decoding, direction and zero-point correction) lives behind these traits.

use serde::{Deserialize, Serialize};

use crate::angle::Angle;
use crate::error::DeviceError;

/// A physical output command for the motor driver.
///
/// Applying the same command repeatedly is a no-op at the hardware layer but
/// always succeeds logically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuationCommand {
    /// Let the motor spin freely.
    Coast,
    /// Short the motor terminals for passive braking.
    Brake,
    /// Apply a fixed voltage [mV].
    Voltage(i32),
    /// Apply a feedback torque [µNm].
    Torque(i32),
}

/// What the actuator does once a motion completes or is stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopAction {
    /// Let the motor spin freely.
    #[default]
    Coast,
    /// Passively brake.
    Brake,
    /// Actively hold the stop position against disturbance.
    Hold,
}

/// Whether a motion command blocks its issuer until completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// The caller waits for completion; the scheduler drives the wait loop.
    Foreground,
    /// The call returns immediately; the motion is serviced in the background.
    Background,
}

/// Encoder-abstraction collaborator.
///
/// Implementations return direction- and zero-point-corrected readings; the
/// engine never applies polarity itself.
pub trait Tacho {
    /// Sample the current absolute angle.
    ///
    /// This reads hardware, so repeated calls are *not* idempotent.
    fn angle(&mut self) -> Result<Angle, DeviceError>;
}

/// Motor-driver collaborator.
pub trait Actuator {
    /// Apply an actuation command to the hardware.
    fn actuate(&mut self, command: ActuationCommand) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_action_default_is_coast() {
        assert_eq!(StopAction::default(), StopAction::Coast);
    }

    #[test]
    fn stop_action_toml_names() {
        #[derive(serde::Deserialize)]
        struct Probe {
            on_stop: StopAction,
        }
        let p: Probe = toml::from_str("on_stop = \"hold\"").unwrap();
        assert_eq!(p.on_stop, StopAction::Hold);
    }
}
