//! Error kinds shared across the workspace.
//!
//! `InvalidArgument` is always raised *before* any state mutation; device
//! faults (`NoDevice`, `Io`) surface on the tick where they are detected and
//! are never retried inside the engine.

use thiserror::Error;

/// Failure reported by the motion engine or one of its collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MotionError {
    /// Malformed command or tuning parameters, rejected before any state change.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The device behind a collaborator is missing or detached.
    #[error("no such device")]
    NoDevice,

    /// The collaborator failed to read or apply a value.
    #[error("device I/O failed")]
    Io,

    /// The requested action is not available for this actuator class.
    #[error("operation not supported for this device")]
    NotSupported,

    /// A foreground motion was superseded by an explicit stop.
    #[error("motion canceled")]
    Canceled,
}

/// Fault raised by a hardware collaborator (tacho or actuator).
///
/// Collapses into [`MotionError`] at the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Device not present (unplugged, not detected, wrong port).
    #[error("device not connected")]
    NoDevice,
    /// Transfer to or from the device failed.
    #[error("device I/O error")]
    Io,
}

impl From<DeviceError> for MotionError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::NoDevice => MotionError::NoDevice,
            DeviceError::Io => MotionError::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_maps_to_motion_error() {
        assert_eq!(MotionError::from(DeviceError::NoDevice), MotionError::NoDevice);
        assert_eq!(MotionError::from(DeviceError::Io), MotionError::Io);
    }

    #[test]
    fn display_messages() {
        let e = MotionError::InvalidArgument("speed must be positive");
        assert_eq!(format!("{e}"), "invalid argument: speed must be positive");
        assert_eq!(format!("{}", MotionError::Canceled), "motion canceled");
    }
}
