//! Wraparound-safe high-resolution rotation counter.
//!
//! An [`Angle`] stores whole rotations and a millidegree component
//! separately, so it can represent many full turns without losing sub-degree
//! resolution or overflowing 32 bits at high turn counts. All arithmetic
//! normalizes ("flushes") the result so that the millidegree component
//! always satisfies `|millidegrees| < 360_000`.
//!
//! All operations are pure; none touch hardware or global state.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

use crate::error::MotionError;

/// Millidegrees in one full rotation.
pub const MDEG_PER_ROTATION: i32 = 360_000;

/// A rotation angle with millidegree resolution and an unbounded turn count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Angle {
    /// Whole rotations.
    rotations: i32,
    /// Sub-rotation component, `|millidegrees| < 360_000` after flush.
    millidegrees: i32,
}

const_assert_eq!(core::mem::size_of::<Angle>(), 8);

impl Angle {
    /// The zero angle.
    pub const ZERO: Angle = Angle {
        rotations: 0,
        millidegrees: 0,
    };

    /// Create an angle from rotations plus millidegrees, normalizing the
    /// result.
    pub fn new(rotations: i32, millidegrees: i32) -> Angle {
        flush(rotations as i64, millidegrees as i64)
    }

    /// Create an angle from a total millidegree value.
    pub fn from_mdeg(millidegrees: i64) -> Angle {
        flush(0, millidegrees)
    }

    /// Whole-rotation component.
    #[inline]
    pub const fn rotations(&self) -> i32 {
        self.rotations
    }

    /// Millidegree component, `|m| < 360_000`.
    #[inline]
    pub const fn millidegrees(&self) -> i32 {
        self.millidegrees
    }

    /// Total angle in millidegrees as a wide integer. Never overflows.
    #[inline]
    pub fn total_mdeg(&self) -> i64 {
        self.rotations as i64 * MDEG_PER_ROTATION as i64 + self.millidegrees as i64
    }

    /// `self + other`, normalized.
    pub fn sum(&self, other: &Angle) -> Angle {
        flush(
            self.rotations as i64 + other.rotations as i64,
            self.millidegrees as i64 + other.millidegrees as i64,
        )
    }

    /// `self - other`, normalized. Signed and direction-agnostic.
    pub fn diff(&self, other: &Angle) -> Angle {
        flush(
            self.rotations as i64 - other.rotations as i64,
            self.millidegrees as i64 - other.millidegrees as i64,
        )
    }

    /// Whether `self - other` is small enough to collapse into a plain
    /// `i32` millidegree value.
    pub fn diff_is_small(&self, other: &Angle) -> bool {
        let total = self.total_mdeg() - other.total_mdeg();
        i32::try_from(total).is_ok()
    }

    /// `self - other` collapsed to a plain millidegree integer.
    ///
    /// The difference must fit in 32 bits; callers confirm this with
    /// [`Angle::diff_is_small`] first. A difference that does not fit is a
    /// rejected argument, never a silent wrap.
    pub fn diff_mdeg(&self, other: &Angle) -> Result<i32, MotionError> {
        let total = self.total_mdeg() - other.total_mdeg();
        i32::try_from(total)
            .map_err(|_| MotionError::InvalidArgument("angle difference exceeds 32-bit range"))
    }

    /// `-self`, normalized.
    pub fn negate(&self) -> Angle {
        flush(-(self.rotations as i64), -(self.millidegrees as i64))
    }

    /// Midpoint of `self` and `other`.
    ///
    /// Ties round toward the value of larger magnitude.
    pub fn average(&self, other: &Angle) -> Angle {
        let total = self.total_mdeg() + other.total_mdeg();
        let half = (total + total.signum()) / 2;
        flush(0, half)
    }

    /// Scale down to a low-resolution application unit (e.g. whole degrees),
    /// rounding half away from zero.
    ///
    /// `ctl_steps_per_app_step` is the number of millidegree control steps
    /// per application step; it must be positive.
    pub fn to_low_res(&self, ctl_steps_per_app_step: i32) -> Result<i32, MotionError> {
        if ctl_steps_per_app_step < 1 {
            return Err(MotionError::InvalidArgument("application scale must be positive"));
        }
        let scale = ctl_steps_per_app_step as i64;
        let total = self.total_mdeg();
        let rounded = (total + total.signum() * scale / 2) / scale;
        i32::try_from(rounded)
            .map_err(|_| MotionError::InvalidArgument("angle exceeds application unit range"))
    }

    /// Scale an application-unit value back up to a high-resolution angle.
    pub fn from_low_res(app_value: i32, ctl_steps_per_app_step: i32) -> Result<Angle, MotionError> {
        if ctl_steps_per_app_step < 1 {
            return Err(MotionError::InvalidArgument("application scale must be positive"));
        }
        Ok(flush(0, app_value as i64 * ctl_steps_per_app_step as i64))
    }
}

/// Normalize a wide rotations/millidegrees pair into a valid [`Angle`].
///
/// The split goes through the exact total, so every total has exactly one
/// normalized representation and value equality is structural equality.
/// The rotation count saturates at the `i32` range; saturation only occurs
/// beyond two billion turns, far outside any physical encoder's life.
fn flush(rotations: i64, millidegrees: i64) -> Angle {
    let total = rotations * MDEG_PER_ROTATION as i64 + millidegrees;
    let rot = total / MDEG_PER_ROTATION as i64;
    let mdeg = total % MDEG_PER_ROTATION as i64;
    Angle {
        rotations: rot.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        millidegrees: mdeg as i32,
    }
}
