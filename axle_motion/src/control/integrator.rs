//! Error integrators with windup pausing.
//!
//! Two integrator regimes back the two command families:
//!
//! - [`PositionIntegrator`] accumulates position error over time for
//!   position-based maneuvers. While paused it also freezes the *reference
//!   time*, so a stalled motor consumes trajectory time only when it is
//!   actually free to move.
//! - [`SpeedIntegrator`] implements integral speed control exactly, as the
//!   difference between the reference position and the traveled position,
//!   for time-based maneuvers.
//!
//! Pausing is driven by the control loop when the proportional term
//! saturates: integrating further would only wind up error that the
//! actuator cannot act on.

/// Time-based accumulator of position error [mdeg·ms].
#[derive(Debug, Clone)]
pub struct PositionIntegrator {
    running: bool,
    /// When the current pause began; valid while `!running`.
    pause_begin: u32,
    /// Total paused time so far [ms].
    paused_total: u32,
    /// Accumulated error [mdeg·ms].
    integral: i64,
}

impl PositionIntegrator {
    /// A fresh integrator, running, with zero accumulation.
    pub fn new() -> PositionIntegrator {
        PositionIntegrator {
            running: true,
            pause_begin: 0,
            paused_total: 0,
            integral: 0,
        }
    }

    /// Restart with zero accumulation and no paused time.
    pub fn reset(&mut self) {
        *self = PositionIntegrator::new();
    }

    /// The trajectory evaluation time: wall time minus all paused time.
    pub fn ref_time(&self, now: u32) -> u32 {
        let paused = if self.running {
            self.paused_total
        } else {
            self.paused_total
                .wrapping_add(now.wrapping_sub(self.pause_begin))
        };
        now.wrapping_sub(paused)
    }

    /// Stop accumulating and freeze the reference time. Idempotent.
    pub fn pause(&mut self, now: u32) {
        if self.running {
            self.running = false;
            self.pause_begin = now;
        }
    }

    /// Resume accumulating. Idempotent.
    pub fn resume(&mut self, now: u32) {
        if !self.running {
            self.paused_total = self
                .paused_total
                .wrapping_add(now.wrapping_sub(self.pause_begin));
            self.running = true;
        }
    }

    /// Whether accumulation is paused.
    #[inline]
    pub fn paused(&self) -> bool {
        !self.running
    }

    /// Accumulate one tick of error and return the new integral [mdeg·ms].
    ///
    /// Errors inside the deadzone are ignored; the per-tick contribution is
    /// bounded by `change_max` and the total by `integral_max`.
    pub fn update(
        &mut self,
        error: i32,
        deadzone: i32,
        change_max: i32,
        tick_ms: u32,
        integral_max: i64,
    ) -> i64 {
        if self.running {
            let shrunk = if error.abs() <= deadzone {
                0
            } else {
                error - error.signum() * deadzone
            };
            let bounded = shrunk.clamp(-change_max, change_max) as i64;
            self.integral =
                (self.integral + bounded * tick_ms as i64).clamp(-integral_max, integral_max);
        }
        self.integral
    }

    /// Current accumulation [mdeg·ms].
    #[inline]
    pub fn integral(&self) -> i64 {
        self.integral
    }
}

/// Exact speed integral for time-based maneuvers.
///
/// The integral of the speed error is the position error, so this tracks
/// reference and traveled positions [mdeg] since the last (re)start and
/// banks the difference across pauses.
#[derive(Debug, Clone)]
pub struct SpeedIntegrator {
    running: bool,
    /// Error banked across pauses [mdeg].
    banked: i64,
    /// Traveled position at the last (re)start [mdeg].
    start_position: i64,
    /// Reference position at the last (re)start [mdeg].
    start_ref: i64,
}

impl SpeedIntegrator {
    /// Start integrating from the given positions.
    pub fn new(position: i64, ref_position: i64) -> SpeedIntegrator {
        SpeedIntegrator {
            running: true,
            banked: 0,
            start_position: position,
            start_ref: ref_position,
        }
    }

    /// Restart from the given positions, discarding banked error.
    pub fn reset(&mut self, position: i64, ref_position: i64) {
        *self = SpeedIntegrator::new(position, ref_position);
    }

    /// The accumulated speed-error integral [mdeg].
    pub fn get(&self, position: i64, ref_position: i64) -> i64 {
        if self.running {
            self.banked + (ref_position - self.start_ref) - (position - self.start_position)
        } else {
            self.banked
        }
    }

    /// Bank the current value and stop integrating. Idempotent.
    pub fn pause(&mut self, position: i64, ref_position: i64) {
        if self.running {
            self.banked = self.get(position, ref_position);
            self.running = false;
        }
    }

    /// Resume integrating from the given positions. Idempotent.
    pub fn resume(&mut self, position: i64, ref_position: i64) {
        if !self.running {
            self.start_position = position;
            self.start_ref = ref_position;
            self.running = true;
        }
    }

    /// Whether accumulation is paused.
    #[inline]
    pub fn paused(&self) -> bool {
        !self.running
    }
}
