//! Cooperative, single-threaded run loop.
//!
//! A fixed set of registered tasks is driven by one global "poll requested"
//! flag, the only cross-context signal in the system. Interrupt-context code
//! (the hardware tick handler) may only set the flag; the run loop clears it
//! and then gives every unfinished task one turn, in registration order. If
//! any task re-requests a poll during its turn, the loop runs again before
//! the caller is allowed to sleep, and an atomic check of the flag
//! immediately before sleeping closes the lost-wakeup race.
//!
//! Tasks are resumable state machines: each `poll` runs to its next yield
//! point and returns, never blocking. Cancellation is an explicit request
//! observed at the task's next poll, never a forced unwind.

use core::sync::atomic::{AtomicBool, Ordering};

use axle_common::error::MotionError;

/// The global poll-request flag.
///
/// Safe to share with interrupt context (or a timer thread standing in for
/// it); setting the flag is the *only* operation allowed from there.
#[derive(Debug, Default)]
pub struct PollFlag {
    pending: AtomicBool,
}

impl PollFlag {
    /// A flag with no poll pending.
    pub const fn new() -> PollFlag {
        PollFlag {
            pending: AtomicBool::new(false),
        }
    }

    /// Request that the run loop polls all tasks.
    #[inline]
    pub fn request_poll(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Whether a poll request is pending. Checked atomically right before
    /// sleeping to avoid losing a wake-up.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Consume a pending request, if any.
    #[inline]
    fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}

/// What a task reports after one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Not finished; poll again on the next pass.
    Again,
    /// Ran to completion; never polled again.
    Complete,
    /// Failed; never polled again.
    Failed(MotionError),
}

/// An explicit request delivered to a task at its next poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRequest {
    /// Stop at the next convenient point.
    Cancel,
}

/// A resumable, non-blocking task.
///
/// Each call advances the task from where it left off and returns without
/// blocking; the task keeps its own position, not a stack.
pub trait Process {
    /// Run one turn at the given time. A pending request, if any, is
    /// delivered exactly once.
    fn poll(&mut self, now: u32, request: Option<ProcessRequest>) -> ProcessStatus;
}

/// A registered task plus its bookkeeping.
///
/// The task collection is owned by whoever composes the system and passed
/// to the scheduler by reference; there are no global task tables.
pub struct TaskSlot<'a> {
    process: &'a mut dyn Process,
    status: ProcessStatus,
    request: Option<ProcessRequest>,
}

impl<'a> TaskSlot<'a> {
    /// Register a task, ready to be polled.
    pub fn new(process: &'a mut dyn Process) -> TaskSlot<'a> {
        TaskSlot {
            process,
            status: ProcessStatus::Again,
            request: None,
        }
    }

    /// The task's last reported status.
    #[inline]
    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    /// Whether the task has completed or failed.
    #[inline]
    pub fn is_finished(&self) -> bool {
        !matches!(self.status, ProcessStatus::Again)
    }

    /// Deliver a request at the task's next poll. The caller should also
    /// request a poll so the task gets a turn soon.
    pub fn make_request(&mut self, request: ProcessRequest) {
        self.request = Some(request);
    }
}

/// The cooperative run loop.
pub struct Scheduler<'a> {
    flag: &'a PollFlag,
}

impl<'a> Scheduler<'a> {
    /// A scheduler driven by the given poll flag.
    pub fn new(flag: &'a PollFlag) -> Scheduler<'a> {
        Scheduler { flag }
    }

    /// Run one pass: if a poll was requested, clear it and give every
    /// unfinished task one turn in registration order.
    ///
    /// Returns whether another poll request is already pending (set from
    /// interrupt context or by a task during its turn).
    pub fn run_once(&mut self, now: u32, tasks: &mut [TaskSlot<'_>]) -> bool {
        if !self.flag.take() {
            return false;
        }
        for slot in tasks.iter_mut() {
            if matches!(slot.status, ProcessStatus::Again) {
                let request = slot.request.take();
                slot.status = slot.process.poll(now, request);
            }
        }
        self.flag.is_pending()
    }

    /// Run passes until no task wants another turn at this instant.
    pub fn run_until_idle(&mut self, now: u32, tasks: &mut [TaskSlot<'_>]) {
        while self.run_once(now, tasks) {}
    }

    /// Whether the caller may enter its low-power wait. Must be the last
    /// check before sleeping: a wake-up arriving after this returns `false`
    /// is handled on the next pass, one arriving before is not lost.
    #[inline]
    pub fn can_sleep(&self) -> bool {
        !self.flag.is_pending()
    }
}

/// A wraparound-safe millisecond timer.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: u32,
    duration: u32,
}

impl Timer {
    /// A timer expiring `duration` ms after `now`.
    pub fn set(now: u32, duration: u32) -> Timer {
        Timer { start: now, duration }
    }

    /// Whether the timer has expired at `now`.
    pub fn is_expired(&self, now: u32) -> bool {
        now.wrapping_sub(self.start.wrapping_add(self.duration)) as i32 >= 0
    }

    /// Push the deadline out by one duration, keeping periodic work
    /// drift-free.
    pub fn extend(&mut self) {
        self.start = self.start.wrapping_add(self.duration);
    }
}
