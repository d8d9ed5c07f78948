//! Cooperative pause/cancel control and progress reporting.
//!
//! Long-running operations poll a shared [`CopyController`] at block
//! boundaries. A UI thread holds its own handle to the same controller and
//! requests pause or cancellation; the worker observes the request the next
//! time it finishes a block. Cancellation is two-tier: a plain cancel is
//! granted only while the operation is in a phase where nothing has been
//! overwritten yet, and is otherwise denied (the caller may then escalate to
//! a force-cancel, accepting a possibly inconsistent destination).
//!
//! Progress reporting is separate from control: a callback receives
//! `(bytes_done, bytes_total, current_name)` roughly once per copied block.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Reporting callback: `(bytes_done, bytes_total, current_name)`.
pub type ProgressFn<'a> = dyn FnMut(u64, u64, &str) + 'a;

/// State of a cooperative copy control handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CopyState {
    /// No request pending.
    Running = 0,
    /// The controller asked the worker to pause.
    PauseRequested = 1,
    /// The worker acknowledged the pause and is sleeping.
    Paused = 2,
    /// The controller asked the worker to cancel if still safe.
    CancelRequested = 3,
    /// The worker granted the cancel and stopped; nothing was corrupted.
    CancelGranted = 4,
    /// The worker denied the cancel (already in an unsafe phase) and is
    /// still running. The controller may escalate to [`CopyState::ForceCancel`].
    CancelDenied = 5,
    /// Stop immediately regardless of safety.
    ForceCancel = 6,
}

impl CopyState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::PauseRequested,
            2 => Self::Paused,
            3 => Self::CancelRequested,
            4 => Self::CancelGranted,
            5 => Self::CancelDenied,
            _ => Self::ForceCancel,
        }
    }
}

/// How a cancelled operation was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    /// Cancelled in a safe phase; source and destination are intact.
    Safe,
    /// Force-cancelled; the destination may be partially written.
    Forced,
}

/// Shared pause/cancel control handle.
///
/// Clone it freely; all clones observe and drive the same state.
#[derive(Debug, Clone, Default)]
pub struct CopyController {
    state: Arc<AtomicU8>,
}

impl CopyController {
    /// Creates a controller in the [`CopyState::Running`] state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> CopyState {
        CopyState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, s: CopyState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// Asks the worker to pause at the next block boundary.
    pub fn request_pause(&self) {
        self.set(CopyState::PauseRequested);
    }

    /// Resumes a paused (or pause-requested) worker.
    pub fn resume(&self) {
        self.set(CopyState::Running);
    }

    /// Asks the worker to cancel if it is still safe to do so. Observe the
    /// outcome via [`CopyController::state`]: `CancelGranted` or
    /// `CancelDenied`.
    pub fn request_cancel(&self) {
        self.set(CopyState::CancelRequested);
    }

    /// Stops the worker at the next block boundary regardless of safety.
    pub fn force_cancel(&self) {
        self.set(CopyState::ForceCancel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_running() {
        let ctl = CopyController::new();
        assert_eq!(ctl.state(), CopyState::Running);
    }

    #[test]
    fn test_clones_share_state() {
        let ctl = CopyController::new();
        let other = ctl.clone();
        ctl.request_pause();
        assert_eq!(other.state(), CopyState::PauseRequested);
        other.resume();
        assert_eq!(ctl.state(), CopyState::Running);
    }

    #[test]
    fn test_cancel_transitions() {
        let ctl = CopyController::new();
        ctl.request_cancel();
        assert_eq!(ctl.state(), CopyState::CancelRequested);
        ctl.force_cancel();
        assert_eq!(ctl.state(), CopyState::ForceCancel);
    }
}
