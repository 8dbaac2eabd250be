//! Cooperative cancellation shared between the abort input and workflows.

use portable_atomic::{AtomicBool, Ordering};

use core::time::Duration;

use crate::io::{ControlInput, MonotonicInstant, Timebase};

/// Latched abort request.
///
/// The engine sets it when the operator presses the abort key; every
/// workflow loop checks it and unwinds. Workflows clear it when they start.
#[derive(Debug)]
pub struct CancelToken {
    requested: AtomicBool,
}

impl CancelToken {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.requested.store(false, Ordering::Release);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Value of an operation the operator may cut short.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Interruptible<T> {
    Completed(T),
    Aborted,
}

impl<T> Interruptible<T> {
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Interruptible::Aborted)
    }

    /// Converts to an `Option`, mapping an abort to `None`.
    #[must_use]
    pub fn completed(self) -> Option<T> {
        match self {
            Interruptible::Completed(value) => Some(value),
            Interruptible::Aborted => None,
        }
    }
}

/// Checks the token and the abort input.
///
/// A fresh abort press latches the token and waits for the key to be let go
/// so the same press is not seen again by the next prompt.
pub fn abort_observed<C>(control: &mut C, token: &CancelToken) -> bool
where
    C: ControlInput,
{
    if token.is_cancelled() {
        return true;
    }
    if control.abort_requested() {
        token.cancel();
        control.wait_release();
        return true;
    }
    false
}

/// Waits for `duration` while watching for an abort.
pub fn pause<T, C>(
    timebase: &mut T,
    control: &mut C,
    token: &CancelToken,
    duration: Duration,
) -> Interruptible<()>
where
    T: Timebase,
    C: ControlInput,
{
    let started = timebase.now();
    loop {
        if abort_observed(control, token) {
            return Interruptible::Aborted;
        }
        if timebase.now().saturating_duration_since(started) >= duration {
            return Interruptible::Completed(());
        }
    }
}
