use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// cancellation and deadline handle passed to long-running calls
///
/// cheap to clone; all clones observe the same cancel flag. iterators and
/// copy loops call [`Context::check`] between steps, and the blob writer
/// translates the deadline into a per-write deadline on its temp file.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Context {
    /// context with no deadline and no cancellation
    pub fn background() -> Self {
        Self::default()
    }

    /// context that expires at the given instant
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// context that expires after the given duration
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// context with an external cancel handle
    pub fn cancellable() -> (Self, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = Self {
            deadline: None,
            cancel: Some(flag.clone()),
        };
        (ctx, CancelHandle(flag))
    }

    /// the deadline, if one was set
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// true once cancelled or past the deadline
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// error if cancelled or past the deadline
    pub fn check(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

/// cancels the associated context when triggered
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}
