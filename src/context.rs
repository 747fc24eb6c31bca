//! Cancellation and deadline propagation for terminal calls.
//!
//! The builder never blocks or suspends; a [`Ctx`] exists so that engines
//! behind `DbProxy` can observe cancellation and deadlines. Engines are
//! expected to call [`Ctx::check`] before doing work and at natural
//! checkpoints during it.

use crate::error::DbError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation/deadline token threaded through every terminal call.
///
/// Cheap to clone; clones share the cancellation flag.
///
/// # Example
///
/// ```
/// use dbx::Ctx;
/// use std::time::Duration;
///
/// let ctx = Ctx::with_timeout(Duration::from_secs(5));
/// assert!(ctx.check().is_ok());
///
/// let ctx = Ctx::background();
/// ctx.cancel();
/// assert!(ctx.check().is_err());
/// ```
#[derive(Clone, Debug)]
pub struct Ctx {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Ctx {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context with an absolute deadline.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Derive a context sharing this one's cancellation flag with a
    /// tighter deadline. The resulting deadline is never later than the
    /// parent's.
    pub fn with_child_timeout(&self, timeout: Duration) -> Self {
        let child = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < child => parent,
            _ => child,
        };
        Self {
            deadline: Some(deadline),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Cancel this context (and every clone of it).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Error if the context is cancelled or past its deadline.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Cancelled` or `DbError::DeadlineExceeded`.
    pub fn check(&self) -> Result<(), DbError> {
        if self.is_cancelled() {
            return Err(DbError::Cancelled("context cancelled".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(DbError::DeadlineExceeded(
                    "context deadline passed".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::background()
    }
}
