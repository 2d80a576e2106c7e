//! Cooperative cancellation for the blocking ring wrappers and producer workers.
//!
//! A shutdown-state/shutdown-signal handle pair built on a plain
//! `AtomicBool` rather than an async `Notify`, since the collaborators here
//! are blocking OS threads, not async tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CancelState {
    cancelled: AtomicBool,
}

/// A cancellation flag shared between a blocking caller and whoever may want
/// to interrupt it.
///
/// Cloning a `CancellationToken` shares the same underlying flag; cancelling
/// any clone cancels all of them.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl CancellationToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if [`cancel`](Self::cancel) has been called on this
    /// token or any of its clones.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
