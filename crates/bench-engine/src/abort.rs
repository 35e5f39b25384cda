//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared abort flag.
///
/// Clones observe the same flag. The scan checks it between points and
/// between instrument polls; a move or acquisition already in flight always
/// runs to completion.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    requested: Arc<AtomicBool>,
}

impl AbortSignal {
    /// A signal that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn abort(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// True once [`abort`](Self::abort) was called on any clone.
    pub fn is_aborted(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
