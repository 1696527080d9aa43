use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-agent stop request, polled by the agent loop between tasks.
///
/// Clones share the same flag. `take` consumes a pending request, so each
/// request is observed exactly once.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Read and clear in one step.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}
