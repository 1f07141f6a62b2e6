//! Per-connection cancellation scope.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio_util::sync::CancellationToken;

/// Close signal shared by a connection's reader, writer, and the engine.
///
/// `close` may be called from any of them, any number of times; exactly one call observes
/// `true`.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the close. Returns `true` only for the call that actually closed.
    pub fn close(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once the signal has been closed.
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}
