use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

// ---------------------------------------------------------------------------
// AbortSignal: cooperative per-request cancellation
// ---------------------------------------------------------------------------

/// One-shot cancellation flag shared by everything serving one request.
///
/// The caller (or a disconnected client) calls [`abort`](Self::abort). Work
/// that can stop mid-flight awaits [`aborted`](Self::aborted) inside a
/// `select!`; everything else polls [`is_aborted`](Self::is_aborted) at its
/// next checkpoint.
///
/// ```ignore
/// let signal = AbortSignal::new();
///
/// tokio::select! {
///     _ = signal.aborted() => { /* stop forwarding */ }
///     chunk = stream.next() => { /* forward */ }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AbortSignal {
    trigger: broadcast::Sender<()>,
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(1);
        Self {
            trigger,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if abort has been requested (non-blocking).
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Request abort. Idempotent.
    pub fn abort(&self) {
        if self
            .aborted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            debug!("abort signal triggered");
            let _ = self.trigger.send(());
        }
    }

    /// Resolve once abort has been requested.
    pub async fn aborted(&self) {
        let mut rx = self.trigger.subscribe();
        // Subscribe before checking the flag so a concurrent abort is not lost.
        if self.is_aborted() {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}
