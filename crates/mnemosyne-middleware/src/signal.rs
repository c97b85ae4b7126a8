//! Per-request cancellation.
//!
//! The host fires a request's [`CancellationSignal`] when the client goes
//! away. Response capture checks it before every write and stops persisting
//! and forwarding once it has fired.
//!
//! # Example
//!
//! ```rust
//! use mnemosyne_middleware::CancellationSignal;
//!
//! let signal = CancellationSignal::new();
//! let guard = signal.drop_guard();
//! assert!(!signal.is_cancelled());
//!
//! drop(guard);
//! assert!(signal.is_cancelled());
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::broadcast;

/// A cloneable one-shot cancellation flag with an awaitable notification.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl CancellationSignal {
    /// Creates a signal that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Fires the signal. Later calls are no-ops.
    pub fn cancel(&self) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // No receivers is fine
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a future that completes when the signal fires.
    ///
    /// Completes immediately if it already has.
    pub fn cancelled(&self) -> Cancelled {
        let cancelled = Arc::clone(&self.cancelled);
        // Subscribe before checking the flag so a concurrent cancel is not missed
        let mut receiver = self.sender.subscribe();

        Cancelled {
            wait: Box::pin(async move {
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                match receiver.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    // Every clone was dropped without firing
                    Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
                }
            }),
        }
    }

    /// Returns a guard that fires the signal when dropped.
    ///
    /// Hosts hold the guard in the connection's task so that dropping the
    /// task (client disconnect) cancels the detached request task.
    #[must_use]
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            signal: Some(self.clone()),
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`CancellationSignal::cancelled`].
pub struct Cancelled {
    wait: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl Future for Cancelled {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.wait.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancelled").finish_non_exhaustive()
    }
}

/// Fires its signal on drop unless [`disarm`](Self::disarm)ed.
#[derive(Debug)]
pub struct CancelOnDrop {
    signal: Option<CancellationSignal>,
}

impl CancelOnDrop {
    /// Drops the guard without firing the signal.
    pub fn disarm(mut self) {
        self.signal = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal.cancel();
        }
    }
}
