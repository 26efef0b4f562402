//! Operator cancellation.
//!
//! A [`CancelHandle`] is held by whoever owns the interrupt source (the CLI
//! wires it to Ctrl-C); every bounded wait holds a [`CancelSignal`] and races
//! it against its own sleeps and probes.

use std::sync::Arc;

use tokio::sync::watch;

/// Sending half: flips the signal once.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiving half, cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
    // Only set by `never()`: keeps the channel open so waits park forever.
    _tx: Option<Arc<watch::Sender<bool>>>,
}

/// Create a connected handle/signal pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx, _tx: None })
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// A new signal observing this handle.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
            _tx: None,
        }
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _tx: Some(Arc::new(tx)),
        }
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested.
    ///
    /// If the handle is dropped without cancelling, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let (handle, signal) = cancellation();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_does_not_fire() {
        let signal = CancelSignal::never();
        let fired = tokio::time::timeout(Duration::from_secs(3600), signal.cancelled()).await;
        assert!(fired.is_err());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_handle_is_not_cancellation() {
        let (handle, signal) = cancellation();
        drop(handle);
        let fired =
            tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(fired.is_err());
    }
}
