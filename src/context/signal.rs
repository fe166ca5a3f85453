//! Single-fire completion signal.
//!
//! Used for HTTP request completion and WebSocket close. Any number of
//! tasks may wait; firing is idempotent and only the first call reports
//! that it changed anything.

use std::sync::Arc;

use tokio::sync::watch;

/// A one-shot, multi-waiter completion flag.
#[derive(Debug, Clone)]
pub struct DoneSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for DoneSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl DoneSignal {
    /// Creates an unfired signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fires the signal.
    ///
    /// Returns `true` only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        let mut fired = false;
        self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                fired = true;
                true
            }
        });
        fired
    }

    /// Returns `true` once fired.
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until fired. Returns immediately if already fired.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    #[test]
    fn test_fire_is_idempotent() {
        let signal = DoneSignal::new();
        assert!(!signal.is_done());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_done());
    }

    #[tokio::test]
    async fn test_wait_after_fire_returns() {
        let signal = DoneSignal::new();
        signal.fire();
        timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("already fired");
    }

    #[tokio::test]
    async fn test_multiple_waiters_released() {
        let signal = DoneSignal::new();
        let a = tokio::spawn({
            let signal = signal.clone();
            async move { signal.wait().await }
        });
        let b = tokio::spawn({
            let signal = signal.clone();
            async move { signal.wait().await }
        });

        tokio::task::yield_now().await;
        signal.fire();

        timeout(Duration::from_secs(1), async {
            a.await.unwrap();
            b.await.unwrap();
        })
        .await
        .expect("both waiters released");
    }
}
