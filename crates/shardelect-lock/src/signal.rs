//! One-shot cancellation signal shared by a lock and its tasks

use std::sync::Arc;

use tokio::sync::watch;

/// A one-shot cancellation signal.
///
/// Closing is idempotent, the closed state is queryable, and every task
/// waiting in [`Done::closed`] is woken by the first close. Clones share the
/// same underlying state.
#[derive(Clone, Debug)]
pub struct Done {
    tx: Arc<watch::Sender<bool>>,
}

impl Done {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Close the signal. Subsequent closes are no-ops.
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has been closed.
    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal is closed. Returns immediately if it already is.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for Done {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_open() {
        let done = Done::new();
        assert!(!done.is_closed());
    }

    #[test]
    fn test_close_is_idempotent() {
        let done = Done::new();
        done.close();
        done.close();
        assert!(done.is_closed());
    }

    #[test]
    fn test_clones_share_state() {
        let done = Done::new();
        let other = done.clone();
        other.close();
        assert!(done.is_closed());
    }

    #[tokio::test]
    async fn test_closed_returns_immediately_when_already_closed() {
        let done = Done::new();
        done.close();
        tokio::time::timeout(Duration::from_millis(100), done.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_wakes_every_waiter() {
        let done = Done::new();
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let done = done.clone();
            waiters.push(tokio::spawn(async move { done.closed().await }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        done.close();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_millis(100), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
