//! Shutdown coordination for a worker's listeners.

use std::sync::Arc;

use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// Backed by a watch channel so listeners that subscribe after the trigger
/// still observe it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Future resolving once shutdown has been triggered.
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.wait_for(|triggered| *triggered).await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .expect("wait should resolve after trigger");
    }

    #[tokio::test]
    async fn test_wait_blocks_until_trigger() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.wait();
        let pending = tokio::time::timeout(Duration::from_millis(50), waiter).await;
        assert!(pending.is_err());

        let waiter = shutdown.wait();
        let clone = shutdown.clone();
        tokio::spawn(async move { clone.trigger() });
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap();
    }
}
