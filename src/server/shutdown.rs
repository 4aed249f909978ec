//! Shutdown coordination for an adapter and its connection tasks.

use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// Every long-running task holds a [`ShutdownSignal`]. The flag is retained,
/// so a task subscribing after [`Shutdown::trigger`] still observes it.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal(self.tx.subscribe())
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolves once shutdown has been triggered.
    pub async fn recv(&mut self) {
        // A dropped sender means the adapter is gone, which is shutdown too.
        let _ = self.0.wait_for(|closed| *closed).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }
}
