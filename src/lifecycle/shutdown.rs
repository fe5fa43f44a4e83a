//! Shutdown coordination.
//!
//! # Responsibilities
//! - Fan a single shutdown signal out to the pool health monitor, the limiter
//!   sweeper and both HTTP listeners
//! - Let `main` close the connection pool only after those tasks have stopped
//!
//! Subscribers created after [`Shutdown::trigger`] do not see the signal, so
//! every task subscribes before it is spawned.

use tokio::sync::broadcast;

pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Broadcast the signal. Returns how many tasks were listening.
    pub fn trigger(&self) -> usize {
        let listening = self.tx.send(()).unwrap_or(0);
        tracing::info!(listening, "Shutdown signal broadcast");
        listening
    }

    /// Tasks still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
