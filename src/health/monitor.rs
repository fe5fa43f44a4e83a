//! Periodic pool maintenance.
//!
//! # Responsibilities
//! - Run `ConnectionPool::maintain` on a fixed interval
//! - Exit when the shutdown signal fires

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::pool::ConnectionPool;

pub struct PoolHealthMonitor {
    pool: ConnectionPool,
    interval: Duration,
}

impl PoolHealthMonitor {
    pub fn new(pool: ConnectionPool) -> Self {
        let interval = pool.config().health_check_interval();
        Self { pool, interval }
    }

    pub fn with_interval(pool: ConnectionPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Pool health monitor starting"
        );

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.pool.is_closed() {
                        break;
                    }
                    let report = self.pool.maintain().await;
                    tracing::debug!(
                        validated = report.validated,
                        evicted = report.evicted,
                        created = report.created,
                        leaked = report.leaked.len(),
                        "Pool health check complete"
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pool health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
