//! Periodic cleanup of limiter state.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::security::rate_limit::RateLimiter;

pub struct LimiterSweeper {
    limiter: Arc<RateLimiter>,
    interval: Duration,
}

impl LimiterSweeper {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        let interval = Duration::from_secs(limiter.config().sweep_interval_secs);
        Self { limiter, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Rate limiter sweeper starting");

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.limiter.purge_stale(Instant::now());
                    if report.windows_removed > 0 || report.blacklist_expired > 0 {
                        tracing::debug!(
                            windows_removed = report.windows_removed,
                            blacklist_expired = report.blacklist_expired,
                            "Rate limiter sweep complete"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limiter sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
