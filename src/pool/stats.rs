//! Pool counters and the stats snapshot served to health endpoints.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::resilience::BreakerSnapshot;

/// Snapshot returned by [`ConnectionPool::stats`](crate::pool::ConnectionPool::stats).
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    /// Idle + active + connections being created or health-checked.
    pub total: usize,
    pub min_connections: usize,
    pub max_connections: usize,
    pub closed: bool,
    pub circuit_breaker: BreakerSnapshot,
    pub connections_created: u64,
    pub connections_reused: u64,
    pub connections_failed: u64,
    pub connections_timeout: u64,
    pub connections_closed: u64,
    pub leaks_detected: u64,
    pub peak_active: usize,
    pub acquisitions: u64,
    pub average_wait_ms: f64,
}

/// Atomic pool stats for concurrent updates
#[derive(Debug, Default)]
pub(crate) struct AtomicPoolStats {
    pub created: AtomicU64,
    pub reused: AtomicU64,
    pub failed: AtomicU64,
    pub timeouts: AtomicU64,
    pub closed: AtomicU64,
    pub leaks: AtomicU64,
    pub acquisitions: AtomicU64,
    pub total_wait_ms: AtomicU64,
    pub peak_active: AtomicUsize,
}

impl AtomicPoolStats {
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_leak(&self) {
        self.leaks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquisition(&self, wait_ms: u64, reused: bool, active_now: usize) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ms.fetch_add(wait_ms, Ordering::Relaxed);
        if reused {
            self.reused.fetch_add(1, Ordering::Relaxed);
        }
        self.peak_active.fetch_max(active_now, Ordering::Relaxed);
    }

    pub fn average_wait_ms(&self) -> f64 {
        let acquisitions = self.acquisitions.load(Ordering::Relaxed);
        if acquisitions == 0 {
            0.0
        } else {
            self.total_wait_ms.load(Ordering::Relaxed) as f64 / acquisitions as f64
        }
    }
}
