//! Bounded connection pool with circuit breaker.
//!
//! # Responsibilities
//! - Hand out validated connections, bounding idle + active + in-flight creations by `max_connections`
//! - Fail fast while the circuit breaker is open
//! - Roll back and recycle connections on release
//! - Provide the maintenance pass run by the health monitor

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::db::{Connection, ConnectionFactory};
use crate::error::{DbError, PoolError};
use crate::observability::audit::{self, SecurityEvent};
use crate::observability::metrics;
use crate::pool::connection::{ConnectionMeta, IdleEntry, PooledConnection};
use crate::pool::stats::{AtomicPoolStats, PoolStats};
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::{CircuitBreaker, CircuitState, Rejection};

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Idle connections that passed validation.
    pub validated: usize,
    /// Idle connections closed for expiry or a failed probe.
    pub evicted: usize,
    /// Connections created to reach the configured minimum.
    pub created: usize,
    /// Leases currently held longer than the leak threshold.
    pub leaked: Vec<u64>,
}

struct Lease {
    acquired_at: Instant,
    reported: bool,
}

struct PoolState {
    idle: VecDeque<IdleEntry>,
    /// Checked out, or being created / validated on behalf of an acquirer.
    active: usize,
    /// Held by the maintenance pass.
    reserved: usize,
    leases: HashMap<u64, Lease>,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.active + self.reserved
    }
}

enum Step {
    Validate(IdleEntry),
    Create,
    CircuitOpen(Duration),
    Wait,
}

#[derive(Clone, Copy)]
enum Slot {
    Active,
    Reserved,
}

/// Occupancy counted in [`PoolState`] on behalf of work that has not finished yet.
///
/// Whatever the guard still holds when it is dropped is subtracted again and
/// a waiter is woken, so a cancelled acquire, release or maintenance pass
/// cannot strand a slot.
struct Claim<'a> {
    inner: &'a PoolInner,
    slot: Slot,
    held: usize,
}

impl<'a> Claim<'a> {
    /// One `active` unit the caller has just counted.
    fn active(inner: &'a PoolInner) -> Self {
        Self {
            inner,
            slot: Slot::Active,
            held: 1,
        }
    }

    /// `held` units of `reserved` the caller has just counted.
    fn reserved(inner: &'a PoolInner, held: usize) -> Self {
        Self {
            inner,
            slot: Slot::Reserved,
            held,
        }
    }

    /// The unit now belongs to a [`PooledConnection`].
    fn hand_over(&mut self) {
        self.held = self.held.saturating_sub(1);
    }

    /// Uncount one unit inside an already locked state.
    fn settle(&mut self, state: &mut PoolState) {
        if self.held == 0 {
            return;
        }
        self.held -= 1;
        match self.slot {
            Slot::Active => state.active = state.active.saturating_sub(1),
            Slot::Reserved => state.reserved = state.reserved.saturating_sub(1),
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.held == 0 {
            return;
        }
        let inner = self.inner;
        let held = self.held;
        {
            let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            for _ in 0..held {
                self.settle(&mut state);
            }
        }
        for _ in 0..held {
            inner.available.notify_one();
        }
    }
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    available: Notify,
    breaker: CircuitBreaker,
    stats: AtomicPoolStats,
    next_lease: AtomicU64,
    closed: AtomicBool,
}

/// Shared handle to the pool. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create an empty pool. Call [`warm_up`](Self::warm_up) to pre-create `min_connections`.
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let breaker = CircuitBreaker::new(&config.circuit_breaker);
        let capacity = config.max_connections;
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(capacity),
                    active: 0,
                    reserved: 0,
                    leases: HashMap::new(),
                }),
                available: Notify::new(),
                breaker,
                stats: AtomicPoolStats::default(),
                next_lease: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Pre-create `min_connections`. Failures are logged and do not abort startup.
    pub async fn warm_up(&self) -> usize {
        tracing::info!(
            database = %self.inner.factory.describe(),
            min_connections = self.inner.config.min_connections,
            "Initializing connection pool"
        );
        let created = self.inner.fill_to_minimum().await;
        if created < self.inner.config.min_connections {
            tracing::warn!(
                created,
                wanted = self.inner.config.min_connections,
                "Connection pool started below its minimum size"
            );
        }
        created
    }

    /// Check out a connection, waiting up to `acquire_timeout`.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let inner = &self.inner;
        let started = Instant::now();
        let deadline = started + inner.config.acquire_timeout();
        let retry_delay = Duration::from_millis(inner.config.retry_delay_ms);
        let mut create_attempts = 0u32;
        let mut last_error: Option<DbError> = None;

        loop {
            if inner.closed.load(Ordering::Acquire) {
                return Err(PoolError::Closed);
            }

            // Registered before inspecting state so a release in between is not lost.
            let notified = inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut state = inner.lock_state();
                if let Some(entry) = state.idle.pop_front() {
                    state.active += 1;
                    Step::Validate(entry)
                } else if state.total() < inner.config.max_connections {
                    match inner.breaker.try_acquire() {
                        Ok(()) => {
                            state.active += 1;
                            Step::Create
                        }
                        Err(Rejection::Open { retry_after }) => Step::CircuitOpen(retry_after),
                        Err(Rejection::TrialInFlight) => Step::Wait,
                    }
                } else {
                    Step::Wait
                }
            };

            match step {
                Step::Validate(mut entry) => {
                    let mut claim = Claim::active(inner);
                    if inner.is_usable(&mut entry).await {
                        claim.hand_over();
                        return Ok(inner.checkout(entry.conn, entry.meta, true, started));
                    }
                    inner.close_conn(entry.conn).await;
                }
                Step::Create => {
                    let mut claim = Claim::active(inner);
                    match inner.create(deadline).await {
                        Ok(conn) => {
                            claim.hand_over();
                            let meta = ConnectionMeta::new(Instant::now());
                            return Ok(inner.checkout(conn, meta, false, started));
                        }
                        Err(e) => {
                            drop(claim);
                            create_attempts += 1;
                            tracing::error!(attempt = create_attempts, error = %e, "Error creating new connection");
                            last_error = Some(e);

                            let delay =
                                calculate_backoff(create_attempts, retry_delay, inner.config.max_retries);
                            let wake = Instant::now().checked_add(delay).map_or(deadline, |at| at.min(deadline));
                            tokio::time::sleep_until(wake).await;
                        }
                    }
                }
                Step::CircuitOpen(retry_after) => {
                    return Err(PoolError::CircuitOpen { retry_after });
                }
                Step::Wait => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(inner.timed_out(started, last_error));
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(inner.timed_out(started, last_error));
            }
        }
    }

    /// Validate idle connections, top up to the minimum and flag leaked leases.
    pub async fn maintain(&self) -> MaintenanceReport {
        self.inner.maintain().await
    }

    /// Close every idle connection and refuse further acquisitions.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Closing all pooled connections");

        let drained: Vec<IdleEntry> = {
            let mut state = self.inner.lock_state();
            let drained = state.idle.drain(..).collect();
            drained
        };
        for entry in drained {
            self.inner.close_conn(entry.conn).await;
        }
        self.inner.available.notify_waiters();
        self.inner.publish_occupancy();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let (idle, active, total) = {
            let state = inner.lock_state();
            (state.idle.len(), state.active, state.total())
        };
        let s = &inner.stats;
        PoolStats {
            idle,
            active,
            total,
            min_connections: inner.config.min_connections,
            max_connections: inner.config.max_connections,
            closed: inner.closed.load(Ordering::Acquire),
            circuit_breaker: inner.breaker.snapshot(),
            connections_created: s.created.load(Ordering::Relaxed),
            connections_reused: s.reused.load(Ordering::Relaxed),
            connections_failed: s.failed.load(Ordering::Relaxed),
            connections_timeout: s.timeouts.load(Ordering::Relaxed),
            connections_closed: s.closed.load(Ordering::Relaxed),
            leaks_detected: s.leaks.load(Ordering::Relaxed),
            peak_active: s.peak_active.load(Ordering::Relaxed),
            acquisitions: s.acquisitions.load(Ordering::Relaxed),
            average_wait_ms: s.average_wait_ms(),
        }
    }
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("connection pool mutex poisoned")
    }

    fn publish_occupancy(&self) {
        let (idle, active) = {
            let state = self.lock_state();
            (state.idle.len(), state.active)
        };
        metrics::record_pool_occupancy(idle, active);
    }

    fn timed_out(&self, started: Instant, last_error: Option<DbError>) -> PoolError {
        self.stats.record_timeout();
        metrics::record_pool_event("timeout");
        let waited = started.elapsed();
        match &last_error {
            Some(e) => tracing::warn!(
                waited_ms = waited.as_millis() as u64,
                error = %e,
                "Connection pool timeout after failed connection attempts"
            ),
            None => tracing::warn!(waited_ms = waited.as_millis() as u64, "Connection pool timeout"),
        }
        PoolError::Timeout { waited, last_error }
    }

    /// Open a connection under the breaker. The caller already holds a slot.
    async fn create(&self, deadline: Instant) -> Result<Box<dyn Connection>, DbError> {
        let attempt = tokio::time::timeout_at(deadline, self.factory.connect()).await;
        let result = match attempt {
            Ok(Ok(mut conn)) => match conn.ping().await {
                Ok(()) => Ok(conn),
                Err(e) => {
                    let _ = conn.close().await;
                    Err(e)
                }
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DbError::Timeout(self.config.connect_timeout())),
        };

        match &result {
            Ok(_) => {
                self.breaker.record_success();
                self.stats.record_created();
                metrics::record_pool_event("created");
            }
            Err(_) => {
                self.stats.record_failed();
                metrics::record_pool_event("failed");
                self.breaker.record_failure();
            }
        }
        metrics::record_circuit_state(self.breaker.state());
        result
    }

    async fn is_usable(&self, entry: &mut IdleEntry) -> bool {
        let now = Instant::now();
        if entry
            .meta
            .is_expired(now, self.config.max_lifetime(), self.config.idle_timeout())
        {
            tracing::debug!(
                age_secs = entry.meta.age(now).as_secs(),
                idle_secs = entry.meta.idle_for(now).as_secs(),
                "Pooled connection expired"
            );
            return false;
        }

        match tokio::time::timeout(self.config.probe_timeout(), entry.conn.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Pooled connection failed liveness probe");
                false
            }
            Err(_) => {
                tracing::warn!("Pooled connection liveness probe timed out");
                false
            }
        }
    }

    fn checkout(
        self: &Arc<Self>,
        conn: Box<dyn Connection>,
        mut meta: ConnectionMeta,
        reused: bool,
        started: Instant,
    ) -> PooledConnection {
        let now = Instant::now();
        meta.last_used = now;
        meta.usage_count += 1;

        let lease_id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        let (idle, active) = {
            let mut state = self.lock_state();
            state.leases.insert(
                lease_id,
                Lease {
                    acquired_at: now,
                    reported: false,
                },
            );
            (state.idle.len(), state.active)
        };

        let wait = now.saturating_duration_since(started);
        self.stats
            .record_acquisition(wait.as_millis() as u64, reused, active);
        if reused {
            metrics::record_pool_event("reused");
        }
        metrics::record_acquire_wait(wait);
        metrics::record_pool_occupancy(idle, active);

        PooledConnection::new(conn, meta, lease_id, self.clone())
    }

    async fn close_conn(&self, conn: Box<dyn Connection>) {
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Error closing connection");
        }
        self.stats.record_closed();
        metrics::record_pool_event("closed");
    }

    pub(crate) async fn release(
        &self,
        mut conn: Box<dyn Connection>,
        mut meta: ConnectionMeta,
        lease_id: u64,
        success: bool,
    ) {
        let mut claim = Claim::active(self);
        let now = Instant::now();
        let held_for = {
            let mut state = self.lock_state();
            state
                .leases
                .remove(&lease_id)
                .map(|lease| now.saturating_duration_since(lease.acquired_at))
        };
        if held_for.is_none() {
            tracing::warn!(lease_id, "Release of unknown lease");
        }

        let reusable = !self.closed.load(Ordering::Acquire)
            && success
            && !meta.is_expired(now, self.config.max_lifetime(), self.config.idle_timeout());

        let reusable = reusable
            && match tokio::time::timeout(self.config.probe_timeout(), conn.rollback()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!(lease_id, error = %e, "Rollback on release failed, closing connection");
                    false
                }
                Err(_) => {
                    tracing::warn!(lease_id, "Rollback on release timed out, closing connection");
                    false
                }
            };

        if !reusable {
            self.close_conn(conn).await;
            drop(claim);
            self.publish_occupancy();
            return;
        }

        meta.last_used = Instant::now();
        let overflow = {
            let mut state = self.lock_state();
            claim.settle(&mut state);
            if !self.closed.load(Ordering::Acquire)
                && state.idle.len() < self.config.max_connections
            {
                state.idle.push_back(IdleEntry { conn, meta });
                None
            } else {
                Some(conn)
            }
        };
        self.available.notify_one();

        if let Some(conn) = overflow {
            self.close_conn(conn).await;
        }
        self.publish_occupancy();
    }

    /// Synchronous fallback when a handle is dropped outside a runtime.
    pub(crate) fn discard(&self, conn: Box<dyn Connection>, lease_id: u64) {
        {
            let mut state = self.lock_state();
            state.leases.remove(&lease_id);
            state.active = state.active.saturating_sub(1);
        }
        drop(conn);
        self.stats.record_closed();
        self.available.notify_one();
    }

    async fn maintain(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        if self.closed.load(Ordering::Acquire) {
            return report;
        }

        let drained: Vec<IdleEntry> = {
            let mut state = self.lock_state();
            let drained: Vec<IdleEntry> = state.idle.drain(..).collect();
            state.reserved += drained.len();
            drained
        };

        let mut claim = Claim::reserved(self, drained.len());
        for mut entry in drained {
            if self.is_usable(&mut entry).await {
                report.validated += 1;
                let mut state = self.lock_state();
                claim.settle(&mut state);
                state.idle.push_back(entry);
            } else {
                report.evicted += 1;
                self.close_conn(entry.conn).await;
                claim.settle(&mut self.lock_state());
            }
            self.available.notify_one();
        }
        drop(claim);

        report.created = self.fill_to_minimum().await;
        report.leaked = self.detect_leaks();

        if report.evicted > 0 {
            tracing::info!(evicted = report.evicted, "Health check: cleaned expired connections");
        }
        self.publish_occupancy();
        metrics::record_circuit_state(self.breaker.state());
        report
    }

    /// Create idle connections until the pool holds `min_connections`.
    async fn fill_to_minimum(&self) -> usize {
        let deficit = {
            let mut state = self.lock_state();
            let wanted = self.config.min_connections.saturating_sub(state.total());
            let room = self.config.max_connections.saturating_sub(state.total());
            let deficit = wanted.min(room);
            state.reserved += deficit;
            deficit
        };

        let mut claim = Claim::reserved(self, deficit);
        let deadline = Instant::now() + self.config.connect_timeout();
        let mut created = 0;
        for _ in 0..deficit {
            if self.closed.load(Ordering::Acquire) || self.breaker.try_acquire().is_err() {
                break;
            }
            match self.create(deadline).await {
                Ok(conn) => {
                    created += 1;
                    let entry = IdleEntry {
                        conn,
                        meta: ConnectionMeta::new(Instant::now()),
                    };
                    {
                        let mut state = self.lock_state();
                        claim.settle(&mut state);
                        state.idle.push_back(entry);
                    }
                    self.available.notify_one();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not top up connection pool");
                    break;
                }
            }
        }

        drop(claim);
        created
    }

    fn detect_leaks(&self) -> Vec<u64> {
        let now = Instant::now();
        let threshold = self.config.leak_threshold();
        let mut leaked = Vec::new();
        let mut newly_reported = Vec::new();

        {
            let mut state = self.lock_state();
            for (id, lease) in state.leases.iter_mut() {
                let held = now.saturating_duration_since(lease.acquired_at);
                if held > threshold {
                    leaked.push(*id);
                    if !lease.reported {
                        lease.reported = true;
                        newly_reported.push((*id, held));
                    }
                }
            }
        }

        for (lease_id, held) in newly_reported {
            self.stats.record_leak();
            metrics::record_pool_event("leak");
            tracing::warn!(
                lease_id,
                held_secs = held.as_secs(),
                "Possible connection leak detected"
            );
            audit::emit(&SecurityEvent::ConnectionLeak {
                lease_id,
                held_secs: held.as_secs(),
            });
        }

        leaked.sort_unstable();
        leaked
    }
}
