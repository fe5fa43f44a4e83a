//! Pooled connection handle.
//!
//! # Responsibilities
//! - Own a checked-out connection for exactly one caller
//! - Carry lifecycle metadata (created, last used, usage count)
//! - Return the connection to the pool on release or drop

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::db::Connection;
use crate::pool::manager::PoolInner;

/// Lifecycle metadata tracked for every physical connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionMeta {
    pub created_at: Instant,
    pub last_used: Instant,
    pub usage_count: u64,
}

impl ConnectionMeta {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            created_at: now,
            last_used: now,
            usage_count: 0,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Too old, or idle for too long.
    pub fn is_expired(&self, now: Instant, max_lifetime: Duration, idle_timeout: Duration) -> bool {
        self.age(now) > max_lifetime || self.idle_for(now) > idle_timeout
    }
}

/// An idle connection owned by the pool.
pub(crate) struct IdleEntry {
    pub conn: Box<dyn Connection>,
    pub meta: ConnectionMeta,
}

/// A connection checked out of the pool.
///
/// Release it with [`PooledConnection::release`]; dropping it returns the
/// connection through the same path on a background task.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    meta: ConnectionMeta,
    lease_id: u64,
    success: bool,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    pub(crate) fn new(
        conn: Box<dyn Connection>,
        meta: ConnectionMeta,
        lease_id: u64,
        pool: Arc<PoolInner>,
    ) -> Self {
        Self {
            conn: Some(conn),
            meta,
            lease_id,
            success: true,
            pool,
        }
    }

    pub fn lease_id(&self) -> u64 {
        self.lease_id
    }

    pub fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }

    /// Mark the unit of work as failed; the connection is closed on release.
    pub fn mark_failed(&mut self) {
        self.success = false;
    }

    pub fn is_healthy(&self) -> bool {
        self.success
    }

    /// Return the connection to the pool.
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool
                .release(conn, self.meta, self.lease_id, self.success)
                .await;
        }
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_deref()
            .expect("connection already returned")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("connection already returned")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let pool = self.pool.clone();
        let (meta, lease_id, success) = (self.meta, self.lease_id, self.success);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.release(conn, meta, lease_id, success).await;
                });
            }
            Err(_) => pool.discard(conn, lease_id),
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("lease_id", &self.lease_id)
            .field("meta", &self.meta)
            .field("success", &self.success)
            .finish()
    }
}
