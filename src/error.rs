//! Error types shared by the pool, the rate limiter and the driver layer.

use std::time::Duration;
use thiserror::Error;

/// Driver-level failure talking to the database.
#[derive(Error, Debug)]
pub enum DbError {
    /// TCP connect or login failed.
    #[error("connection error: {0}")]
    Connect(String),

    /// The operation did not complete in time.
    #[error("database operation timed out after {0:?}")]
    Timeout(Duration),

    /// A statement failed on an established connection.
    #[error("query error: {0}")]
    Query(String),

    /// Settings could not be turned into a driver configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure to obtain a pooled connection.
#[derive(Error, Debug)]
pub enum PoolError {
    /// No connection became available before the acquire deadline.
    /// Carries the last creation failure seen while waiting, if any.
    #[error("connection pool timeout after {waited:?}")]
    Timeout {
        waited: Duration,
        #[source]
        last_error: Option<DbError>,
    },

    /// The database is presumed down; creation is suspended.
    #[error("circuit breaker is open, retry in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    Closed,
}

impl PoolError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Timeout { .. })
    }
}

/// Rejection produced by the rate limiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Per-minute or burst limit exceeded.
    #[error("rate limit exceeded for {client_id}")]
    RateLimited {
        client_id: String,
        retry_after: Duration,
    },

    /// Client is on the blacklist.
    #[error("access denied for {client_id}")]
    Blacklisted {
        client_id: String,
        remaining: Duration,
    },
}
