//! Database connection pool.
//!
//! # Data Flow
//! ```text
//! handler
//!     → ConnectionPool::acquire
//!         → idle queue (FIFO, validated before hand-out)
//!         → or CircuitBreaker gate → ConnectionFactory::connect
//!     → PooledConnection (lease tracked for leak detection)
//!     → release / drop → rollback → idle queue or close
//!
//! health::PoolHealthMonitor
//!     → ConnectionPool::maintain (evict, top up, report leaks)
//! ```
//!
//! # Design Decisions
//! - A single mutex guards occupancy; no I/O happens while it is held
//! - Waiters are woken through `Notify`, bounded by the acquire deadline
//! - Creation failures feed the breaker; an open breaker fails acquisitions fast

pub mod connection;
pub mod manager;
pub mod stats;

pub use connection::{ConnectionMeta, PooledConnection};
pub use manager::{ConnectionPool, MaintenanceReport};
pub use stats::PoolStats;
