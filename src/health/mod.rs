//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Pool monitor (monitor.rs):
//!     Periodic timer
//!     → ConnectionPool::maintain
//!         → evict expired / unresponsive idle connections
//!         → top up to min_connections (skipped while the breaker is open)
//!         → report leaked leases
//! ```
//!
//! # Design Decisions
//! - One monitor task per pool, stopped through the shutdown broadcast
//! - The HTTP health endpoints read pool stats; they never run a maintenance pass

pub mod monitor;

pub use monitor::PoolHealthMonitor;
