//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client_id.rs (user id, trusted forwarding header, or peer address)
//!     → middleware.rs
//!         → blacklist.rs (403 while barred)
//!         → rate_limit.rs (minute window + burst window, 429 on excess)
//!         → patterns.rs (path-scan detection adds violations)
//!     → Pass to handler
//!
//! sweeper.rs:
//!     Periodic timer → drop idle client windows and expired bans
//! ```
//!
//! # Design Decisions
//! - State is per process and in memory; limits are not shared across instances
//! - Violations accumulate until the client is blacklisted or goes idle
//! - Fail closed: a blacklisted client is rejected before any accounting

pub mod blacklist;
pub mod client_id;
pub mod middleware;
pub mod patterns;
pub mod rate_limit;
pub mod sweeper;

pub use blacklist::{Blacklist, BlacklistEntry};
pub use client_id::{identify_client, AuthenticatedUser};
pub use middleware::{rate_limit_middleware, RateLimitState};
pub use rate_limit::{LimiterStats, RateLimiter, RateLimits, SweepReport};
pub use sweeper::LimiterSweeper;
