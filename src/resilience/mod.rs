//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connection creation:
//!     → circuit_breaker.rs (refuse fast while the database is presumed down)
//!     → On failure: backoff.rs (jittered delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline (enforced by the pool)
//! - Circuit breaker prevents cascading failures
//! - Jittered backoff prevents thundering herd on recovery

pub mod backoff;
pub mod circuit_breaker;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState, Rejection};
