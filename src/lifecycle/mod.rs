//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Warm pool → Spawn background tasks → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Listeners drain, background tasks exit → Pool closed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then pool, then listeners
//! - Ordered shutdown: stop accept, drain, close the pool last

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
