//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, peer address captured)
//!     → request.rs (request ID, request metrics)
//!     → security::middleware (rate limiting on API routes)
//!     → handlers (health, stats, pooled query)
//!     → response.rs (error → status code, Retry-After)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
