//! Infrastructure core of the incident-reporting API: a SQL Server
//! connection pool with a circuit breaker, and a per-client rate limiter
//! with automatic blacklisting, hosted behind an Axum HTTP surface.

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod pool;

pub mod health;
pub mod security;

pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::AppConfig;
pub use error::{DbError, PoolError, RateLimitError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pool::{ConnectionPool, PooledConnection};
pub use security::RateLimiter;
