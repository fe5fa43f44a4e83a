//! Database driver abstraction.
//!
//! # Data Flow
//! ```text
//! pool::ConnectionPool
//!     → ConnectionFactory::connect (new physical connection)
//!     → Connection::ping (liveness probe on borrow / health check)
//!     → Connection::rollback (on release)
//!     → Connection::close (eviction, shutdown)
//! ```
//!
//! # Design Decisions
//! - The pool only depends on these traits; the SQL Server driver is one implementation
//! - Every method is async and may be wrapped in a timeout by the caller

pub mod sqlserver;

use async_trait::async_trait;

use crate::error::DbError;

pub use sqlserver::{SqlServerConnection, SqlServerFactory};

/// A live database connection.
#[async_trait]
pub trait Connection: Send {
    /// Run a trivial query to prove the connection is usable.
    async fn ping(&mut self) -> Result<(), DbError>;

    /// Roll back any transaction left open by the previous borrower.
    async fn rollback(&mut self) -> Result<(), DbError>;

    /// Execute a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError>;

    /// Close the underlying transport.
    async fn close(self: Box<Self>) -> Result<(), DbError>;
}

/// Opens new connections for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError>;

    /// Short label used in logs and metrics.
    fn describe(&self) -> String {
        "database".to_string()
    }
}
