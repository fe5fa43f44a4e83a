//! incident-api
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ security::middleware ──▶ handler
//!                      (request id,     (blacklist, minute +       │
//!                       trace, timeout)  burst windows)            ▼
//!                                                          pool::ConnectionPool
//!                                                          (idle queue, breaker)
//!                                                                  │
//!                                                                  ▼
//!                                                          db::SqlServerFactory ──▶ SQL Server
//!
//!     Background tasks (stopped by lifecycle::Shutdown):
//!         health::PoolHealthMonitor   evict / top up / leak detection
//!         security::LimiterSweeper    drop idle client state, expired bans
//!         admin listener              stats and blacklist control
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use incident_api::config::load_config;
use incident_api::db::SqlServerFactory;
use incident_api::health::PoolHealthMonitor;
use incident_api::http::server::serve;
use incident_api::lifecycle::signals::shutdown_on_signal;
use incident_api::observability::{logging, metrics};
use incident_api::security::LimiterSweeper;
use incident_api::{ConnectionPool, HttpServer, RateLimiter, Shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .map(PathBuf::from);
    let config = Arc::new(load_config(config_path.as_deref())?);

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "incident-api starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        database = ?config.database,
        min_connections = config.pool.min_connections,
        max_connections = config.pool.max_connections,
        rate_limit_enabled = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let factory = Arc::new(SqlServerFactory::new(
        &config.database,
        config.pool.connect_timeout(),
    )?);
    let pool = ConnectionPool::new(config.pool.clone(), factory);
    pool.warm_up().await;

    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let shutdown = Arc::new(Shutdown::new());

    let monitor = PoolHealthMonitor::new(pool.clone());
    let monitor_task = tokio::spawn(monitor.run(shutdown.subscribe()));

    let sweeper = LimiterSweeper::new(limiter.clone());
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.subscribe()));

    let server = HttpServer::new(config.clone(), pool.clone(), limiter);

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let router = server.admin_router();
        let rx = shutdown.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = serve(router, listener, rx).await {
                tracing::error!(error = %e, "Admin server failed");
            }
        }))
    } else {
        None
    };

    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown_on_signal(&shutdown).await })
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let result = server.run(listener, shutdown.subscribe()).await;

    // The server may also stop on an I/O error; make sure everything else stops too.
    shutdown.trigger();
    signal_task.abort();
    let _ = monitor_task.await;
    let _ = sweeper_task.await;
    if let Some(task) = admin_task {
        let _ = task.await;
    }

    pool.close().await;
    tracing::info!("Shutdown complete");
    result.map_err(Into::into)
}
