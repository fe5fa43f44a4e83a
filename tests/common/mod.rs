//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use std::sync::Arc;
use tokio::net::TcpListener;

use incident_api::config::{AppConfig, CircuitBreakerConfig, PoolConfig};
use incident_api::db::{Connection, ConnectionFactory};
use incident_api::http::server::serve;
use incident_api::{ConnectionPool, DbError, HttpServer, RateLimiter, Shutdown};

/// Observable state shared by a mock factory and every connection it opened.
#[derive(Debug, Default)]
pub struct MockDb {
    pub connects: AtomicU32,
    pub fail_connect: AtomicBool,
    pub fail_rollback: AtomicBool,
    pub pings: AtomicU32,
    pub rollbacks: AtomicU32,
    pub closes: AtomicU32,
    /// Latency added to every connect, in milliseconds.
    connect_delay_ms: AtomicU64,
    /// Latency added to every rollback, in milliseconds.
    rollback_delay_ms: AtomicU64,
    /// Connections with an id below this fail their liveness probe.
    dead_below: AtomicU32,
}

impl MockDb {
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_rollback_delay(&self, delay: Duration) {
        self.rollback_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every connection opened so far unresponsive.
    pub fn kill_existing(&self) {
        self.dead_below
            .store(self.connects.load(Ordering::SeqCst) + 1, Ordering::SeqCst);
    }
}

pub struct MockConnection {
    id: u32,
    db: Arc<MockDb>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn ping(&mut self) -> Result<(), DbError> {
        self.db.pings.fetch_add(1, Ordering::SeqCst);
        if self.id < self.db.dead_below.load(Ordering::SeqCst) {
            Err(DbError::Query("connection reset by peer".into()))
        } else {
            Ok(())
        }
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.db.rollbacks.fetch_add(1, Ordering::SeqCst);
        let delay = self.db.rollback_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.db.fail_rollback.load(Ordering::SeqCst) {
            Err(DbError::Query("rollback failed".into()))
        } else {
            Ok(())
        }
    }

    async fn execute(&mut self, _sql: &str) -> Result<u64, DbError> {
        Ok(1)
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.db.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockFactory {
    db: Arc<MockDb>,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let id = self.db.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.db.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.db.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::Connect("connection refused".into()));
        }
        Ok(Box::new(MockConnection {
            id,
            db: self.db.clone(),
        }))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

pub fn mock_factory() -> (Arc<MockFactory>, Arc<MockDb>) {
    let db = Arc::new(MockDb::default());
    (Arc::new(MockFactory { db: db.clone() }), db)
}

/// Pool settings sized for tests: no warm connections, short acquire timeout.
pub fn pool_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min_connections: min,
        max_connections: max,
        acquire_timeout_secs: 1,
        connect_timeout_secs: 1,
        retry_delay_ms: 100,
        max_retries: 3,
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown_secs: 60,
        },
        ..PoolConfig::default()
    }
}

pub fn mock_pool(config: PoolConfig) -> (ConnectionPool, Arc<MockDb>) {
    let (factory, db) = mock_factory();
    (ConnectionPool::new(config, factory), db)
}

/// A running public + admin server backed by a mock database.
pub struct TestApp {
    pub addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub pool: ConnectionPool,
    pub limiter: Arc<RateLimiter>,
    pub db: Arc<MockDb>,
    pub shutdown: Shutdown,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.admin_addr, path)
    }
}

pub const ADMIN_KEY: &str = "test-admin-key-0123456789";

pub async fn start_app(mut config: AppConfig) -> TestApp {
    config.pool = pool_config(1, 4);
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    let config = Arc::new(config);

    let (pool, db) = mock_pool(config.pool.clone());
    pool.warm_up().await;
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let server = HttpServer::new(config, pool.clone(), limiter.clone());
    let shutdown = Shutdown::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();

    tokio::spawn(serve(server.admin_router(), admin_listener, shutdown.subscribe()));
    tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestApp {
        addr,
        admin_addr,
        pool,
        limiter,
        db,
        shutdown,
    }
}
