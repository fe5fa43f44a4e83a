//! Connection pool behaviour against a mock database, in paused time.

use std::time::Duration;
use tokio::time::Instant;

use incident_api::config::CircuitBreakerConfig;
use incident_api::resilience::CircuitState;
use incident_api::{DbError, PoolError, PooledConnection};

mod common;
use common::{mock_pool, pool_config};

#[tokio::test(start_paused = true)]
async fn test_max_connections_bounds_concurrent_acquires() {
    let (pool, db) = mock_pool(pool_config(0, 2));
    let start = Instant::now();

    let (a, b, c) = tokio::join!(pool.acquire(), pool.acquire(), pool.acquire());
    let results = [a, b, c];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let timeouts = results
        .iter()
        .filter(|r| matches!(r, Err(PoolError::Timeout { .. })))
        .count();
    assert_eq!(ok, 2);
    assert_eq!(timeouts, 1);
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(db.connects(), 2);
    assert_eq!(pool.stats().connections_timeout, 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_after_failed_creations_is_timeout() {
    let mut config = pool_config(0, 2);
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 1000,
        cooldown_secs: 60,
    };
    let (pool, db) = mock_pool(config);
    db.set_fail_connect(true);
    let start = Instant::now();

    let err = pool.acquire().await.unwrap_err();
    assert!(
        matches!(
            err,
            PoolError::Timeout {
                last_error: Some(DbError::Connect(_)),
                ..
            }
        ),
        "{err:?}"
    );
    assert!(err.is_retryable());
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(db.connects() > 1);
    assert_eq!(pool.circuit_state(), CircuitState::Closed);

    let stats = pool.stats();
    assert_eq!(stats.connections_timeout, 1);
    assert_eq!(stats.total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_acquire_frees_its_slot() {
    let (pool, db) = mock_pool(pool_config(0, 1));
    db.set_connect_delay(Duration::from_millis(500));

    let cancelled = tokio::time::timeout(Duration::from_millis(100), pool.acquire()).await;
    assert!(cancelled.is_err());
    let stats = pool.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.total, 0);

    db.set_connect_delay(Duration::ZERO);
    let before = Instant::now();
    let conn = pool.acquire().await.unwrap();
    assert_eq!(before.elapsed(), Duration::ZERO);
    assert_eq!(db.connects(), 2);
    conn.release().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_release_frees_its_slot() {
    let (pool, db) = mock_pool(pool_config(0, 1));
    let conn = pool.acquire().await.unwrap();
    db.set_rollback_delay(Duration::from_millis(500));

    let cancelled = tokio::time::timeout(Duration::from_millis(100), conn.release()).await;
    assert!(cancelled.is_err());
    let stats = pool.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.total, 0);

    db.set_rollback_delay(Duration::ZERO);
    let conn = pool.acquire().await.unwrap();
    assert_eq!(db.connects(), 2);
    conn.release().await;
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_release_reuses_connection() {
    let (pool, db) = mock_pool(pool_config(0, 2));

    let conn = pool.acquire().await.unwrap();
    conn.release().await;
    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.meta().usage_count, 2);
    conn.release().await;

    let stats = pool.stats();
    assert_eq!(db.connects(), 1);
    assert_eq!(stats.connections_reused, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_handle_closed_on_release() {
    let (pool, db) = mock_pool(pool_config(0, 2));

    let mut conn = pool.acquire().await.unwrap();
    conn.mark_failed();
    conn.release().await;

    assert_eq!(db.closes(), 1);
    assert_eq!(pool.stats().idle, 0);
    assert_eq!(pool.stats().total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_rollback_closes_connection() {
    let (pool, db) = mock_pool(pool_config(0, 2));
    db.fail_rollback.store(true, std::sync::atomic::Ordering::SeqCst);

    pool.acquire().await.unwrap().release().await;

    assert_eq!(db.closes(), 1);
    assert_eq!(pool.stats().total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_handle_returns_to_pool() {
    let (pool, db) = mock_pool(pool_config(0, 2));

    drop(pool.acquire().await.unwrap());
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.active, 0);
    assert_eq!(db.closes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_occupancy_never_exceeds_max() {
    let max = 3;
    let (pool, _db) = mock_pool(pool_config(0, max));
    let mut held: Vec<PooledConnection> = Vec::new();

    for step in 0..20 {
        if step % 3 == 2 {
            if let Some(conn) = held.pop() {
                conn.release().await;
            }
        } else if held.len() < max {
            held.push(pool.acquire().await.unwrap());
        }
        let stats = pool.stats();
        assert!(stats.total <= max, "step {step}: {stats:?}");
        assert!(stats.idle + stats.active <= max);
        assert_eq!(stats.active, held.len());
    }
}

#[tokio::test(start_paused = true)]
async fn test_waiter_woken_by_release() {
    let (pool, db) = mock_pool(pool_config(0, 1));
    let held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|c| c.lease_id()) })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    held.release().await;

    assert!(waiter.await.unwrap().is_ok());
    assert_eq!(db.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_threshold_and_recovers() {
    let (pool, db) = mock_pool(pool_config(0, 2));
    db.set_fail_connect(true);

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::CircuitOpen { .. }), "{err:?}");
    assert_eq!(db.connects(), 3);
    assert_eq!(pool.circuit_state(), CircuitState::Open);

    // Open circuit: fail fast without touching the database.
    let before = Instant::now();
    assert!(matches!(pool.acquire().await, Err(PoolError::CircuitOpen { .. })));
    assert_eq!(before.elapsed(), Duration::ZERO);
    assert_eq!(db.connects(), 3);

    tokio::time::advance(Duration::from_secs(61)).await;
    db.set_fail_connect(false);

    let conn = pool.acquire().await.unwrap();
    assert_eq!(db.connects(), 4);
    assert_eq!(pool.circuit_state(), CircuitState::Closed);
    assert_eq!(pool.stats().circuit_breaker.consecutive_failures, 0);
    conn.release().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens_breaker() {
    let (pool, db) = mock_pool(pool_config(0, 2));
    db.set_fail_connect(true);
    let _ = pool.acquire().await;

    tokio::time::advance(Duration::from_secs(61)).await;
    let err = pool.acquire().await.unwrap_err();

    assert!(matches!(err, PoolError::CircuitOpen { .. }), "{err:?}");
    assert_eq!(db.connects(), 4);
    assert_eq!(pool.circuit_state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_expired_idle_connection_replaced() {
    let (pool, db) = mock_pool(pool_config(0, 2));

    pool.acquire().await.unwrap().release().await;
    tokio::time::advance(Duration::from_secs(301)).await;
    pool.acquire().await.unwrap().release().await;

    assert_eq!(db.connects(), 2);
    assert_eq!(db.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dead_idle_connection_replaced() {
    let (pool, db) = mock_pool(pool_config(0, 2));

    pool.acquire().await.unwrap().release().await;
    db.kill_existing();
    let conn = pool.acquire().await.unwrap();

    assert_eq!(db.connects(), 2);
    assert_eq!(db.closes(), 1);
    assert_eq!(pool.stats().connections_reused, 0);
    conn.release().await;
}

#[tokio::test(start_paused = true)]
async fn test_warm_up_and_maintain_tops_up() {
    let (pool, db) = mock_pool(pool_config(2, 5));

    assert_eq!(pool.warm_up().await, 2);
    assert_eq!(pool.stats().idle, 2);

    db.kill_existing();
    let report = pool.maintain().await;
    assert_eq!(report.validated, 0);
    assert_eq!(report.evicted, 2);
    assert_eq!(report.created, 2);
    assert_eq!(pool.stats().idle, 2);
    assert_eq!(db.connects(), 4);

    let report = pool.maintain().await;
    assert_eq!(report.validated, 2);
    assert_eq!(report.created, 0);
}

#[tokio::test(start_paused = true)]
async fn test_maintain_skips_top_up_while_breaker_open() {
    let (pool, db) = mock_pool(pool_config(1, 5));
    db.set_fail_connect(true);
    let _ = pool.acquire().await;
    assert_eq!(pool.circuit_state(), CircuitState::Open);

    let report = pool.maintain().await;
    assert_eq!(report.created, 0);
    assert_eq!(db.connects(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_leaked_lease_reported_once() {
    let (pool, _db) = mock_pool(pool_config(0, 2));
    let conn = pool.acquire().await.unwrap();

    assert!(pool.maintain().await.leaked.is_empty());
    tokio::time::advance(Duration::from_secs(301)).await;

    let report = pool.maintain().await;
    assert_eq!(report.leaked, vec![conn.lease_id()]);
    let report = pool.maintain().await;
    assert_eq!(report.leaked, vec![conn.lease_id()]);
    assert_eq!(pool.stats().leaks_detected, 1);

    conn.release().await;
    assert!(pool.maintain().await.leaked.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_rejects_acquire_and_closes_returned_handles() {
    let (pool, db) = mock_pool(pool_config(2, 4));
    pool.warm_up().await;
    let held = pool.acquire().await.unwrap();

    pool.close().await;
    assert_eq!(db.closes(), 1);
    assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));

    held.release().await;
    assert_eq!(db.closes(), 2);
    let stats = pool.stats();
    assert!(stats.closed);
    assert_eq!(stats.total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_runs_until_shutdown() {
    use incident_api::health::PoolHealthMonitor;
    use incident_api::Shutdown;

    let (pool, db) = mock_pool(pool_config(2, 4));
    let shutdown = Shutdown::new();
    let monitor = PoolHealthMonitor::with_interval(pool.clone(), Duration::from_secs(1));
    let task = tokio::spawn(monitor.run(shutdown.subscribe()));

    // First pass tops the empty pool up to its minimum.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(pool.stats().idle, 2);

    db.kill_existing();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pool.stats().idle, 2);
    assert_eq!(db.connects(), 4);

    shutdown.trigger();
    task.await.unwrap();
}
