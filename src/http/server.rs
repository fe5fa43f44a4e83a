//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for health, stats and API handlers
//! - Wire up middleware (tracing, timeout, request ID, rate limiting)
//! - Serve a listener until the shutdown signal fires

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin;
use crate::config::AppConfig;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, track_requests};
use crate::pool::ConnectionPool;
use crate::security::{rate_limit_middleware, RateLimitState, RateLimiter};

const SERVICE_NAME: &str = "incident-api";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: ConnectionPool,
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<AppConfig>,
}

/// HTTP server for the incident API.
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    pub fn new(config: Arc<AppConfig>, pool: ConnectionPool, limiter: Arc<RateLimiter>) -> Self {
        Self {
            state: AppState {
                pool,
                limiter,
                config,
            },
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Public router with all middleware layers.
    ///
    /// Everything under `/api` passes the rate limiter, including paths with
    /// no handler, so scanning clients are counted.
    pub fn router(&self) -> Router {
        let config = &self.state.config;
        let rate_state = RateLimitState {
            limiter: self.state.limiter.clone(),
            trust_forwarded: config.listener.trust_forwarded_headers,
        };

        let api = Router::new()
            .route("/api/status", get(api_status))
            .route("/api/{*rest}", any(api_not_found))
            .route_layer(middleware::from_fn_with_state(rate_state, rate_limit_middleware));

        Router::new()
            .route("/health", get(health))
            .route("/health/db", get(health_db))
            .route("/health/limiter", get(health_limiter))
            .merge(api)
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(middleware::from_fn(track_requests))
                    .layer(TimeoutLayer::with_status_code(
                        StatusCode::REQUEST_TIMEOUT,
                        Duration::from_secs(config.listener.request_timeout_secs),
                    ))
                    .layer(propagate_request_id_layer()),
            )
    }

    /// Admin router (bearer-token protected).
    pub fn admin_router(&self) -> Router {
        admin::setup_admin_router(self.state.clone())
    }

    /// Run the public server on `listener`.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        serve(self.router(), listener, shutdown).await
    }
}

/// Serve `router` until `shutdown` fires, exposing peer addresses to handlers.
pub async fn serve(
    router: Router,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP server starting");

    let app = router.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!(address = %addr, "HTTP server draining");
        })
        .await?;

    tracing::info!(address = %addr, "HTTP server stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Pool stats plus a live probe through the pool.
async fn health_db(State(state): State<AppState>) -> Response {
    let probe = match state.pool.acquire().await {
        Ok(mut conn) => {
            let result = conn.ping().await;
            if result.is_err() {
                conn.mark_failed();
            }
            conn.release().await;
            result.map_err(|e| e.to_string())
        }
        Err(e) => Err(e.to_string()),
    };

    let stats = state.pool.stats();
    match probe {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "pool": stats })),
        )
            .into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "Database health probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "error": error, "pool": stats })),
            )
                .into_response()
        }
    }
}

async fn health_limiter(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "rate_limiter": state.limiter.stats(),
    }))
}

/// Rate-limited endpoint that round-trips a pooled connection.
async fn api_status(State(state): State<AppState>) -> Response {
    let mut conn = match state.pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = conn.ping().await {
        conn.mark_failed();
        conn.release().await;
        tracing::error!(error = %e, "Status query failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "database": "unavailable" })),
        )
            .into_response();
    }
    conn.release().await;

    let stats = state.pool.stats();
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "database": "connected",
        "pool": {
            "idle": stats.idle,
            "active": stats.active,
            "circuit_breaker": stats.circuit_breaker.state,
        },
    }))
    .into_response()
}

async fn api_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not_found", "message": "Unknown API endpoint" })),
    )
        .into_response()
}
