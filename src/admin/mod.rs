//! Admin control plane.
//!
//! Served on its own listener and protected by a bearer token. Exposes pool
//! and limiter state and manual blacklist control.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/pool", get(get_pool))
        .route("/admin/limiter", get(get_limiter))
        .route("/admin/blacklist", get(get_blacklist))
        .route(
            "/admin/blacklist/{client}",
            post(block_client).delete(unblock_client),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
