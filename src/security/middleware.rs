//! Axum middleware enforcing the rate limiter.

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::RateLimitError;
use crate::observability::audit::{self, SecurityEvent};
use crate::security::client_id::{identify_client, AuthenticatedUser};
use crate::security::rate_limit::RateLimiter;

/// State for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub trust_forwarded: bool,
}

/// Reject blacklisted clients with 403 and over-limit clients with 429.
///
/// Install with `route_layer` so the matched route is known and per-route
/// limits apply.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.limiter.is_enabled() {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_id = identify_client(
        request.extensions().get::<AuthenticatedUser>(),
        request.headers(),
        peer,
        state.trust_forwarded,
    );
    let limits = state
        .limiter
        .limits_for_route(request.extensions().get::<MatchedPath>().map(MatchedPath::as_str));
    let path = request.uri().path().to_string();

    match state.limiter.admit(&client_id, &path, limits) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            let reason = match &err {
                RateLimitError::Blacklisted { .. } => "blacklisted",
                RateLimitError::RateLimited { .. } => "rate_limited",
            };
            audit::emit(&SecurityEvent::RequestBlocked {
                client_id,
                reason,
                method: request.method().to_string(),
                path,
            });
            err.into_response()
        }
    }
}
