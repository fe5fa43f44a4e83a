//! Request correlation and accounting.
//!
//! # Responsibilities
//! - Assign each request an `x-request-id` (UUID v4) unless the caller sent one
//! - Echo the id on the response
//! - Count requests by method and status
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};

use crate::observability::metrics;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Layer that stamps incoming requests with a request id.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Layer that copies the request id onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

/// Accessor for the id assigned by [`set_request_id_layer`].
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> &str {
        self.extensions()
            .get::<RequestId>()
            .and_then(|id| id.header_value().to_str().ok())
            .unwrap_or("unknown")
    }
}

/// Middleware recording `http_requests_total`.
pub async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let request_id = request.request_id().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let status = response.status();
    metrics::record_request(method.as_str(), status.as_u16());
    if status.is_server_error() {
        tracing::warn!(request_id = %request_id, method = %method, path = %path, status = status.as_u16(), "Request failed");
    }
    response
}
