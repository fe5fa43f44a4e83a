//! Error-to-response mapping.
//!
//! # Responsibilities
//! - Map pool and limiter errors to HTTP status codes
//! - Attach `Retry-After` where the caller can usefully retry
//! - Keep error bodies JSON and free of internal detail

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;

use crate::error::{PoolError, RateLimitError};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

fn error_response(
    status: StatusCode,
    error: &'static str,
    message: String,
    retry_after: Option<Duration>,
) -> Response {
    // Round up so clients never retry early.
    let retry_secs = retry_after.map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0));
    let body = ErrorBody {
        error,
        message,
        retry_after: retry_secs,
    };
    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = retry_secs {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        match self {
            PoolError::Timeout { last_error, .. } => {
                if let Some(e) = last_error {
                    tracing::error!(error = %e, "Database connection failed");
                }
                error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "pool_timeout",
                    "Database busy, try again later".to_string(),
                    Some(Duration::from_secs(1)),
                )
            }
            PoolError::CircuitOpen { retry_after } => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "circuit_open",
                "Database temporarily unavailable".to_string(),
                Some(retry_after),
            ),
            PoolError::Closed => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "pool_closed",
                "Service shutting down".to_string(),
                None,
            ),
        }
    }
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        match self {
            RateLimitError::RateLimited { retry_after, .. } => error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded".to_string(),
                Some(retry_after),
            ),
            RateLimitError::Blacklisted { .. } => error_response(
                StatusCode::FORBIDDEN,
                "access_denied",
                "Access denied".to_string(),
                None,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = RateLimitError::RateLimited {
            client_id: "ip:1.1.1.1".into(),
            retry_after: Duration::from_millis(1500),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn test_blacklisted_is_forbidden() {
        let response = RateLimitError::Blacklisted {
            client_id: "ip:1.1.1.1".into(),
            remaining: Duration::from_secs(10),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_pool_errors_are_unavailable() {
        let response = PoolError::CircuitOpen { retry_after: Duration::from_secs(30) }.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");

        let response = PoolError::Closed.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_timeout_after_driver_failures_is_retryable_503() {
        let response = PoolError::Timeout {
            waited: Duration::from_secs(30),
            last_error: Some(crate::error::DbError::Connect("login failed".into())),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
