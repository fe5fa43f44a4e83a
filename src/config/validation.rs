//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, pool bounds ordered)
//! - Require database credentials before the pool starts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::AppConfig;

/// Upper bound for `pool.retry_delay_ms` (one hour).
const MAX_RETRY_DELAY_MS: u64 = 3_600_000;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    let db = &config.database;
    match &db.url {
        Some(raw) => {
            if let Err(e) = url::Url::parse(raw) {
                errors.push(ValidationError::new("database.url", e.to_string()));
            }
        }
        None => {
            if db.host.trim().is_empty() {
                errors.push(ValidationError::new("database.host", "must not be empty"));
            }
            if db.username.is_empty() || db.password.is_empty() {
                errors.push(ValidationError::new(
                    "database.username",
                    "database credentials not configured",
                ));
            }
        }
    }

    let pool = &config.pool;
    if pool.max_connections == 0 {
        errors.push(ValidationError::new("pool.max_connections", "must be > 0"));
    }
    if pool.min_connections > pool.max_connections {
        errors.push(ValidationError::new(
            "pool.min_connections",
            format!(
                "min ({}) exceeds max ({})",
                pool.min_connections, pool.max_connections
            ),
        ));
    }
    for (field, value) in [
        ("pool.acquire_timeout_secs", pool.acquire_timeout_secs),
        ("pool.connect_timeout_secs", pool.connect_timeout_secs),
        ("pool.idle_timeout_secs", pool.idle_timeout_secs),
        ("pool.max_lifetime_secs", pool.max_lifetime_secs),
        ("pool.health_check_interval_secs", pool.health_check_interval_secs),
        ("pool.probe_timeout_secs", pool.probe_timeout_secs),
        ("pool.circuit_breaker.cooldown_secs", pool.circuit_breaker.cooldown_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if pool.retry_delay_ms > MAX_RETRY_DELAY_MS {
        errors.push(ValidationError::new(
            "pool.retry_delay_ms",
            format!("must not exceed {MAX_RETRY_DELAY_MS}"),
        ));
    }
    if pool.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "pool.circuit_breaker.failure_threshold",
            "must be > 0",
        ));
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if rl.requests_per_minute == 0 {
            errors.push(ValidationError::new("rate_limit.requests_per_minute", "must be > 0"));
        }
        if rl.burst_limit == 0 {
            errors.push(ValidationError::new("rate_limit.burst_limit", "must be > 0"));
        }
        if rl.burst_window_ms == 0 {
            errors.push(ValidationError::new("rate_limit.burst_window_ms", "must be > 0"));
        }
        if rl.blacklist_threshold == 0 {
            errors.push(ValidationError::new("rate_limit.blacklist_threshold", "must be > 0"));
        }
        if rl.sweep_interval_secs == 0 {
            errors.push(ValidationError::new("rate_limit.sweep_interval_secs", "must be > 0"));
        }
        if rl.path_scan_unique_paths > rl.path_scan_window {
            errors.push(ValidationError::new(
                "rate_limit.path_scan_unique_paths",
                "cannot exceed path_scan_window",
            ));
        }
        for (route, limits) in &rl.routes {
            if !route.starts_with('/') {
                errors.push(ValidationError::new("rate_limit.routes", format!("route {route:?} must start with '/'")));
            }
            if limits.requests_per_minute == Some(0) || limits.burst_limit == Some(0) {
                errors.push(ValidationError::new("rate_limit.routes", format!("limits for {route} must be > 0")));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if config.admin.enabled {
        if config.admin.api_key.len() < 16 {
            errors.push(ValidationError::new("admin.api_key", "must be at least 16 characters"));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
