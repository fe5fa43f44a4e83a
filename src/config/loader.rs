//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { key: String, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { key, value } => {
                write!(f, "Invalid value for {}: {:?}", key, value)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load configuration: optional TOML file, then environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(ConfigError::Parse)?
        }
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply the deployment environment variables on top of `config`.
///
/// `lookup` abstracts `std::env::var` so overrides can be exercised without
/// mutating the process environment.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("DB_HOST") { config.database.host = v; }
    env.parse("DB_PORT", &mut config.database.port)?;
    if let Some(v) = env.string("DB_DATABASE") { config.database.database = v; }
    if let Some(v) = env.string("DB_USERNAME") { config.database.username = v; }
    if let Some(v) = env.string("DB_PASSWORD") { config.database.password = v; }
    if let Some(v) = env.string("DATABASE_URL") { config.database.url = Some(v); }
    env.flag("DB_ENCRYPT", &mut config.database.encrypt)?;
    env.flag("DB_TRUST_SERVER_CERTIFICATE", &mut config.database.trust_server_certificate)?;

    env.parse("DB_POOL_MIN", &mut config.pool.min_connections)?;
    env.parse("DB_POOL_MAX", &mut config.pool.max_connections)?;
    if env.parse("DB_CONNECTION_TIMEOUT", &mut config.pool.acquire_timeout_secs)? {
        config.pool.connect_timeout_secs = config.pool.acquire_timeout_secs;
    }
    env.parse("DB_IDLE_TIMEOUT", &mut config.pool.idle_timeout_secs)?;
    env.parse("DB_MAX_RETRIES", &mut config.pool.max_retries)?;
    let mut retry_delay_secs = 0u64;
    if env.parse("DB_RETRY_DELAY", &mut retry_delay_secs)? {
        config.pool.retry_delay_ms = retry_delay_secs.saturating_mul(1000);
    }
    env.parse("DB_HEALTH_CHECK_INTERVAL", &mut config.pool.health_check_interval_secs)?;
    env.parse("DB_CIRCUIT_BREAKER_THRESHOLD", &mut config.pool.circuit_breaker.failure_threshold)?;
    env.parse("DB_CIRCUIT_BREAKER_TIMEOUT", &mut config.pool.circuit_breaker.cooldown_secs)?;
    env.flag("DB_ENABLE_METRICS", &mut config.observability.metrics_enabled)?;

    env.flag("ENABLE_RATE_LIMIT", &mut config.rate_limit.enabled)?;
    env.parse("RATE_LIMIT_PER_MINUTE", &mut config.rate_limit.requests_per_minute)?;
    env.parse("RATE_LIMIT_BURST", &mut config.rate_limit.burst_limit)?;
    env.parse("BLACKLIST_THRESHOLD", &mut config.rate_limit.blacklist_threshold)?;
    env.parse("BLACKLIST_DURATION", &mut config.rate_limit.blacklist_duration_secs)?;

    if let Some(v) = env.string("BIND_ADDRESS") { config.listener.bind_address = v; }
    if let Some(v) = env.string("LOG_LEVEL") { config.observability.log_level = v; }
    if let Some(v) = env.string("ADMIN_API_KEY") {
        config.admin.api_key = v;
        config.admin.enabled = true;
    }

    Ok(())
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    /// Returns true when the variable was present and applied.
    fn parse<T: FromStr>(&self, key: &str, target: &mut T) -> Result<bool, ConfigError> {
        match self.string(key) {
            Some(raw) => {
                *target = raw.trim().parse().map_err(|_| ConfigError::Env {
                    key: key.to_string(),
                    value: raw.clone(),
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn flag(&self, key: &str, target: &mut bool) -> Result<bool, ConfigError> {
        match self.string(key) {
            Some(raw) => {
                *target = match raw.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => true,
                    "false" | "0" | "no" | "off" => false,
                    _ => {
                        return Err(ConfigError::Env {
                            key: key.to_string(),
                            value: raw,
                        })
                    }
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_pool_and_limiter() {
        let mut config = AppConfig::default();
        let lookup = lookup_from(&[
            ("DB_HOST", "10.0.0.5"),
            ("DB_POOL_MIN", "2"),
            ("DB_POOL_MAX", "8"),
            ("DB_CONNECTION_TIMEOUT", "7"),
            ("DB_RETRY_DELAY", "2"),
            ("RATE_LIMIT_PER_MINUTE", "42"),
            ("ENABLE_RATE_LIMIT", "false"),
        ]);

        apply_env_overrides(&mut config, lookup).unwrap();

        assert_eq!(config.database.host, "10.0.0.5");
        assert_eq!(config.pool.min_connections, 2);
        assert_eq!(config.pool.max_connections, 8);
        assert_eq!(config.pool.acquire_timeout_secs, 7);
        assert_eq!(config.pool.connect_timeout_secs, 7);
        assert_eq!(config.pool.retry_delay_ms, 2000);
        assert_eq!(config.rate_limit.requests_per_minute, 42);
        assert!(!config.rate_limit.enabled);
    }

    #[test]
    fn test_huge_retry_delay_saturates_and_fails_validation() {
        let mut config = AppConfig::default();
        let lookup = lookup_from(&[("DB_RETRY_DELAY", "18446744073709551615")]);

        apply_env_overrides(&mut config, lookup).unwrap();

        assert_eq!(config.pool.retry_delay_ms, u64::MAX);
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "pool.retry_delay_ms"));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, lookup_from(&[("DB_POOL_MAX", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref key, .. } if key == "DB_POOL_MAX"));
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, lookup_from(&[("DB_HOST", "  ")])).unwrap();
        assert_eq!(config.database.host, "localhost");
    }

    #[test]
    fn test_toml_sections_deserialize() {
        let raw = r#"
            [pool]
            max_connections = 4
            [pool.circuit_breaker]
            failure_threshold = 2
            [rate_limit]
            burst_limit = 3
            [observability]
            log_format = "json"
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.pool.min_connections, 10);
        assert_eq!(config.pool.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.rate_limit.burst_limit, 3);
        assert_eq!(config.observability.log_format, crate::config::LogFormat::Json);
    }
}
