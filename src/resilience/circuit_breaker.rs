//! Circuit breaker guarding database connection creation.
//!
//! # States
//! - Closed: normal operation, connections may be created
//! - Open: database assumed down, creation fails fast
//! - Half-Open: one trial connection decides the next state
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: after cooldown since the last failure
//! Half-Open → Closed: trial connection succeeds
//! Half-Open → Open: trial connection fails
//! ```
//!
//! # Design Decisions
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial in Half-Open (prevents hammering a recovering server)
//! - A trial that never reports back is superseded after another cooldown

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the breaker refused an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Cooling down; callers should fail immediately.
    Open { retry_after: Duration },
    /// Another caller holds the half-open trial.
    TrialInFlight,
}

/// Point-in-time view for stats endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    /// Milliseconds since the last recorded failure.
    pub last_failure_ms_ago: Option<u64>,
}

#[derive(Debug)]
struct BreakerRecord {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_started: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    record: Mutex<BreakerRecord>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self::with_settings(config.failure_threshold, config.cooldown())
    }

    pub fn with_settings(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            record: Mutex::new(BreakerRecord {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_started: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask permission to attempt a connection.
    pub fn try_acquire(&self) -> Result<(), Rejection> {
        let mut record = self.lock();
        let now = Instant::now();

        match record.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let since_failure = record
                    .last_failure
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or(self.cooldown);
                if since_failure >= self.cooldown {
                    record.state = CircuitState::HalfOpen;
                    record.trial_started = Some(now);
                    tracing::info!("Circuit breaker HALF-OPEN, allowing trial connection");
                    Ok(())
                } else {
                    Err(Rejection::Open {
                        retry_after: self.cooldown - since_failure,
                    })
                }
            }
            CircuitState::HalfOpen => match record.trial_started {
                Some(started) if now.saturating_duration_since(started) < self.cooldown => {
                    Err(Rejection::TrialInFlight)
                }
                _ => {
                    record.trial_started = Some(now);
                    Ok(())
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut record = self.lock();
        if record.state != CircuitState::Closed {
            tracing::info!(previous = %record.state, "Circuit breaker CLOSED");
        }
        record.state = CircuitState::Closed;
        record.consecutive_failures = 0;
        record.trial_started = None;
    }

    /// Returns the state after recording the failure.
    pub fn record_failure(&self) -> CircuitState {
        let mut record = self.lock();
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_failure = Some(Instant::now());

        match record.state {
            CircuitState::HalfOpen => {
                record.state = CircuitState::Open;
                record.trial_started = None;
                tracing::error!("Circuit breaker re-OPENED after failed trial connection");
            }
            CircuitState::Closed if record.consecutive_failures >= self.failure_threshold => {
                record.state = CircuitState::Open;
                tracing::error!(
                    failures = record.consecutive_failures,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Circuit breaker OPEN"
                );
            }
            _ => {}
        }
        record.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let record = self.lock();
        BreakerSnapshot {
            state: record.state,
            consecutive_failures: record.consecutive_failures,
            failure_threshold: self.failure_threshold,
            last_failure_ms_ago: record
                .last_failure
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerRecord> {
        self.record.lock().expect("circuit breaker mutex poisoned")
    }
}
