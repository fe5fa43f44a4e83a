//! Per-client rate limiting with automatic blacklisting.
//!
//! # Algorithm
//! Each client has a fixed one-minute window counter plus a deque of request
//! timestamps inside the burst window. A request passes only if both have
//! room; rejected requests are not counted. Every rejection adds a violation,
//! and a client reaching `blacklist_threshold` violations is barred for
//! `blacklist_duration`.
//!
//! The fixed window can admit up to twice the per-minute limit across a
//! window boundary.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::error::RateLimitError;
use crate::observability::audit::{self, SecurityEvent};
use crate::observability::metrics;
use crate::security::blacklist::{Blacklist, BlacklistEntry};
use crate::security::patterns::PathScanDetector;

const MINUTE: Duration = Duration::from_secs(60);

/// Limits applied to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub per_minute: u32,
    pub burst: u32,
}

impl RateLimits {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        Self { per_minute, burst }
    }
}

impl From<&RateLimitConfig> for RateLimits {
    fn from(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_minute, config.burst_limit)
    }
}

struct ClientWindow {
    window_start: Instant,
    count: u32,
    burst: VecDeque<Instant>,
    recent_paths: VecDeque<String>,
    last_seen: Instant,
}

impl ClientWindow {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            burst: VecDeque::new(),
            recent_paths: VecDeque::new(),
            last_seen: now,
        }
    }
}

#[derive(Debug, Default)]
struct LimiterCounters {
    total: AtomicU64,
    allowed: AtomicU64,
    rate_limited: AtomicU64,
    blacklist_rejections: AtomicU64,
    auto_blacklisted: AtomicU64,
    path_scans: AtomicU64,
}

/// Snapshot returned by [`RateLimiter::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub burst_limit: u32,
    pub total_requests: u64,
    pub allowed: u64,
    pub rate_limited: u64,
    pub blacklist_rejections: u64,
    pub auto_blacklisted: u64,
    pub path_scans: u64,
    pub tracked_clients: usize,
    pub blacklisted_clients: usize,
    pub clients_with_violations: usize,
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub windows_removed: usize,
    pub blacklist_expired: usize,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, ClientWindow>,
    violations: DashMap<String, u32>,
    blacklist: Blacklist,
    detector: PathScanDetector,
    counters: LimiterCounters,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let detector = PathScanDetector::new(config.path_scan_window, config.path_scan_unique_paths);
        Self {
            config,
            windows: DashMap::new(),
            violations: DashMap::new(),
            blacklist: Blacklist::new(),
            detector,
            counters: LimiterCounters::default(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn default_limits(&self) -> RateLimits {
        RateLimits::from(&self.config)
    }

    /// Limits for a matched route path, falling back to the global ones.
    pub fn limits_for_route(&self, route: Option<&str>) -> RateLimits {
        let defaults = self.default_limits();
        match route.and_then(|r| self.config.routes.get(r)) {
            Some(over) => RateLimits {
                per_minute: over.requests_per_minute.unwrap_or(defaults.per_minute),
                burst: over.burst_limit.unwrap_or(defaults.burst),
            },
            None => defaults,
        }
    }

    /// Count a request against the default limits. `false` means rejected.
    pub fn check_and_record(&self, client_id: &str) -> bool {
        self.check_with(client_id, self.default_limits())
    }

    pub fn check_with(&self, client_id: &str, limits: RateLimits) -> bool {
        self.check_at(client_id, limits, Instant::now()).is_ok()
    }

    /// Count a request at `now`. On rejection returns the time until the
    /// exhausted limit has room again, after recording a violation.
    pub fn check_at(&self, client_id: &str, limits: RateLimits, now: Instant) -> Result<(), Duration> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let verdict = self.account(client_id, limits, now);
        match verdict {
            Ok(()) => {
                self.counters.allowed.fetch_add(1, Ordering::Relaxed);
                metrics::record_rate_limit_decision("allowed");
            }
            Err(_) => {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                metrics::record_rate_limit_decision("rate_limited");
                tracing::warn!(client_id = %client_id, "Rate limit exceeded");
                self.record_violations(client_id, 1, now);
            }
        }
        verdict
    }

    fn account(&self, client_id: &str, limits: RateLimits, now: Instant) -> Result<(), Duration> {
        let burst_window = self.config.burst_window();
        let mut window = self
            .windows
            .entry(client_id.to_string())
            .or_insert_with(|| ClientWindow::new(now));
        window.last_seen = now;

        if now.saturating_duration_since(window.window_start) > MINUTE {
            window.window_start = now;
            window.count = 0;
        }
        if window.count >= limits.per_minute {
            let reset_at = window.window_start + MINUTE;
            return Err(reset_at.saturating_duration_since(now).max(Duration::from_secs(1)));
        }

        while let Some(&oldest) = window.burst.front() {
            if now.saturating_duration_since(oldest) > burst_window {
                window.burst.pop_front();
            } else {
                break;
            }
        }
        if window.burst.len() >= limits.burst as usize {
            let free_at = window.burst.front().map(|t| *t + burst_window).unwrap_or(now);
            return Err(free_at.saturating_duration_since(now).max(Duration::from_secs(1)));
        }

        window.count += 1;
        window.burst.push_back(now);
        Ok(())
    }

    /// Blacklist check, accounting and path-scan detection for one request.
    pub fn admit(&self, client_id: &str, path: &str, limits: RateLimits) -> Result<(), RateLimitError> {
        self.admit_at(client_id, path, limits, Instant::now())
    }

    pub fn admit_at(
        &self,
        client_id: &str,
        path: &str,
        limits: RateLimits,
        now: Instant,
    ) -> Result<(), RateLimitError> {
        if let Some(remaining) = self.blacklist.remaining(client_id, now) {
            self.counters.blacklist_rejections.fetch_add(1, Ordering::Relaxed);
            metrics::record_rate_limit_decision("blacklisted");
            return Err(RateLimitError::Blacklisted {
                client_id: client_id.to_string(),
                remaining,
            });
        }

        self.check_at(client_id, limits, now)
            .map_err(|retry_after| RateLimitError::RateLimited {
                client_id: client_id.to_string(),
                retry_after,
            })?;

        self.observe_path(client_id, path, now);
        Ok(())
    }

    fn observe_path(&self, client_id: &str, path: &str, now: Instant) {
        let scanned = match self.windows.get_mut(client_id) {
            Some(mut window) => self.detector.observe(&mut window.recent_paths, path),
            None => None,
        };
        if let Some(paths) = scanned {
            self.counters.path_scans.fetch_add(1, Ordering::Relaxed);
            audit::emit(&SecurityEvent::PathScanning {
                client_id: client_id.to_string(),
                paths,
            });
            self.record_violations(client_id, self.config.path_scan_penalty, now);
        }
    }

    pub fn is_blacklisted(&self, client_id: &str) -> bool {
        self.blacklist.contains(client_id, Instant::now())
    }

    pub fn violations(&self, client_id: &str) -> u32 {
        self.violations.get(client_id).map(|v| *v).unwrap_or(0)
    }

    /// Add violations; returns `true` when this pushed the client onto the blacklist.
    pub fn record_violations(&self, client_id: &str, count: u32, now: Instant) -> bool {
        let total = {
            let mut entry = self.violations.entry(client_id.to_string()).or_insert(0);
            *entry = entry.saturating_add(count);
            *entry
        };
        if total < self.config.blacklist_threshold {
            return false;
        }

        self.violations.remove(client_id);
        let duration = self.config.blacklist_duration();
        self.blacklist.insert(client_id, duration, now);
        self.counters.auto_blacklisted.fetch_add(1, Ordering::Relaxed);
        metrics::record_blacklist_size(self.blacklist.len(now));

        tracing::warn!(client_id = %client_id, violations = total, "Client added to blacklist");
        audit::emit(&SecurityEvent::AutoBlacklist {
            client_id: client_id.to_string(),
            violations: total,
            duration_secs: duration.as_secs(),
        });
        true
    }

    /// Manually bar a client.
    pub fn block(&self, client_id: &str, duration: Duration) {
        let now = Instant::now();
        self.blacklist.insert(client_id, duration, now);
        metrics::record_blacklist_size(self.blacklist.len(now));
        tracing::warn!(client_id = %client_id, duration_secs = duration.as_secs(), "Client manually blacklisted");
        audit::emit(&SecurityEvent::ManualBlacklist {
            client_id: client_id.to_string(),
            duration_secs: duration.as_secs(),
        });
    }

    /// Lift a ban and forget the client's violations.
    pub fn unblock(&self, client_id: &str) -> bool {
        let removed = self.blacklist.remove(client_id);
        self.violations.remove(client_id);
        if removed {
            metrics::record_blacklist_size(self.blacklist.len(Instant::now()));
            tracing::info!(client_id = %client_id, "Client removed from blacklist");
            audit::emit(&SecurityEvent::BlacklistRemoved {
                client_id: client_id.to_string(),
            });
        }
        removed
    }

    pub fn blacklisted(&self) -> Vec<BlacklistEntry> {
        self.blacklist.list(Instant::now())
    }

    /// Drop client state idle longer than `stale_after` and expired bans.
    pub fn purge_stale(&self, now: Instant) -> SweepReport {
        let stale_after = self.config.stale_after();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.last_seen) <= stale_after);
        let windows_removed = before.saturating_sub(self.windows.len());

        // Violations live only as long as the client's window.
        self.violations.retain(|client, v| *v > 0 && self.windows.contains_key(client));

        let blacklist_expired = self.blacklist.purge_expired(now);
        metrics::record_blacklist_size(self.blacklist.len(now));

        SweepReport {
            windows_removed,
            blacklist_expired,
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let c = &self.counters;
        LimiterStats {
            enabled: self.config.enabled,
            requests_per_minute: self.config.requests_per_minute,
            burst_limit: self.config.burst_limit,
            total_requests: c.total.load(Ordering::Relaxed),
            allowed: c.allowed.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            blacklist_rejections: c.blacklist_rejections.load(Ordering::Relaxed),
            auto_blacklisted: c.auto_blacklisted.load(Ordering::Relaxed),
            path_scans: c.path_scans.load(Ordering::Relaxed),
            tracked_clients: self.windows.len(),
            blacklisted_clients: self.blacklist.len(Instant::now()),
            clients_with_violations: self.violations.len(),
        }
    }
}
