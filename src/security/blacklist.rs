//! Time-bounded client blacklist.

use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};

/// A blacklisted client as reported to operators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub client_id: String,
    pub remaining_secs: u64,
}

/// Client id → expiry. Expired entries read as absent and are purged by the sweeper.
#[derive(Debug, Default)]
pub struct Blacklist {
    entries: DashMap<String, Instant>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bar `client_id` until `now + duration`, extending an existing entry.
    pub fn insert(&self, client_id: &str, duration: Duration, now: Instant) {
        let expires_at = now + duration;
        self.entries
            .entry(client_id.to_string())
            .and_modify(|current| *current = (*current).max(expires_at))
            .or_insert(expires_at);
    }

    pub fn remove(&self, client_id: &str) -> bool {
        self.entries.remove(client_id).is_some()
    }

    /// Remaining ban time, or `None` when the client is not (or no longer) blacklisted.
    pub fn remaining(&self, client_id: &str, now: Instant) -> Option<Duration> {
        let expires_at = *self.entries.get(client_id)?;
        if expires_at > now {
            Some(expires_at - now)
        } else {
            None
        }
    }

    pub fn contains(&self, client_id: &str, now: Instant) -> bool {
        self.remaining(client_id, now).is_some()
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Active entries sorted by client id.
    pub fn list(&self, now: Instant) -> Vec<BlacklistEntry> {
        let mut entries: Vec<BlacklistEntry> = self
            .entries
            .iter()
            .filter(|e| *e.value() > now)
            .map(|e| BlacklistEntry {
                client_id: e.key().clone(),
                remaining_secs: (*e.value() - now).as_secs(),
            })
            .collect();
        entries.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        entries
    }

    /// Number of active entries.
    pub fn len(&self, now: Instant) -> usize {
        self.entries.iter().filter(|e| *e.value() > now).count()
    }

    pub fn is_empty(&self, now: Instant) -> bool {
        self.len(now) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expires() {
        let blacklist = Blacklist::new();
        let now = Instant::now();
        blacklist.insert("ip:10.0.0.1", Duration::from_secs(60), now);

        assert!(blacklist.contains("ip:10.0.0.1", now + Duration::from_secs(59)));
        assert!(!blacklist.contains("ip:10.0.0.1", now + Duration::from_secs(60)));
        assert!(!blacklist.contains("ip:10.0.0.2", now));
    }

    #[test]
    fn test_insert_never_shortens_ban() {
        let blacklist = Blacklist::new();
        let now = Instant::now();
        blacklist.insert("user:1", Duration::from_secs(3600), now);
        blacklist.insert("user:1", Duration::from_secs(10), now);

        assert_eq!(
            blacklist.remaining("user:1", now),
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_purge_and_list() {
        let blacklist = Blacklist::new();
        let now = Instant::now();
        blacklist.insert("ip:b", Duration::from_secs(10), now);
        blacklist.insert("ip:a", Duration::from_secs(100), now);

        let later = now + Duration::from_secs(20);
        assert_eq!(blacklist.len(later), 1);
        assert_eq!(blacklist.purge_expired(later), 1);
        assert_eq!(
            blacklist.list(later),
            vec![BlacklistEntry { client_id: "ip:a".into(), remaining_secs: 80 }]
        );
        assert!(blacklist.remove("ip:a"));
        assert!(blacklist.is_empty(later));
    }
}
