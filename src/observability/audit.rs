//! Security audit events.
//!
//! Events are emitted on the `audit` tracing target as a single JSON
//! `details` field plus a unique `event_id`, so a log shipper can route them
//! to the audit store without parsing free text.

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SecurityEvent {
    RequestBlocked {
        client_id: String,
        reason: &'static str,
        method: String,
        path: String,
    },
    AutoBlacklist {
        client_id: String,
        violations: u32,
        duration_secs: u64,
    },
    ManualBlacklist {
        client_id: String,
        duration_secs: u64,
    },
    BlacklistRemoved {
        client_id: String,
    },
    PathScanning {
        client_id: String,
        paths: Vec<String>,
    },
    ConnectionLeak {
        lease_id: u64,
        held_secs: u64,
    },
}

impl SecurityEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityEvent::RequestBlocked { .. } => "request_blocked",
            SecurityEvent::AutoBlacklist { .. } => "auto_blacklist",
            SecurityEvent::ManualBlacklist { .. } => "manual_blacklist",
            SecurityEvent::BlacklistRemoved { .. } => "blacklist_removed",
            SecurityEvent::PathScanning { .. } => "path_scanning",
            SecurityEvent::ConnectionLeak { .. } => "connection_leak",
        }
    }
}

/// Emit an audit event. Returns the generated event id.
pub fn emit(event: &SecurityEvent) -> Uuid {
    let event_id = Uuid::new_v4();
    let details = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    tracing::warn!(
        target: "audit",
        event_id = %event_id,
        kind = event.kind(),
        details = %details,
        "SECURITY_EVENT"
    );
    event_id
}
