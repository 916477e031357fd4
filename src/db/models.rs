//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a monitored target: an ordinary service endpoint or a peer
/// instance speaking the federation health protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Service,
    Peer,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Service => "service",
            TargetKind::Peer => "peer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "service" => Some(TargetKind::Service),
            "peer" => Some(TargetKind::Peer),
            _ => None,
        }
    }
}

/// Persisted availability state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Unknown,
    Up,
    Down,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Unknown => "unknown",
            TargetStatus::Up => "up",
            TargetStatus::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(TargetStatus::Unknown),
            "up" => Some(TargetStatus::Up),
            "down" => Some(TargetStatus::Down),
            _ => None,
        }
    }
}

/// A monitored target (service or peer).
///
/// `alerted` tracks whether a DOWN notification was already emitted for the
/// ongoing incident. It is independent of `status`: the status flips to down
/// on the first failed probe, while the alert waits for the failure
/// threshold. Any up result clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub kind: TargetKind,
    pub url: String,
    pub name: Option<String>,
    /// Probe interval in seconds.
    pub check_interval: i64,
    /// Alert recipient; the instance admin email is used when absent.
    pub notify_email: Option<String>,
    pub status: TargetStatus,
    pub consecutive_failures: i64,
    pub alerted: bool,
    /// Last observed response time in milliseconds.
    pub response_time: Option<i64>,
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            kind: TargetKind::Service,
            url: String::new(),
            name: None,
            check_interval: 60,
            notify_email: None,
            status: TargetStatus::Unknown,
            consecutive_failures: 0,
            alerted: false,
            response_time: None,
            last_check: None,
        }
    }
}

/// Typed per-probe update applied to a target row.
///
/// `response_time` and `name` keep the stored value when `None`; a name, once
/// set, is never overwritten.
#[derive(Debug, Clone)]
pub struct ProbeOutcomeUpdate {
    pub status: TargetStatus,
    pub consecutive_failures: i64,
    pub alerted: bool,
    pub last_check: DateTime<Utc>,
    pub response_time: Option<i64>,
    pub name: Option<String>,
}

/// One probe outcome to append to the log.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub status: TargetStatus,
    pub response_time: Option<i64>,
    pub message: Option<String>,
}

/// A pending or delivered alert.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    pub target_id: i64,
    pub message: String,
    pub sent: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate target counts for the health snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TargetStats {
    pub total: i64,
    pub up: i64,
    pub down: i64,
    pub unknown: i64,
}
