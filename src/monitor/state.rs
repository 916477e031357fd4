//! Up/down state machine and incident tracking.
//!
//! Consumes probe results, decides status transitions, and emits at most one
//! DOWN notification per incident. The status flips to down on the first
//! failed probe; the notification waits for the failure threshold and is
//! deduplicated through the target's `alerted` flag, which only an up result
//! clears.

use chrono::{DateTime, Utc};

use crate::db::{
    DbError, NewLogEntry, ProbeOutcomeUpdate, Store, Target, TargetKind, TargetStatus,
};
use crate::probe::ProbeResult;

/// Everything one probe outcome changes: the target row update, the log
/// entry, and an optional notification message.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub update: ProbeOutcomeUpdate,
    pub log: NewLogEntry,
    pub notification: Option<String>,
}

/// Evaluate one probe result against the target's current persisted state.
///
/// Pure: all persistence happens in [`record`].
pub fn evaluate(
    target: &Target,
    result: &ProbeResult,
    now: DateTime<Utc>,
    failure_threshold: i64,
) -> Evaluation {
    let new_status = result.status;
    let failures = if new_status == TargetStatus::Down {
        target.consecutive_failures + 1
    } else {
        0
    };

    let mut alerted = target.alerted;
    let mut notification = None;

    match new_status {
        TargetStatus::Down => {
            if !alerted && failures >= failure_threshold {
                alerted = true;
                notification = Some(down_message(target, failures, result.error.as_deref()));
            }
        }
        TargetStatus::Up => {
            // Recovery is announced once, immediately, without a threshold.
            if target.status == TargetStatus::Down {
                notification = Some(up_message(target, result.response_time_ms));
            }
            alerted = false;
        }
        // Probe results are never unknown; unknown exists only as the
        // initial stored state.
        TargetStatus::Unknown => {}
    }

    let name = if target.name.is_none() {
        result.title.clone()
    } else {
        None
    };

    Evaluation {
        update: ProbeOutcomeUpdate {
            status: new_status,
            consecutive_failures: failures,
            alerted,
            last_check: now,
            response_time: result.response_time_ms,
            name,
        },
        log: NewLogEntry {
            status: new_status,
            response_time: result.response_time_ms,
            message: result.error.clone(),
        },
        notification,
    }
}

/// Evaluate and persist one probe outcome atomically.
pub fn record(
    store: &Store,
    target: &Target,
    result: &ProbeResult,
    now: DateTime<Utc>,
    failure_threshold: i64,
) -> Result<(), DbError> {
    let eval = evaluate(target, result, now, failure_threshold);
    store.record_outcome(
        target.id,
        &eval.update,
        &eval.log,
        eval.notification.as_deref(),
    )
}

fn down_message(target: &Target, failures: i64, error: Option<&str>) -> String {
    match target.kind {
        TargetKind::Service => format!(
            "Service {} is DOWN ({} consecutive failures). Error: {}",
            target.url,
            failures,
            error.unwrap_or("unknown error"),
        ),
        TargetKind::Peer => format!(
            "Peer {} is DOWN ({} consecutive failures). Admin: {}",
            target.url,
            failures,
            target.notify_email.as_deref().unwrap_or("unknown"),
        ),
    }
}

fn up_message(target: &Target, response_time_ms: Option<i64>) -> String {
    match (target.kind, response_time_ms) {
        (TargetKind::Service, Some(ms)) => {
            format!("Service {} is back UP (response time: {}ms)", target.url, ms)
        }
        (TargetKind::Service, None) => format!("Service {} is back UP", target.url),
        (TargetKind::Peer, _) => format!(
            "Peer {} is back UP. Admin: {}",
            target.url,
            target.notify_email.as_deref().unwrap_or("unknown"),
        ),
    }
}
