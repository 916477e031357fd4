//! HTTP request handlers.

use super::AppState;
use crate::db::{Target, TargetKind, TargetStatus};
use crate::probe::NOTIFY_KEY_HEADER;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

/// `GET /api/health` — the peer protocol endpoint.
pub async fn handle_health(State(state): State<AppState>) -> Response {
    match state.federation.health_snapshot(&state.instance_name) {
        Ok(snapshot) => {
            let mut resp = Json(snapshot).into_response();
            if let Some(key) = &state.notify_key {
                if let Ok(value) = HeaderValue::from_str(key) {
                    resp.headers_mut().insert(NOTIFY_KEY_HEADER, value);
                }
            }
            resp
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// One row of the target listing.
#[derive(Debug, Serialize)]
pub struct TargetSummary {
    pub kind: TargetKind,
    pub url: String,
    pub name: Option<String>,
    pub status: TargetStatus,
    pub consecutive_failures: i64,
    pub response_time: Option<i64>,
    pub last_check: Option<DateTime<Utc>>,
    /// Share of up probes over the last 24 hours, when any were logged.
    pub uptime_24h: Option<f64>,
}

/// `GET /api/targets` — read-only listing of targets and their state.
pub async fn handle_targets(State(state): State<AppState>) -> Response {
    let targets = match state.store.get_targets() {
        Ok(t) => t,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let since = Utc::now() - ChronoDuration::hours(24);
    let summaries: Vec<TargetSummary> = targets
        .into_iter()
        .map(|t| {
            let uptime_24h = state.store.uptime_percent(t.id, since).unwrap_or(None);
            summarize(t, uptime_24h)
        })
        .collect();

    Json(summaries).into_response()
}

fn summarize(target: Target, uptime_24h: Option<f64>) -> TargetSummary {
    TargetSummary {
        kind: target.kind,
        url: target.url,
        name: target.name,
        status: target.status,
        consecutive_failures: target.consecutive_failures,
        response_time: target.response_time,
        last_check: target.last_check,
        uptime_24h,
    }
}
