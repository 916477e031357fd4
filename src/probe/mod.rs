//! Probe module.
//!
//! HTTP probes for ordinary services and health-protocol probes for peers.
//! A probe never fails to its caller: every code path yields a
//! [`ProbeResult`], and transient errors are absorbed by the retry policy.

mod http;
mod peer;

pub use http::*;
pub use peer::*;

use std::time::Duration;

use crate::db::TargetStatus;

pub const USER_AGENT: &str = concat!("fedwatch/", env!("CARGO_PKG_VERSION"));

/// Outcome of one probe (all attempts included).
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: TargetStatus,
    /// Elapsed wall-clock milliseconds to response headers, when a response
    /// was received.
    pub response_time_ms: Option<i64>,
    /// First `<title>` text of an HTML response body (services only).
    pub title: Option<String>,
    /// Summary of the final failure, present only when down.
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn up(response_time_ms: i64, title: Option<String>) -> Self {
        Self {
            status: TargetStatus::Up,
            response_time_ms: Some(response_time_ms),
            title,
            error: None,
        }
    }

    pub fn down(error: String, response_time_ms: Option<i64>) -> Self {
        Self {
            status: TargetStatus::Down,
            response_time_ms,
            title: None,
            error: Some(error),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == TargetStatus::Up
    }
}

/// Fixed retry policy shared by the service and peer probers.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    /// Fixed sleep between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Total attempts including the initial one.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Sleep between attempts, skipped after the last one.
    pub(crate) async fn backoff(&self, attempt: u32) {
        if attempt + 1 < self.attempts() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_attempts() {
        assert_eq!(RetryPolicy::default().attempts(), 3);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }
}
