//! Peer health-protocol probe.
//!
//! Peers are probed at `<base>/api/health` and are up only when the response
//! is 2xx and the JSON body reports instance-level health ok.

use std::time::{Duration, Instant};

use serde::Deserialize;

use super::{ProbeResult, RetryPolicy, USER_AGENT};

/// Header carrying the optional shared notification key. A missing or
/// mismatched key is a soft trust signal only, never a rejection.
pub const NOTIFY_KEY_HEADER: &str = "x-fedwatch-key";

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

/// Prober for peer targets.
pub struct PeerProber {
    client: reqwest::Client,
    retry: RetryPolicy,
    shared_key: Option<String>,
}

impl PeerProber {
    pub fn new(
        timeout: Duration,
        retry: RetryPolicy,
        shared_key: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            retry,
            shared_key,
        })
    }

    /// Probe a peer's health endpoint with retries.
    pub async fn check(&self, base_url: &str) -> ProbeResult {
        let url = health_url(base_url);
        let mut last = ProbeResult::down("no attempt made".to_string(), None);

        for attempt in 0..self.retry.attempts() {
            let start = Instant::now();
            match self.client.get(&url).send().await {
                Ok(resp) => {
                    let elapsed = start.elapsed().as_millis() as i64;
                    let status = resp.status();
                    if status.is_success() {
                        self.inspect_key(base_url, &resp);
                        match resp.json::<HealthBody>().await {
                            Ok(body) if body.status == "ok" => {
                                return ProbeResult::up(elapsed, None);
                            }
                            Ok(body) => {
                                last = ProbeResult::down(
                                    format!("peer reported status \"{}\"", body.status),
                                    Some(elapsed),
                                );
                            }
                            Err(_) => {
                                last = ProbeResult::down(
                                    "health response was not valid JSON".to_string(),
                                    Some(elapsed),
                                );
                            }
                        }
                    } else {
                        last = ProbeResult::down(format!("HTTP {}", status), Some(elapsed));
                    }
                }
                Err(e) => {
                    let msg = if e.is_timeout() {
                        "request timed out".to_string()
                    } else {
                        e.to_string()
                    };
                    last = ProbeResult::down(msg, None);
                }
            }
            self.retry.backoff(attempt).await;
        }

        last
    }

    fn inspect_key(&self, base_url: &str, resp: &reqwest::Response) {
        let Some(expected) = &self.shared_key else {
            return;
        };
        let presented = resp
            .headers()
            .get(NOTIFY_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        match presented {
            Some(key) if key == expected => {}
            Some(_) => tracing::warn!("Peer {} presented a mismatched notification key", base_url),
            None => tracing::warn!("Peer {} did not present a notification key", base_url),
        }
    }
}

fn health_url(base: &str) -> String {
    format!("{}/api/health", base.trim_end_matches('/'))
}
