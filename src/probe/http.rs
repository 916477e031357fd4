//! HTTP probe implementation.

use std::time::{Duration, Instant};

use regex::Regex;

use super::{ProbeResult, RetryPolicy, USER_AGENT};

/// Prober for ordinary service targets.
///
/// Stateless per call; a single prober is shared across all target tasks.
pub struct HttpProber {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpProber {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, retry })
    }

    /// Probe a target URL with retries.
    ///
    /// Up on a 2xx/3xx response; transport errors and other status codes are
    /// retried, and the final failure is summarized in the result. For HTML
    /// responses the first `<title>` is extracted best-effort.
    pub async fn check(&self, url: &str) -> ProbeResult {
        let mut last = ProbeResult::down("no attempt made".to_string(), None);

        for attempt in 0..self.retry.attempts() {
            let start = Instant::now();
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let elapsed = start.elapsed().as_millis() as i64;
                    let status = resp.status();
                    if status.is_success() || status.is_redirection() {
                        let is_html = resp
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(|ct| ct.contains("text/html"))
                            .unwrap_or(false);
                        let title = if is_html {
                            resp.text().await.ok().as_deref().and_then(extract_title)
                        } else {
                            None
                        };
                        return ProbeResult::up(elapsed, title);
                    }
                    last = ProbeResult::down(format!("HTTP {}", status), Some(elapsed));
                }
                Err(e) => {
                    last = ProbeResult::down(describe_error(&e), None);
                }
            }
            self.retry.backoff(attempt).await;
        }

        last
    }
}

fn describe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

/// Extract the text of the first `<title>` element, if any.
fn extract_title(body: &str) -> Option<String> {
    let re = Regex::new(r"(?is)<title[^>]*>([^<]+)</title>").ok()?;
    let title = re.captures(body)?.get(1)?.as_str().trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
