//! HTTP probe logic.
//!
//! One probe is one GET with the target's timeout as a hard bound. Redirects
//! are not followed; a 3xx answer already proves the service is up.

use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use pulse_core::format_duration;
use pulse_state::{ProbeOutcome, ProbeResult, Target};

/// Why a probe did not come back operational.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("timed out after {}", human(.0))]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Transport(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("expected content not found")]
    ContentMismatch,
}

impl ProbeError {
    pub fn outcome(&self) -> ProbeOutcome {
        match self {
            ProbeError::ContentMismatch => ProbeOutcome::Degraded,
            _ => ProbeOutcome::Down,
        }
    }
}

/// Issues health checks. Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("pulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Check a target once. Never retries.
    pub async fn probe(&self, target: &Target) -> ProbeResult {
        let timestamp = Utc::now();
        let started = Instant::now();

        let checked = match tokio::time::timeout(target.timeout, self.check(target)).await {
            Ok(checked) => checked,
            Err(_) => Err(ProbeError::Timeout(target.timeout)),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let (outcome, message) = match checked {
            Ok(()) => (ProbeOutcome::Operational, None),
            Err(e) => {
                debug!(target = %target.name, url = %target.url, error = %e, "probe failed");
                (e.outcome(), Some(e.to_string()))
            }
        };

        ProbeResult {
            target: target.name.clone(),
            timestamp,
            outcome,
            latency_ms,
            message,
        }
    }

    async fn check(&self, target: &Target) -> Result<(), ProbeError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                ProbeError::Timeout(target.timeout)
            } else {
                ProbeError::Transport(error_chain(&e))
            }
        };

        let response = self
            .client
            .get(&target.url)
            .timeout(target.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_redirection() {
            return Ok(());
        }
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        if let Some(needle) = &target.expected_content {
            let body = response.text().await.map_err(classify)?;
            if !body.contains(needle.as_str()) {
                return Err(ProbeError::ContentMismatch);
            }
        }
        Ok(())
    }
}

fn human(d: &Duration) -> String {
    format_duration(*d)
}

/// reqwest's top-level message hides the cause ("error sending request").
fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
