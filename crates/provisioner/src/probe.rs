//! Server readiness probing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProbeError, StepError};

/// Version document served by the runtime.
#[derive(Debug, Clone, Deserialize)]
struct VersionInfo {
    version: String,
}

/// Checks whether the server is accepting requests.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Probe once. Returns the reported server version on success.
    async fn check(&self) -> Result<String, ProbeError>;
}

/// Probe that GETs the runtime's `/api/version` endpoint.
#[derive(Clone)]
pub struct HttpVersionProbe {
    client: Client,
    url: String,
}

impl HttpVersionProbe {
    /// Create a probe against `base_url` (e.g. `http://127.0.0.1:11434`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/api/version", base_url.trim_end_matches('/')),
        })
    }

    /// Full URL being probed.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReadinessProbe for HttpVersionProbe {
    async fn check(&self) -> Result<String, ProbeError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let info: VersionInfo =
            serde_json::from_str(&body).map_err(|e| ProbeError::Payload(e.to_string()))?;
        let version = info.version.trim();
        if version.is_empty() {
            return Err(ProbeError::Payload("empty version field".into()));
        }
        Ok(version.to_string())
    }
}

/// Result of a successful readiness wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    /// Version reported by the server.
    pub version: String,
    /// Number of probe attempts, including the successful one.
    pub attempts: u32,
    /// Time spent waiting, in milliseconds.
    pub elapsed_ms: u64,
}

/// Poll `probe` every `interval` until it succeeds or `budget` is spent.
///
/// The first attempt is made immediately. No attempt starts after the
/// budget has elapsed, and an attempt still in flight when it runs out is
/// abandoned.
///
/// # Errors
///
/// Returns [`StepError::ReadinessTimeout`] when the budget runs out.
pub async fn wait_until_ready(
    probe: &dyn ReadinessProbe,
    interval: Duration,
    budget: Duration,
) -> Result<Readiness, StepError> {
    info!(
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        budget_secs = budget.as_secs(),
        "Waiting for server readiness"
    );

    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = budget.saturating_sub(start.elapsed());
        match tokio::time::timeout(remaining, probe.check()).await {
            Ok(Ok(version)) => {
                let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(version = %version, attempts, elapsed_ms, "Server is ready");
                return Ok(Readiness {
                    version,
                    attempts,
                    elapsed_ms,
                });
            }
            Ok(Err(e)) => {
                debug!(
                    attempt = attempts,
                    elapsed_secs = start.elapsed().as_secs(),
                    error = %e,
                    "Server not ready yet"
                );
            }
            Err(_) => {
                debug!(attempt = attempts, "Probe still pending when the wait budget ran out");
            }
        }

        if start.elapsed() + interval > budget {
            return Err(StepError::ReadinessTimeout {
                waited_secs: start.elapsed().as_secs().max(budget.as_secs()),
                attempts,
            });
        }

        tokio::time::sleep(interval).await;
    }
}
