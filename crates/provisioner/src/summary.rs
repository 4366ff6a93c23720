//! Run summary accumulated across steps.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::probe::Readiness;

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Precondition already held; action not run.
    Skipped(String),
    /// Action ran successfully.
    Completed(String),
    /// Advisory action failed.
    Warning(String),
}

impl StepOutcome {
    /// Detail text.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Skipped(d) | Self::Completed(d) | Self::Warning(d) => d,
        }
    }
}

/// A step name with its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Step name.
    pub step: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Public endpoint for the runtime API.
///
/// Uses the platform proxy form `https://<host>-<port>.proxy.<platform>.net`
/// when the host id is known, else the local URL.
#[must_use]
pub fn endpoint_url(host: Option<&str>, port: u16, platform: &str) -> String {
    match host.map(str::trim).filter(|h| !h.is_empty()) {
        Some(host) => format!("https://{host}-{port}.proxy.{platform}.net"),
        None => format!("http://localhost:{port}"),
    }
}

/// Summary of a provisioning run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Step outcomes in execution order.
    pub steps: Vec<StepRecord>,
    /// Readiness result, once confirmed.
    pub readiness: Option<Readiness>,
    /// Externally reachable API endpoint.
    pub endpoint: Option<String>,
    /// Persisted log files.
    pub log_paths: Vec<PathBuf>,
    /// Generated status-check script.
    pub status_script: Option<PathBuf>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSummary {
    /// Start an empty summary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            readiness: None,
            endpoint: None,
            log_paths: Vec::new(),
            status_script: None,
        }
    }

    /// Append a step outcome.
    pub fn record(&mut self, step: impl Into<String>, outcome: StepOutcome) {
        self.steps.push(StepRecord {
            step: step.into(),
            outcome,
        });
    }

    /// Outcome recorded for `step`, if any.
    #[must_use]
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|r| r.step == step)
            .map(|r| &r.outcome)
    }

    /// Advisory failures.
    #[must_use]
    pub fn warnings(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|r| matches!(r.outcome, StepOutcome::Warning(_)))
            .collect()
    }

    /// Number of steps whose action actually ran.
    #[must_use]
    pub fn actions_run(&self) -> usize {
        self.steps
            .iter()
            .filter(|r| matches!(r.outcome, StepOutcome::Completed(_)))
            .count()
    }

    /// Human-readable status lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .steps
            .iter()
            .map(|r| match &r.outcome {
                StepOutcome::Skipped(d) => format!("{}: skipped ({d})", r.step),
                StepOutcome::Completed(d) => format!("{}: {d}", r.step),
                StepOutcome::Warning(d) => format!("{}: WARNING {d}", r.step),
            })
            .collect();

        if let Some(endpoint) = &self.endpoint {
            lines.push(format!("Endpoint: {endpoint}"));
        }
        for path in &self.log_paths {
            lines.push(format!("Log: {}", path.display()));
        }
        if let Some(script) = &self.status_script {
            lines.push(format!("Status check: {}", script.display()));
        }
        lines
    }

    /// Write the summary as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }
}
