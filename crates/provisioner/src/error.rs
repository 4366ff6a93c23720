//! Error types for provisioning operations.

use thiserror::Error;

/// Errors raised while running an external command.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The program is not installed or not on `PATH`.
    #[error("Command not found: {0}")]
    NotFound(String),

    /// Spawning or waiting on the process failed.
    #[error("Failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited with a non-zero status.
    #[error("`{command}` exited with status {code}: {stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The process did not finish within its client-side timeout.
    #[error("`{command}` timed out after {secs} seconds")]
    TimedOut { command: String, secs: u64 },
}

/// Errors raised by a readiness probe.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// HTTP request failed (connection refused, timeout, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status.
    #[error("Endpoint returned status {0}")]
    Status(u16),

    /// Endpoint answered but the payload is not a version document.
    #[error("Invalid version payload: {0}")]
    Payload(String),
}

/// Why a single step failed.
#[derive(Error, Debug)]
pub enum StepError {
    /// An external command failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The readiness probe failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// The server did not become ready within the wait budget.
    #[error("timeout: server not ready after {waited_secs}s ({attempts} attempts)")]
    ReadinessTimeout { waited_secs: u64, attempts: u32 },

    /// No step in the plan launched the server, so readiness was never confirmed.
    #[error("server readiness was never confirmed")]
    ReadinessNotConfirmed,

    /// Local file system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Step-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// A fatal failure that aborts the whole run.
#[derive(Error, Debug)]
#[error("Setup failed at step '{step}': {cause}")]
pub struct SetupError {
    /// Name of the step that failed (`readiness` for the readiness loop).
    pub step: String,
    /// Underlying cause.
    #[source]
    pub cause: StepError,
}

impl SetupError {
    /// Create a new setup error for a step.
    #[must_use]
    pub fn new(step: impl Into<String>, cause: StepError) -> Self {
        Self {
            step: step.into(),
            cause,
        }
    }

    /// Whether this failure came from the readiness budget running out.
    #[must_use]
    pub fn is_readiness_timeout(&self) -> bool {
        matches!(self.cause, StepError::ReadinessTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_display() {
        let err = SetupError::new(
            "readiness",
            StepError::ReadinessTimeout {
                waited_secs: 60,
                attempts: 31,
            },
        );
        assert_eq!(
            err.to_string(),
            "Setup failed at step 'readiness': timeout: server not ready after 60s (31 attempts)"
        );
        assert!(err.is_readiness_timeout());
    }

    #[test]
    fn test_exec_error_is_transparent_in_step_error() {
        let err = StepError::from(ExecError::NotFound("nvidia-smi".into()));
        assert_eq!(err.to_string(), "Command not found: nvidia-smi");
    }
}
