//! Provisioning orchestration.
//!
//! Runs a plan of [`Step`]s strictly in order:
//! - skips any step whose precondition already holds
//! - aborts on the first fatal failure, records advisory failures as warnings
//! - waits for server readiness right after the step that launches it
//! - finishes with a [`RunSummary`], a persisted JSON copy and a status script
//!
//! Re-running after a failure is safe because every step checks its own
//! precondition first.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{SetupError, StepError};
use crate::probe::wait_until_ready;
use crate::status::{render_status_script, write_status_script};
use crate::step::{Context, Severity, Step};
use crate::summary::{RunSummary, StepOutcome};
use crate::ui;

/// Name used for the readiness loop in summaries and errors.
pub const READINESS_STEP: &str = "readiness";

/// Drives a provisioning plan.
pub struct Orchestrator {
    ctx: Context,
    poll_interval: Duration,
    max_wait: Duration,
}

impl Orchestrator {
    /// Create an orchestrator using the readiness policy from the config.
    #[must_use]
    pub fn new(ctx: Context) -> Self {
        let poll_interval = ctx.config.readiness.interval();
        let max_wait = ctx.config.readiness.budget();
        Self {
            ctx,
            poll_interval,
            max_wait,
        }
    }

    /// Override the readiness polling interval and wait budget.
    #[must_use]
    pub fn with_readiness(mut self, poll_interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self
    }

    /// Shared step context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run `steps` in order.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] when a fatal step fails, when the server does
    /// not become ready within the wait budget, or when no step in the plan
    /// confirmed readiness.
    pub async fn run(&self, steps: &[Box<dyn Step>]) -> Result<RunSummary, SetupError> {
        let mut summary = RunSummary::new();
        let total = steps.len();

        for (i, step) in steps.iter().enumerate() {
            let name = step.name();
            ui::print_progress_step(i + 1, total, name);

            match self.execute(step.as_ref()).await {
                Ok(outcome) => summary.record(name, outcome),
                Err(cause) => {
                    error!(step = %name, error = %cause, "Fatal step failure");
                    ui::print_error(&format!("{name}: {cause}"));
                    return Err(SetupError::new(name, cause));
                }
            }

            if step.launches_server() {
                let readiness = wait_until_ready(
                    self.ctx.probe.as_ref(),
                    self.poll_interval,
                    self.max_wait,
                )
                .await
                .map_err(|cause| {
                    error!(error = %cause, "Server never became ready");
                    ui::print_error(&format!("{READINESS_STEP}: {cause}"));
                    SetupError::new(READINESS_STEP, cause)
                })?;

                ui::print_success(&format!(
                    "Server ready (version {}, {} attempt(s))",
                    readiness.version, readiness.attempts
                ));
                summary.record(
                    READINESS_STEP,
                    StepOutcome::Completed(format!(
                        "server version {} responded after {} attempt(s)",
                        readiness.version, readiness.attempts
                    )),
                );
                summary.readiness = Some(readiness);
            }
        }

        if summary.readiness.is_none() {
            return Err(SetupError::new(
                READINESS_STEP,
                StepError::ReadinessNotConfirmed,
            ));
        }

        self.finish(&mut summary);
        Ok(summary)
    }

    /// Evaluate one step: precondition first, then the action.
    async fn execute(&self, step: &dyn Step) -> Result<StepOutcome, StepError> {
        let name = step.name();

        if let Some(detail) = step.already_satisfied(&self.ctx).await {
            info!(step = %name, detail = %detail, "Step already satisfied, skipping");
            ui::print_skipped(&detail);
            return Ok(StepOutcome::Skipped(detail));
        }

        info!(step = %name, "Running step");
        match step.apply(&self.ctx).await {
            Ok(detail) => {
                info!(step = %name, detail = %detail, "Step completed");
                ui::print_success(&detail);
                Ok(StepOutcome::Completed(detail))
            }
            Err(cause) if step.severity() == Severity::Advisory => {
                warn!(step = %name, error = %cause, "Advisory step failed, continuing");
                ui::print_warning(&format!("{name}: {cause}"));
                Ok(StepOutcome::Warning(cause.to_string()))
            }
            Err(cause) => Err(cause),
        }
    }

    /// Fill in endpoint and log paths, then persist the status script and
    /// summary. Failures here are advisory.
    fn finish(&self, summary: &mut RunSummary) {
        let config = &self.ctx.config;
        let endpoint = config.endpoint();
        summary.endpoint = Some(endpoint.clone());
        summary.log_paths = vec![
            config.server_log_path(),
            config.provision_log_path(),
            config.summary_path(),
        ];

        let script = render_status_script(config, &endpoint);
        match write_status_script(&config.status_script_path(), &script) {
            Ok(path) => summary.status_script = Some(path),
            Err(e) => {
                warn!(error = %e, "Failed to write status script");
                summary.record(
                    "status-script",
                    StepOutcome::Warning(format!("failed to write status script: {e}")),
                );
            }
        }

        summary.finished_at = Some(chrono::Utc::now());
        if let Err(e) = summary.save(&config.summary_path()) {
            warn!(error = %e, "Failed to persist run summary");
            summary.record(
                "summary",
                StepOutcome::Warning(format!("failed to persist summary: {e}")),
            );
        }
    }
}
