//! Provisioning step abstraction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ProvisionConfig;
use crate::env::RuntimeEnv;
use crate::error::StepError;
use crate::exec::CommandRunner;
use crate::probe::ReadinessProbe;
use crate::runtime::Runtime;

/// How a step's failure affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Abort the whole run.
    Fatal,
    /// Record a warning and continue.
    Advisory,
}

/// Shared collaborators handed to every step.
#[derive(Clone)]
pub struct Context {
    /// Provisioning configuration.
    pub config: ProvisionConfig,
    /// Resolved runtime environment.
    pub env: RuntimeEnv,
    /// External command runner.
    pub runner: Arc<dyn CommandRunner>,
    /// Server readiness probe.
    pub probe: Arc<dyn ReadinessProbe>,
}

impl Context {
    /// Create a context.
    #[must_use]
    pub fn new(
        config: ProvisionConfig,
        env: RuntimeEnv,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn ReadinessProbe>,
    ) -> Self {
        Self {
            config,
            env,
            runner,
            probe,
        }
    }

    /// Runtime CLI bound to this context's runner and environment.
    #[must_use]
    pub fn runtime(&self) -> Runtime<'_> {
        Runtime::new(
            self.runner.as_ref(),
            &self.config.runtime_bin,
            &self.env.vars,
        )
    }
}

/// A named unit of provisioning work.
///
/// The orchestrator calls [`Step::already_satisfied`] first and only runs
/// [`Step::apply`] when it returns `None`.
#[async_trait]
pub trait Step: Send + Sync {
    /// Step name used in logs, summaries and errors.
    fn name(&self) -> &str;

    /// Whether failure aborts the run.
    fn severity(&self) -> Severity {
        Severity::Fatal
    }

    /// Whether this step launches the long-running server. The readiness
    /// loop runs right after it.
    fn launches_server(&self) -> bool {
        false
    }

    /// Returns a detail line when the step's effect already holds.
    async fn already_satisfied(&self, ctx: &Context) -> Option<String>;

    /// Perform the step. Returns a detail line for the summary.
    async fn apply(&self, ctx: &Context) -> Result<String, StepError>;
}
