//! OS package installation through apt.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::StepError;
use crate::exec::CommandSpec;
use crate::step::{Context, Step};

/// Installs a set of apt packages unless all are already installed.
pub struct InstallPackages {
    name: String,
    packages: Vec<String>,
}

impl InstallPackages {
    /// Create a package step.
    #[must_use]
    pub fn new(name: impl Into<String>, packages: Vec<String>) -> Self {
        Self {
            name: name.into(),
            packages,
        }
    }

    fn status_query(package: &str) -> CommandSpec {
        CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", package])
    }

    async fn missing(&self, ctx: &Context) -> Vec<String> {
        let mut missing = Vec::new();
        for package in &self.packages {
            let installed = match ctx.runner.run(&Self::status_query(package)).await {
                Ok(out) => out.success() && out.stdout.contains("install ok installed"),
                Err(e) => {
                    debug!(package = %package, error = %e, "dpkg-query failed");
                    false
                }
            };
            if !installed {
                missing.push(package.clone());
            }
        }
        missing
    }
}

#[async_trait]
impl Step for InstallPackages {
    fn name(&self) -> &str {
        &self.name
    }

    async fn already_satisfied(&self, ctx: &Context) -> Option<String> {
        if self.packages.is_empty() {
            return Some("no packages requested".into());
        }
        self.missing(ctx)
            .await
            .is_empty()
            .then(|| format!("already installed: {}", self.packages.join(", ")))
    }

    async fn apply(&self, ctx: &Context) -> Result<String, StepError> {
        let missing = self.missing(ctx).await;
        info!(packages = ?missing, "Installing packages");

        ctx.runner
            .run_checked(
                &CommandSpec::new("apt-get")
                    .arg("update")
                    .env("DEBIAN_FRONTEND", "noninteractive"),
            )
            .await?;

        ctx.runner
            .run_checked(
                &CommandSpec::new("apt-get")
                    .args(["install", "-y", "--no-install-recommends"])
                    .args(missing.iter().cloned())
                    .env("DEBIAN_FRONTEND", "noninteractive"),
            )
            .await?;

        Ok(format!("installed {}", missing.join(", ")))
    }
}
