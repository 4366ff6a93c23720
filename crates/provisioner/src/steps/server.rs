//! Runtime installation, server launch and GPU offload check.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::StepError;
use crate::exec::CommandSpec;
use crate::step::{Context, Severity, Step};

/// Installer script timeout.
const INSTALL_TIMEOUT_SECS: u64 = 900;

/// Log fragments the runtime prints once it has found a CUDA device.
const GPU_LOG_MARKERS: [&str; 2] = ["inference compute", "library=cuda"];

/// Log fragments the runtime prints when it falls back to the CPU.
const NO_GPU_LOG_MARKERS: [&str; 3] = [
    "no compatible GPUs were discovered",
    "no nvidia devices detected",
    "library=cpu",
];

/// Installs the runtime via its remote installer script.
pub struct InstallRuntime;

#[async_trait]
impl Step for InstallRuntime {
    fn name(&self) -> &str {
        "runtime"
    }

    async fn already_satisfied(&self, ctx: &Context) -> Option<String> {
        let version = ctx.runtime().version().await.ok()?;
        Some(format!("{} {version} already installed", ctx.config.runtime_bin))
    }

    async fn apply(&self, ctx: &Context) -> Result<String, StepError> {
        let url = &ctx.config.install_script_url;
        info!(url = %url, "Running runtime installer");

        let cmd = CommandSpec::new("sh")
            .arg("-c")
            .arg(format!("curl -fsSL {url} | sh"))
            .timeout(Duration::from_secs(INSTALL_TIMEOUT_SECS));
        ctx.runner.run_checked(&cmd).await?;

        let version = ctx.runtime().version().await?;
        info!(version = %version, "Runtime installed");
        Ok(format!("installed {} {version}", ctx.config.runtime_bin))
    }
}

/// Launches the runtime server as a detached background process.
///
/// The process is not supervised; it keeps running after the provisioner exits.
pub struct LaunchServer;

#[async_trait]
impl Step for LaunchServer {
    fn name(&self) -> &str {
        "server"
    }

    fn launches_server(&self) -> bool {
        true
    }

    async fn already_satisfied(&self, ctx: &Context) -> Option<String> {
        let version = ctx.probe.check().await.ok()?;
        Some(format!("server already responding (version {version})"))
    }

    async fn apply(&self, ctx: &Context) -> Result<String, StepError> {
        std::fs::create_dir_all(&ctx.config.log_dir)?;
        let log_path = ctx.config.server_log_path();

        info!(env_source = %ctx.env.source, "Launching runtime server");
        let pid = ctx.runtime().serve_detached(&log_path).await?;

        Ok(format!(
            "launched `{} serve` (pid {pid}), logging to {}",
            ctx.config.runtime_bin,
            log_path.display()
        ))
    }
}

/// Checks the server log for a GPU detection line.
///
/// Advisory: the line may simply not have been written yet.
pub struct CheckGpuOffload;

#[async_trait]
impl Step for CheckGpuOffload {
    fn name(&self) -> &str {
        "gpu-offload"
    }

    fn severity(&self) -> Severity {
        Severity::Advisory
    }

    async fn already_satisfied(&self, _ctx: &Context) -> Option<String> {
        None
    }

    async fn apply(&self, ctx: &Context) -> Result<String, StepError> {
        let log_path = ctx.config.server_log_path();
        let content = match std::fs::read_to_string(&log_path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %log_path.display(), error = %e, "Cannot read server log");
                return Err(StepError::Failed(format!(
                    "server log {} not readable: {e}",
                    log_path.display()
                )));
            }
        };

        gpu_offload_from_log(&content)
    }
}

/// Decide GPU use from the most recent detection line in a server log.
fn gpu_offload_from_log(content: &str) -> Result<String, StepError> {
    let line = content.lines().rev().find(|line| {
        GPU_LOG_MARKERS
            .iter()
            .chain(NO_GPU_LOG_MARKERS.iter())
            .any(|m| line.contains(*m))
    });

    match line {
        Some(line) if NO_GPU_LOG_MARKERS.iter().any(|m| line.contains(*m)) => Err(
            StepError::Failed(format!("server is running without a GPU: {}", line.trim())),
        ),
        Some(line) => Ok(format!("GPU in use: {}", line.trim())),
        None => Err(StepError::Failed(
            "no GPU detection line in server log yet".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_CONFIG_LINE: &str = "time=2025-01-20T10:00:00.000Z level=INFO source=routes.go:1187 \
msg=\"server config\" env=\"map[CUDA_VISIBLE_DEVICES:0 OLLAMA_HOST:http://0.0.0.0:11434]\"";

    #[test]
    fn test_server_config_line_is_not_gpu_use() {
        let log = format!(
            "{SERVER_CONFIG_LINE}\n\
time=2025-01-20T10:00:01.000Z level=INFO source=gpu.go:392 msg=\"no compatible GPUs were discovered\"\n"
        );
        let err = gpu_offload_from_log(&log).unwrap_err();
        assert!(
            err.to_string().contains("without a GPU"),
            "unexpected: {err}"
        );
    }

    #[test]
    fn test_config_line_alone_is_inconclusive() {
        let err = gpu_offload_from_log(&format!("{SERVER_CONFIG_LINE}\n")).unwrap_err();
        assert!(err.to_string().contains("no GPU detection line"));
    }

    #[test]
    fn test_inference_compute_line_confirms_gpu() {
        let log = format!(
            "{SERVER_CONFIG_LINE}\n\
time=2025-01-20T10:00:01.000Z level=INFO source=types.go:131 msg=\"inference compute\" \
id=GPU-4c2a library=cuda compute=8.6 name=\"NVIDIA RTX A6000\" total=\"47.5 GiB\"\n"
        );
        let detail = gpu_offload_from_log(&log).unwrap();
        assert!(detail.starts_with("GPU in use:"));
        assert!(detail.contains("library=cuda"));
    }

    #[test]
    fn test_cpu_fallback_after_restart_wins() {
        let log = "msg=\"inference compute\" library=cuda\n\
msg=\"inference compute\" id=0 library=cpu total=\"62.7 GiB\"\n";
        assert!(gpu_offload_from_log(log).is_err());
    }
}
