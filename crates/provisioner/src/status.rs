//! On-demand status checks.
//!
//! [`render_status_script`] produces a standalone shell script that re-runs
//! the readiness probe and model listings after the provisioner has exited.
//! [`check_status`] does the same natively for `provision status`.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::config::ProvisionConfig;
use crate::runtime::ModelEntry;
use crate::step::Context;

/// Render the status-check script.
#[must_use]
pub fn render_status_script(config: &ProvisionConfig, endpoint: &str) -> String {
    let bin = &config.runtime_bin;
    let version_url = format!("{}/api/version", config.local_base_url());
    let server_log = config.server_log_path();
    let server_log = server_log.display();

    format!(
        r#"#!/usr/bin/env bash
# Status check for the {bin} inference server.
# Generated by `provision`; safe to re-run at any time.

echo "=== Server ==="
if curl -fsS --max-time 5 {version_url}; then
    echo
    echo "server: ready"
else
    echo "server: not responding (see {server_log})"
fi

echo
echo "=== Installed models ==="
{bin} list

echo
echo "=== Loaded models ==="
{bin} ps

echo
echo "=== GPU ==="
nvidia-smi --query-gpu=index,name,memory.used,memory.total,utilization.gpu --format=csv,noheader || echo "nvidia-smi unavailable"

echo
echo "Endpoint: {endpoint}"
echo "Logs:     tail -f {server_log}"
"#
    )
}

/// Write the status-check script and mark it executable.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_status_script(path: &Path, content: &str) -> std::io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }

    info!(path = %path.display(), "Wrote status-check script");
    Ok(path.to_path_buf())
}

/// Point-in-time server status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    /// Version reported by the readiness endpoint, if responding.
    pub server_version: Option<String>,
    /// Probe failure, if not responding.
    pub server_error: Option<String>,
    /// Installed models (empty when the listing failed).
    pub installed: Vec<ModelEntry>,
    /// Loaded models (empty when the listing failed).
    pub loaded: Vec<ModelEntry>,
    /// Whether the configured model is installed.
    pub model_present: bool,
}

impl StatusReport {
    /// Whether the server answered its readiness probe.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.server_version.is_some()
    }
}

/// Probe the server once and query its model listings.
pub async fn check_status(ctx: &Context) -> StatusReport {
    let mut report = StatusReport::default();

    match ctx.probe.check().await {
        Ok(version) => report.server_version = Some(version),
        Err(e) => report.server_error = Some(e.to_string()),
    }

    let runtime = ctx.runtime();
    report.installed = runtime.list().await.unwrap_or_default();
    report.loaded = runtime.ps().await.unwrap_or_default();
    report.model_present = report
        .installed
        .iter()
        .any(|m| crate::runtime::model_matches(&m.name, &ctx.config.model));

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_contents() {
        let config = ProvisionConfig::default();
        let script =
            render_status_script(&config, "https://abc-11434.proxy.runpod.net");

        assert!(script.starts_with("#!/usr/bin/env bash\n"));
        assert!(script.contains("curl -fsS --max-time 5 http://127.0.0.1:11434/api/version"));
        assert!(script.contains("ollama list"));
        assert!(script.contains("ollama ps"));
        assert!(script.contains("Endpoint: https://abc-11434.proxy.runpod.net"));
        assert!(script.contains("tail -f /workspace/logs/ollama.log"));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/check_status.sh");
        write_status_script(&path, "#!/usr/bin/env bash\necho ok\n").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
