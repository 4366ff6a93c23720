//! Provisioning configuration types.
//!
//! All settings the plan needs are gathered once into [`ProvisionConfig`]
//! and passed explicitly to every step.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Default runtime HTTP port.
pub const DEFAULT_PORT: u16 = 11434;

/// Default model to serve.
pub const DEFAULT_MODEL: &str = "deepseek-r1:14b";

/// Readiness polling policy.
///
/// Polling uses a fixed interval with no backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessPolicy {
    /// Seconds between probe attempts.
    pub poll_interval_secs: u64,
    /// Maximum seconds to wait for the server to respond.
    pub max_wait_secs: u64,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            max_wait_secs: 60,
            request_timeout_secs: 5,
        }
    }
}

impl ReadinessPolicy {
    /// Interval between attempts.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Total wait budget.
    #[must_use]
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    /// Per-request HTTP timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Hosting platform settings used to build the public endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Environment variable holding the instance's public host id.
    pub host_var: String,
    /// Platform name used in the proxy domain (`<host>-<port>.proxy.<name>.net`).
    pub proxy_domain: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            host_var: "RUNPOD_POD_ID".into(),
            proxy_domain: "runpod".into(),
        }
    }
}

/// Fallback values for the runtime environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvDefaults {
    /// Bind host for the runtime (port is appended).
    pub bind_host: String,
    /// GPU selector for `CUDA_VISIBLE_DEVICES`.
    pub visible_devices: String,
    /// Name of the runtime's GPU-enable flag.
    pub gpu_flag_var: String,
    /// CUDA installation root.
    pub cuda_home: PathBuf,
}

impl Default for EnvDefaults {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".into(),
            visible_devices: "0".into(),
            gpu_flag_var: "OLLAMA_USE_CUDA".into(),
            cuda_home: PathBuf::from("/usr/local/cuda"),
        }
    }
}

/// Full provisioning configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    // Model
    /// Model id to acquire and smoke test (e.g., "deepseek-r1:14b").
    pub model: String,

    // Runtime
    /// Runtime CLI binary.
    pub runtime_bin: String,
    /// URL of the runtime's installer script.
    pub install_script_url: String,
    /// HTTP port the runtime listens on. A port in a platform-set bind
    /// address takes precedence (see `RuntimeEnv::align_port`).
    pub port: u16,

    // Packages
    /// Packages needed to detect the GPU (installed before detection).
    pub detection_packages: Vec<String>,
    /// Remaining OS prerequisites (installed after the GPU is confirmed).
    pub system_packages: Vec<String>,

    // Readiness
    /// Readiness polling policy.
    pub readiness: ReadinessPolicy,

    // Smoke tests
    /// Prompts sent to the model once it is available.
    pub smoke_prompts: Vec<String>,
    /// Client-side timeout for each smoke prompt, in seconds.
    pub smoke_timeout_secs: u64,

    // Paths
    /// Workspace directory (status script lands here).
    pub workspace_dir: PathBuf,
    /// Directory for server and provisioner logs.
    pub log_dir: PathBuf,

    // Platform
    /// Hosting platform settings.
    pub platform: PlatformConfig,
    /// Public host id of this instance (read from `platform.host_var` when unset).
    pub public_host: Option<String>,
    /// Runtime environment fallbacks.
    pub env_defaults: EnvDefaults,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            runtime_bin: "ollama".into(),
            install_script_url: "https://ollama.com/install.sh".into(),
            port: DEFAULT_PORT,
            detection_packages: vec!["pciutils".into()],
            system_packages: vec!["curl".into(), "ca-certificates".into(), "lsof".into()],
            readiness: ReadinessPolicy::default(),
            smoke_prompts: vec!["Reply with the single word: ready".into()],
            smoke_timeout_secs: 120,
            workspace_dir: PathBuf::from("/workspace"),
            log_dir: PathBuf::from("/workspace/logs"),
            platform: PlatformConfig::default(),
            public_host: None,
            env_defaults: EnvDefaults::default(),
        }
    }
}

impl ProvisionConfig {
    /// Load configuration from a YAML file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the run meaningless.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            bail!("model must not be empty");
        }
        if self.runtime_bin.trim().is_empty() {
            bail!("runtime_bin must not be empty");
        }
        if self.port == 0 {
            bail!("port must be non-zero");
        }
        if self.readiness.poll_interval_secs == 0 {
            bail!("readiness.poll_interval_secs must be at least 1");
        }
        if self.readiness.max_wait_secs < self.readiness.poll_interval_secs {
            bail!(
                "readiness.max_wait_secs ({}) must be >= poll_interval_secs ({})",
                self.readiness.max_wait_secs,
                self.readiness.poll_interval_secs
            );
        }
        Ok(())
    }

    /// Local base URL of the runtime API.
    #[must_use]
    pub fn local_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Server log file written by the detached runtime process.
    #[must_use]
    pub fn server_log_path(&self) -> PathBuf {
        let stem = Path::new(&self.runtime_bin)
            .file_name()
            .map_or_else(|| "server".into(), |n| n.to_string_lossy());
        self.log_dir.join(format!("{stem}.log"))
    }

    /// Provisioner's own log file.
    #[must_use]
    pub fn provision_log_path(&self) -> PathBuf {
        self.log_dir.join("provision.log")
    }

    /// Persisted JSON run summary.
    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.log_dir.join("provision-summary.json")
    }

    /// Generated status-check script.
    #[must_use]
    pub fn status_script_path(&self) -> PathBuf {
        self.workspace_dir.join("check_status.sh")
    }

    /// Fill `public_host` from the platform's host variable if not already set.
    pub fn resolve_public_host<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.public_host.is_none() {
            self.public_host = lookup(&self.platform.host_var).filter(|h| !h.trim().is_empty());
        }
    }

    /// Externally reachable API endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        crate::summary::endpoint_url(
            self.public_host.as_deref(),
            self.port,
            &self.platform.proxy_domain,
        )
    }

    /// Smoke prompt timeout.
    #[must_use]
    pub fn smoke_timeout(&self) -> Duration {
        Duration::from_secs(self.smoke_timeout_secs)
    }
}
