//! Runtime environment resolution.
//!
//! The hosting platform usually pre-sets the runtime's variables. Values it
//! set are never overridden; only missing ones are filled from the
//! configured fallbacks. The process environment is never modified; the
//! resolved map is handed to each runtime command explicitly.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::config::{ProvisionConfig, DEFAULT_PORT};

/// Bind address variable read by the runtime.
pub const HOST_VAR: &str = "OLLAMA_HOST";

/// GPU selector variable.
pub const VISIBLE_DEVICES_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// CUDA installation root variable.
pub const CUDA_HOME_VAR: &str = "CUDA_HOME";

/// Variables whose joint presence marks a platform-managed environment.
pub const PLATFORM_MARKERS: [&str; 2] = [HOST_VAR, VISIBLE_DEVICES_VAR];

/// Where the runtime environment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvSource {
    /// Platform pre-set the variables; passed through unchanged.
    Platform,
    /// At least one fallback was applied.
    Defaults,
}

impl fmt::Display for EnvSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform => write!(f, "platform"),
            Self::Defaults => write!(f, "defaults"),
        }
    }
}

/// Resolved environment for runtime invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeEnv {
    /// Where the values came from.
    pub source: EnvSource,
    /// Variables to set on every runtime command.
    pub vars: BTreeMap<String, String>,
    /// Variables filled from fallbacks because they were absent.
    pub defaulted: Vec<String>,
}

impl RuntimeEnv {
    /// Resolve from the current process environment.
    #[must_use]
    pub fn from_process(config: &ProvisionConfig) -> Self {
        Self::resolve(config, |key| std::env::var(key).ok())
    }

    /// Resolve using `lookup` to read existing variables.
    ///
    /// When both platform markers are set the managed variables the platform
    /// provided are passed through and nothing is added. Otherwise every
    /// managed variable keeps its existing non-blank value and only the
    /// missing ones take fallbacks.
    pub fn resolve<F>(config: &ProvisionConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = &config.env_defaults;
        let managed = [
            HOST_VAR,
            VISIBLE_DEVICES_VAR,
            defaults.gpu_flag_var.as_str(),
            CUDA_HOME_VAR,
        ];

        if PLATFORM_MARKERS.iter().all(|key| present(*key).is_some()) {
            let vars = managed
                .iter()
                .filter_map(|key| present(*key).map(|v| ((*key).to_string(), v)))
                .collect();
            return Self {
                source: EnvSource::Platform,
                vars,
                defaulted: Vec::new(),
            };
        }

        let mut vars = BTreeMap::new();
        let mut defaulted = Vec::new();
        let mut fill = |key: &str, fallback: String| {
            let value = present(key).unwrap_or_else(|| {
                defaulted.push(key.to_string());
                fallback
            });
            vars.insert(key.to_string(), value);
        };

        fill(HOST_VAR, format!("{}:{}", defaults.bind_host, config.port));
        fill(VISIBLE_DEVICES_VAR, defaults.visible_devices.clone());
        fill(defaults.gpu_flag_var.as_str(), "1".to_string());
        fill(CUDA_HOME_VAR, defaults.cuda_home.display().to_string());

        let cuda_home = vars
            .get(CUDA_HOME_VAR)
            .cloned()
            .unwrap_or_else(|| defaults.cuda_home.display().to_string());
        vars.insert(
            "LD_LIBRARY_PATH".to_string(),
            prepend_path(&format!("{cuda_home}/lib64"), present("LD_LIBRARY_PATH")),
        );
        vars.insert(
            "PATH".to_string(),
            prepend_path(&format!("{cuda_home}/bin"), present("PATH")),
        );

        Self {
            source: EnvSource::Defaults,
            vars,
            defaulted,
        }
    }

    /// Look up a resolved variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Port the runtime will listen on according to the resolved bind address.
    ///
    /// A bind address without a port means the runtime's default port.
    #[must_use]
    pub fn bind_port(&self) -> Option<u16> {
        self.get(HOST_VAR).map(|host| parse_bind_port(host).unwrap_or(DEFAULT_PORT))
    }

    /// Point `config.port` at the port the server will actually bind.
    ///
    /// Returns the previous port when it changed.
    pub fn align_port(&self, config: &mut ProvisionConfig) -> Option<u16> {
        let port = self.bind_port()?;
        if port == config.port {
            return None;
        }
        warn!(
            configured = config.port,
            bind_port = port,
            "{HOST_VAR} overrides the configured port"
        );
        Some(std::mem::replace(&mut config.port, port))
    }
}

/// Extract the port from a bind address such as `0.0.0.0:8080`,
/// `http://127.0.0.1:8080` or `[::]:8080`.
fn parse_bind_port(value: &str) -> Option<u16> {
    let value = value.trim();
    let authority = value
        .split_once("://")
        .map_or(value, |(_, rest)| rest)
        .split('/')
        .next()
        .unwrap_or_default();

    let port = if let Some(rest) = authority.strip_prefix('[') {
        rest.split_once("]:")?.1
    } else if authority.matches(':').count() == 1 {
        authority.rsplit_once(':')?.1
    } else {
        return None;
    };
    port.parse().ok()
}

fn prepend_path(entry: &str, existing: Option<String>) -> String {
    match existing {
        Some(rest) if rest.split(':').any(|p| p == entry) => rest,
        Some(rest) => format!("{entry}:{rest}"),
        None => entry.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_platform_variables_are_trusted() {
        let config = ProvisionConfig::default();
        let env = RuntimeEnv::resolve(
            &config,
            lookup_from(&[(HOST_VAR, "0.0.0.0:8080"), (VISIBLE_DEVICES_VAR, "0,1")]),
        );

        assert_eq!(env.source, EnvSource::Platform);
        assert_eq!(env.get(HOST_VAR), Some("0.0.0.0:8080"));
        assert_eq!(env.get(VISIBLE_DEVICES_VAR), Some("0,1"));
        assert_eq!(env.get("CUDA_HOME"), None);
    }

    #[test]
    fn test_defaults_when_platform_absent() {
        let config = ProvisionConfig::default();
        let env = RuntimeEnv::resolve(
            &config,
            lookup_from(&[(VISIBLE_DEVICES_VAR, "0"), ("PATH", "/usr/bin:/bin")]),
        );

        assert_eq!(env.source, EnvSource::Defaults);
        assert_eq!(env.get(HOST_VAR), Some("0.0.0.0:11434"));
        assert_eq!(env.get("OLLAMA_USE_CUDA"), Some("1"));
        assert_eq!(env.get("CUDA_HOME"), Some("/usr/local/cuda"));
        assert_eq!(env.get("PATH"), Some("/usr/local/cuda/bin:/usr/bin:/bin"));
        assert_eq!(env.get("LD_LIBRARY_PATH"), Some("/usr/local/cuda/lib64"));
    }

    #[test]
    fn test_blank_platform_value_counts_as_absent() {
        let config = ProvisionConfig::default();
        let env = RuntimeEnv::resolve(
            &config,
            lookup_from(&[(HOST_VAR, " "), (VISIBLE_DEVICES_VAR, "0")]),
        );
        assert_eq!(env.source, EnvSource::Defaults);
    }

    #[test]
    fn test_partial_environment_keeps_platform_values() {
        let config = ProvisionConfig::default();
        let env = RuntimeEnv::resolve(
            &config,
            lookup_from(&[(VISIBLE_DEVICES_VAR, "1"), (CUDA_HOME_VAR, "/opt/cuda-12.4")]),
        );

        assert_eq!(env.source, EnvSource::Defaults);
        assert_eq!(env.get(VISIBLE_DEVICES_VAR), Some("1"));
        assert_eq!(env.get(CUDA_HOME_VAR), Some("/opt/cuda-12.4"));
        assert_eq!(env.get(HOST_VAR), Some("0.0.0.0:11434"));
        assert_eq!(env.get("LD_LIBRARY_PATH"), Some("/opt/cuda-12.4/lib64"));
        assert_eq!(env.get("PATH"), Some("/opt/cuda-12.4/bin"));
        assert_eq!(env.defaulted, vec![HOST_VAR, "OLLAMA_USE_CUDA"]);
    }

    #[test]
    fn test_parse_bind_port() {
        assert_eq!(parse_bind_port("0.0.0.0:8080"), Some(8080));
        assert_eq!(parse_bind_port("http://127.0.0.1:9000/"), Some(9000));
        assert_eq!(parse_bind_port("[::]:11500"), Some(11500));
        assert_eq!(parse_bind_port("0.0.0.0"), None);
        assert_eq!(parse_bind_port("::"), None);
    }

    #[test]
    fn test_platform_bind_address_sets_port() {
        let mut config = ProvisionConfig::default();
        let env = RuntimeEnv::resolve(
            &config,
            lookup_from(&[(HOST_VAR, "0.0.0.0:8080"), (VISIBLE_DEVICES_VAR, "0")]),
        );

        assert_eq!(env.bind_port(), Some(8080));
        assert_eq!(env.align_port(&mut config), Some(11434));
        assert_eq!(config.port, 8080);
        assert_eq!(config.local_base_url(), "http://127.0.0.1:8080");
        assert_eq!(env.align_port(&mut config), None);
    }

    #[test]
    fn test_bind_address_without_port_uses_runtime_default() {
        let mut config = ProvisionConfig {
            port: 9999,
            ..ProvisionConfig::default()
        };
        let env = RuntimeEnv::resolve(
            &config,
            lookup_from(&[(HOST_VAR, "0.0.0.0"), (VISIBLE_DEVICES_VAR, "0")]),
        );

        env.align_port(&mut config);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_defaults_keep_configured_port() {
        let mut config = ProvisionConfig {
            port: 9999,
            ..ProvisionConfig::default()
        };
        let env = RuntimeEnv::resolve(&config, |_| None);

        assert_eq!(env.align_port(&mut config), None);
        assert_eq!(config.port, 9999);
    }

    #[test]
    fn test_path_entry_not_duplicated() {
        assert_eq!(
            prepend_path("/usr/local/cuda/bin", Some("/usr/local/cuda/bin:/bin".into())),
            "/usr/local/cuda/bin:/bin"
        );
    }
}
