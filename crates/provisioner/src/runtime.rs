//! Inference runtime CLI wrapper (`serve`, `list`, `pull`, `ps`, `run`).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::error::ExecError;
use crate::exec::{CommandRunner, CommandSpec};

/// A row of `list` or `ps` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelEntry {
    /// Model name including tag (e.g. "deepseek-r1:14b").
    pub name: String,
    /// Remaining columns as printed by the runtime.
    pub details: String,
}

/// Parse a table whose first line is a header and whose first column is the model name.
#[must_use]
pub fn parse_model_table(output: &str) -> Vec<ModelEntry> {
    output
        .lines()
        .skip_while(|line| line.trim().is_empty())
        .skip(1)
        .filter_map(|line| {
            let line = line.trim();
            let (name, rest) = line
                .split_once(char::is_whitespace)
                .unwrap_or((line, ""));
            if name.is_empty() {
                return None;
            }
            Some(ModelEntry {
                name: name.to_string(),
                details: rest.split_whitespace().collect::<Vec<_>>().join(" "),
            })
        })
        .collect()
}

/// Whether `entry_name` refers to `model`. Untagged ids match `:latest`.
#[must_use]
pub fn model_matches(entry_name: &str, model: &str) -> bool {
    if entry_name == model {
        return true;
    }
    !model.contains(':') && entry_name == format!("{model}:latest")
}

/// Runtime CLI bound to a runner and a resolved environment.
pub struct Runtime<'a> {
    runner: &'a dyn CommandRunner,
    bin: &'a str,
    env: &'a BTreeMap<String, String>,
}

impl<'a> Runtime<'a> {
    /// Create a runtime wrapper.
    #[must_use]
    pub fn new(
        runner: &'a dyn CommandRunner,
        bin: &'a str,
        env: &'a BTreeMap<String, String>,
    ) -> Self {
        Self { runner, bin, env }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(self.bin).envs(self.env)
    }

    /// Query the CLI version (`--version`).
    ///
    /// # Errors
    ///
    /// Returns an error if the binary is missing or exits non-zero.
    pub async fn version(&self) -> Result<String, ExecError> {
        let cmd = self.command().arg("--version");
        let out = self.runner.run_checked(&cmd).await?;
        // "ollama version is 0.5.7" (may be preceded by a client/server warning line)
        let text = if out.stdout.trim().is_empty() {
            &out.stderr
        } else {
            &out.stdout
        };
        let line = text
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .trim();
        Ok(line
            .rsplit_once(' ')
            .map_or(line, |(_, version)| version)
            .to_string())
    }

    /// Installed models.
    ///
    /// # Errors
    ///
    /// Returns an error if `list` fails.
    pub async fn list(&self) -> Result<Vec<ModelEntry>, ExecError> {
        let cmd = self.command().arg("list");
        let out = self.runner.run_checked(&cmd).await?;
        Ok(parse_model_table(&out.stdout))
    }

    /// Currently loaded models.
    ///
    /// # Errors
    ///
    /// Returns an error if `ps` fails.
    pub async fn ps(&self) -> Result<Vec<ModelEntry>, ExecError> {
        let cmd = self.command().arg("ps");
        let out = self.runner.run_checked(&cmd).await?;
        Ok(parse_model_table(&out.stdout))
    }

    /// Whether `model` is already installed.
    ///
    /// # Errors
    ///
    /// Returns an error if `list` fails.
    pub async fn has_model(&self, model: &str) -> Result<bool, ExecError> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|entry| model_matches(&entry.name, model)))
    }

    /// Download a model. Blocks until the download completes or fails.
    ///
    /// # Errors
    ///
    /// Returns an error if `pull` fails.
    pub async fn pull(&self, model: &str) -> Result<(), ExecError> {
        info!(model = %model, "Pulling model");
        let cmd = self.command().args(["pull", model]);
        self.runner.run_checked(&cmd).await?;
        Ok(())
    }

    /// Send a prompt to a model, bounded by `timeout`. Returns the response text.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or a non-zero exit.
    pub async fn run_prompt(
        &self,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, ExecError> {
        let cmd = self.command().args(["run", model, prompt]).timeout(timeout);
        let out = self.runner.run_checked(&cmd).await?;
        Ok(out.stdout.trim().to_string())
    }

    /// Launch `serve` detached, appending output to `log_path`. Returns the PID.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    pub async fn serve_detached(&self, log_path: &Path) -> Result<u32, ExecError> {
        let cmd = self.command().arg("serve");
        self.runner.spawn_detached(&cmd, log_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_output() {
        let out = "\
NAME               ID              SIZE      MODIFIED
deepseek-r1:14b    ea35dfe18182    9.0 GB    2 minutes ago
llama3.2:latest    a80c4f17acd5    2.0 GB    3 days ago
";
        let models = parse_model_table(out);
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "deepseek-r1:14b");
        assert_eq!(models[0].details, "ea35dfe18182 9.0 GB 2 minutes ago");
        assert_eq!(models[1].name, "llama3.2:latest");
    }

    #[test]
    fn test_parse_header_only() {
        assert!(parse_model_table("NAME    ID    SIZE    MODIFIED\n").is_empty());
        assert!(parse_model_table("").is_empty());
    }

    #[test]
    fn test_model_matches() {
        assert!(model_matches("deepseek-r1:14b", "deepseek-r1:14b"));
        assert!(!model_matches("deepseek-r1:7b", "deepseek-r1:14b"));
        assert!(model_matches("llama3.2:latest", "llama3.2"));
        assert!(!model_matches("llama3.2:1b", "llama3.2"));
    }
}
