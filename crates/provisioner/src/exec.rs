//! External command execution.
//!
//! Every collaborator (package manager, GPU query tool, runtime CLI) is
//! reached through [`CommandRunner`], so plans can be driven against a
//! scripted runner in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::ExecError;

/// A command to execute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    pub envs: BTreeMap<String, String>,
    /// Client-side timeout; `None` blocks until the command exits.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Create a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Set several environment variables.
    #[must_use]
    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.envs
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Bound the command by a client-side timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (`None` when killed by a signal).
    pub code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`ExecError::Failed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command did not exit successfully.
    pub fn into_success(self, cmd: &CommandSpec) -> Result<Self, ExecError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecError::Failed {
                command: cmd.to_string(),
                code: self.code.unwrap_or(-1),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is reported in [`CommandOutput::code`], not as an error.
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, ExecError>;

    /// Launch a command detached from this process, appending its stdout and
    /// stderr to `log_path`. Returns the child PID.
    ///
    /// The child is not supervised and keeps running after this process exits.
    async fn spawn_detached(&self, cmd: &CommandSpec, log_path: &Path) -> Result<u32, ExecError>;

    /// Run a command and fail on a non-zero exit.
    async fn run_checked(&self, cmd: &CommandSpec) -> Result<CommandOutput, ExecError> {
        self.run(cmd).await?.into_success(cmd)
    }
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn map_spawn_error(cmd: &CommandSpec, e: std::io::Error) -> ExecError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExecError::NotFound(cmd.program.clone())
        } else {
            ExecError::Io {
                command: cmd.to_string(),
                source: e,
            }
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, ExecError> {
        debug!(command = %cmd, "Running command");

        let mut command = tokio::process::Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(&cmd.envs)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match cmd.timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| ExecError::TimedOut {
                    command: cmd.to_string(),
                    secs: limit.as_secs(),
                })?,
            None => command.output().await,
        }
        .map_err(|e| Self::map_spawn_error(cmd, e))?;

        let out = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %cmd, code = ?out.code, "Command finished");
        Ok(out)
    }

    async fn spawn_detached(&self, cmd: &CommandSpec, log_path: &Path) -> Result<u32, ExecError> {
        let io_err = |source| ExecError::Io {
            command: cmd.to_string(),
            source,
        };

        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(io_err)?;
        let stderr = stdout.try_clone().map_err(io_err)?;

        let mut command = std::process::Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(&cmd.envs)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        // Own process group so a Ctrl-C on the provisioner does not reach the server.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command
            .spawn()
            .map_err(|e| Self::map_spawn_error(cmd, e))?;
        let pid = child.id();
        info!(command = %cmd, pid, log = %log_path.display(), "Launched detached process");
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display_quotes_whitespace() {
        let cmd = CommandSpec::new("ollama").args(["run", "deepseek-r1:14b", "Say hi"]);
        assert_eq!(cmd.to_string(), "ollama run deepseek-r1:14b \"Say hi\"");
    }

    #[test]
    fn test_into_success_reports_stderr() {
        let cmd = CommandSpec::new("apt-get").arg("install");
        let err = CommandOutput::failed(100, "E: Unable to locate package\n")
            .into_success(&cmd)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "`apt-get install` exited with status 100: E: Unable to locate package"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let out = SystemRunner
            .run(&CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_timeout() {
        let cmd = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));
        let err = SystemRunner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let err = SystemRunner
            .run(&CommandSpec::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_detached_appends_to_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("server.log");
        std::fs::write(&log, "previous run\n").unwrap();

        let cmd = CommandSpec::new("sh").args(["-c", "echo started"]);
        let pid = SystemRunner.spawn_detached(&cmd, &log).await.unwrap();
        assert!(pid > 0);

        let mut content = String::new();
        for _ in 0..50 {
            content = std::fs::read_to_string(&log).unwrap();
            if content.contains("started") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(content.starts_with("previous run\n"));
        assert!(content.contains("started"));
    }
}
