//! Provision CLI - bring up an LLM inference server on a GPU instance.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use provisioner::status::check_status;
use provisioner::{
    default_plan, ui, Context, HttpVersionProbe, Orchestrator, ProvisionConfig, RuntimeEnv,
    SystemRunner,
};

/// Provision CLI - set up an LLM inference server on a GPU instance.
#[derive(Parser)]
#[command(name = "provision", version)]
#[command(about = "Provision a GPU instance to serve an LLM inference runtime")]
#[command(long_about = "Installs prerequisites, verifies the GPU, installs the runtime,\n\
                        launches its server, pulls the model and smoke tests it.\n\n\
                        Every step is idempotent - re-running the command after a\n\
                        failure only performs the work that is still missing.")]
struct Cli {
    /// YAML config file (fields not given take defaults).
    #[arg(long, short, global = true, env = "PROVISION_CONFIG")]
    config: Option<PathBuf>,

    /// Model to serve.
    #[arg(long, global = true, env = "PROVISION_MODEL")]
    model: Option<String>,

    /// Runtime API port.
    #[arg(long, global = true, env = "PROVISION_PORT")]
    port: Option<u16>,

    /// Workspace directory (status script location).
    #[arg(long, global = true, env = "PROVISION_WORKSPACE")]
    workspace_dir: Option<PathBuf>,

    /// Log directory.
    #[arg(long, global = true, env = "PROVISION_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full provisioning plan.
    Up {
        /// Seconds to wait for the server to become ready.
        #[arg(long, env = "PROVISION_MAX_WAIT")]
        max_wait: Option<u64>,

        /// Seconds between readiness probes.
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Smoke prompt (repeatable; replaces the configured prompts).
        #[arg(long = "prompt")]
        prompts: Vec<String>,

        /// Skip smoke tests.
        #[arg(long, default_value = "false")]
        no_smoke: bool,
    },

    /// Check server readiness and model listings.
    Status,

    /// Print the resolved runtime environment.
    Env,
}

impl Cli {
    /// Build the effective configuration: file, then flags.
    fn load_config(&self) -> Result<ProvisionConfig> {
        let mut config = match &self.config {
            Some(path) => ProvisionConfig::load(path)?,
            None => ProvisionConfig::default(),
        };

        if let Some(model) = &self.model {
            config.model.clone_from(model);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.workspace_dir {
            config.workspace_dir.clone_from(dir);
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir.clone_from(dir);
        }

        if let Commands::Up {
            max_wait,
            poll_interval,
            prompts,
            no_smoke,
        } = &self.command
        {
            if let Some(secs) = max_wait {
                config.readiness.max_wait_secs = *secs;
            }
            if let Some(secs) = poll_interval {
                config.readiness.poll_interval_secs = *secs;
            }
            if !prompts.is_empty() {
                config.smoke_prompts.clone_from(prompts);
            }
            if *no_smoke {
                config.smoke_prompts.clear();
            }
        }

        config.resolve_public_host(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }
}

impl Commands {
    /// Only a provisioning run keeps a log file; the read-only commands must
    /// work where the log directory cannot be created.
    fn log_file(&self, config: &ProvisionConfig) -> Option<PathBuf> {
        matches!(self, Self::Up { .. }).then(|| config.provision_log_path())
    }
}

fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("provisioner=debug,provision=debug,info")
    } else {
        EnvFilter::new("provisioner=info,provision=info,warn")
    };

    let file_layer = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create log directory {}", dir.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

fn build_context(config: &ProvisionConfig, env: RuntimeEnv) -> Result<Context> {
    let probe = HttpVersionProbe::new(&config.local_base_url(), config.readiness.request_timeout())
        .context("Failed to create readiness probe")?;
    Ok(Context::new(
        config.clone(),
        env,
        Arc::new(SystemRunner),
        Arc::new(probe),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = cli.load_config()?;
    init_tracing(cli.verbose, cli.command.log_file(&config).as_deref())?;

    let env = RuntimeEnv::from_process(&config);
    env.align_port(&mut config);
    let ctx = build_context(&config, env)?;

    match cli.command {
        Commands::Up { .. } => {
            ui::print_section(&format!("Provisioning {} inference server", config.model));
            info!(
                model = %config.model,
                port = config.port,
                env_source = %ctx.env.source,
                "Starting provisioning run"
            );

            let plan = default_plan(&config);
            match Orchestrator::new(ctx).run(&plan).await {
                Ok(summary) => ui::print_summary(&summary),
                Err(e) => {
                    ui::print_error(&e.to_string());
                    ui::print_info(&format!(
                        "Logs: {}. Fix the cause and re-run; completed steps will be skipped.",
                        config.log_dir.display()
                    ));
                    return Err(e.into());
                }
            }
        }

        Commands::Status => {
            let report = check_status(&ctx).await;
            ui::print_status(&report, &config.model, &config.endpoint());
            if !report.is_ready() {
                anyhow::bail!("Server at {} is not responding", config.local_base_url());
            }
        }

        Commands::Env => {
            ui::print_section("Runtime Environment");
            ui::print_kv("Source", &ctx.env.source.to_string());
            if !ctx.env.defaulted.is_empty() {
                ui::print_kv("Defaulted", &ctx.env.defaulted.join(", "));
            }
            for (key, value) in &ctx.env.vars {
                ui::print_kv(key, value);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("provision").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_only_up_writes_log_file() {
        let cli = parse(&["--log-dir", "/nonexistent/readonly/logs", "env"]);
        let config = cli.load_config().unwrap();
        assert_eq!(cli.command.log_file(&config), None);

        let cli = parse(&["--log-dir", "/nonexistent/readonly/logs", "status"]);
        let config = cli.load_config().unwrap();
        assert_eq!(cli.command.log_file(&config), None);

        let cli = parse(&["--log-dir", "/var/log/provision", "up"]);
        let config = cli.load_config().unwrap();
        assert_eq!(
            cli.command.log_file(&config),
            Some(PathBuf::from("/var/log/provision/provision.log"))
        );
    }

    #[test]
    fn test_up_flags_override_config() {
        let cli = parse(&["--model", "llama3.2:3b", "up", "--max-wait", "90", "--no-smoke"]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.model, "llama3.2:3b");
        assert_eq!(config.readiness.max_wait_secs, 90);
        assert!(config.smoke_prompts.is_empty());
    }
}
