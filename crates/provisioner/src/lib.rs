//! GPU instance provisioning for LLM inference servers.
//!
//! This crate turns a fresh GPU cloud instance into a running inference
//! server: it installs OS packages, confirms a GPU is present, installs the
//! runtime, launches its server in the background, waits for it to become
//! ready, pulls the model and smoke tests it.
//!
//! ## Flow
//!
//! ```text
//! detection-tools → gpu → system-packages → runtime → server
//!                                                       │
//!                                              readiness loop (fixed interval)
//!                                                       │
//!                   gpu-offload → model → smoke:N → loaded-models → summary
//! ```
//!
//! Every step checks whether its effect already holds before acting, so the
//! whole run can simply be repeated after a failure.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use provisioner::{default_plan, Context, HttpVersionProbe, Orchestrator, ProvisionConfig,
//!     RuntimeEnv, SystemRunner};
//!
//! let config = ProvisionConfig::default();
//! let env = RuntimeEnv::from_process(&config);
//! let probe = HttpVersionProbe::new(&config.local_base_url(), config.readiness.request_timeout())?;
//! let ctx = Context::new(config.clone(), env, Arc::new(SystemRunner), Arc::new(probe));
//!
//! let summary = Orchestrator::new(ctx).run(&default_plan(&config)).await?;
//! ```

pub mod config;
pub mod env;
pub mod error;
pub mod exec;
pub mod gpu;
pub mod orchestrator;
pub mod probe;
pub mod runtime;
pub mod status;
pub mod step;
pub mod steps;
pub mod summary;
pub mod ui;

pub use config::{ProvisionConfig, ReadinessPolicy};
pub use env::{EnvSource, RuntimeEnv};
pub use error::{ExecError, ProbeError, SetupError, StepError};
pub use exec::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use orchestrator::Orchestrator;
pub use probe::{HttpVersionProbe, ReadinessProbe};
pub use step::{Context, Severity, Step};
pub use steps::default_plan;
pub use summary::{RunSummary, StepOutcome};
