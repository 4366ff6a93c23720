//! Concrete provisioning steps and the default plan.

mod hardware;
mod model;
mod packages;
mod server;

pub use hardware::DetectGpu;
pub use model::{LoadedModels, PullModel, SmokeTest};
pub use packages::InstallPackages;
pub use server::{CheckGpuOffload, InstallRuntime, LaunchServer};

use crate::config::ProvisionConfig;
use crate::step::Step;

/// Build the standard plan.
///
/// GPU detection runs right after its own tooling is installed and before
/// anything expensive.
#[must_use]
pub fn default_plan(config: &ProvisionConfig) -> Vec<Box<dyn Step>> {
    let mut plan: Vec<Box<dyn Step>> = vec![
        Box::new(InstallPackages::new(
            "detection-tools",
            config.detection_packages.clone(),
        )),
        Box::new(DetectGpu),
        Box::new(InstallPackages::new(
            "system-packages",
            config.system_packages.clone(),
        )),
        Box::new(InstallRuntime),
        Box::new(LaunchServer),
        Box::new(CheckGpuOffload),
        Box::new(PullModel),
    ];

    plan.extend(
        config
            .smoke_prompts
            .iter()
            .enumerate()
            .map(|(i, prompt)| Box::new(SmokeTest::new(i + 1, prompt.clone())) as Box<dyn Step>),
    );
    plan.push(Box::new(LoadedModels));
    plan
}
