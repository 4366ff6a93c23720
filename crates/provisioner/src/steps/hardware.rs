//! GPU presence check.

use async_trait::async_trait;
use tracing::info;

use crate::error::StepError;
use crate::gpu::detect_gpus;
use crate::step::{Context, Step};

/// Fails the run when no GPU is detected.
pub struct DetectGpu;

#[async_trait]
impl Step for DetectGpu {
    fn name(&self) -> &str {
        "gpu"
    }

    async fn already_satisfied(&self, _ctx: &Context) -> Option<String> {
        None
    }

    async fn apply(&self, ctx: &Context) -> Result<String, StepError> {
        let devices = detect_gpus(ctx.runner.as_ref()).await;
        if devices.is_empty() {
            return Err(StepError::Failed("no GPU detected".into()));
        }

        for device in &devices {
            info!(gpu = %device, "Detected GPU");
        }
        let names: Vec<String> = devices.iter().map(ToString::to_string).collect();
        Ok(format!(
            "{} GPU(s) detected: {}",
            devices.len(),
            names.join("; ")
        ))
    }
}
