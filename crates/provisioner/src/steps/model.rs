//! Model acquisition and smoke tests.

use async_trait::async_trait;
use tracing::info;

use crate::error::StepError;
use crate::step::{Context, Severity, Step};

/// Longest response excerpt kept in the summary.
const EXCERPT_CHARS: usize = 80;

/// Downloads the configured model unless the runtime already lists it.
pub struct PullModel;

#[async_trait]
impl Step for PullModel {
    fn name(&self) -> &str {
        "model"
    }

    async fn already_satisfied(&self, ctx: &Context) -> Option<String> {
        let present = ctx
            .runtime()
            .has_model(&ctx.config.model)
            .await
            .unwrap_or(false);
        present.then(|| format!("{} already present", ctx.config.model))
    }

    async fn apply(&self, ctx: &Context) -> Result<String, StepError> {
        let model = &ctx.config.model;
        ctx.runtime().pull(model).await?;
        info!(model = %model, "Model downloaded");
        Ok(format!("downloaded {model}"))
    }
}

/// Sends one prompt to the model. Failures are advisory.
pub struct SmokeTest {
    name: String,
    prompt: String,
}

impl SmokeTest {
    /// Create a smoke test numbered `index` (1-based).
    #[must_use]
    pub fn new(index: usize, prompt: impl Into<String>) -> Self {
        Self {
            name: format!("smoke:{index}"),
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl Step for SmokeTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn severity(&self) -> Severity {
        Severity::Advisory
    }

    async fn already_satisfied(&self, _ctx: &Context) -> Option<String> {
        None
    }

    async fn apply(&self, ctx: &Context) -> Result<String, StepError> {
        let response = ctx
            .runtime()
            .run_prompt(&ctx.config.model, &self.prompt, ctx.config.smoke_timeout())
            .await?;
        if response.is_empty() {
            return Err(StepError::Failed("model returned an empty response".into()));
        }
        Ok(format!("response: {}", excerpt(&response)))
    }
}

/// Reports which models the server currently has loaded.
pub struct LoadedModels;

#[async_trait]
impl Step for LoadedModels {
    fn name(&self) -> &str {
        "loaded-models"
    }

    fn severity(&self) -> Severity {
        Severity::Advisory
    }

    async fn already_satisfied(&self, _ctx: &Context) -> Option<String> {
        None
    }

    async fn apply(&self, ctx: &Context) -> Result<String, StepError> {
        let loaded = ctx.runtime().ps().await?;
        if loaded.is_empty() {
            return Ok("no models loaded".into());
        }
        let names: Vec<&str> = loaded.iter().map(|m| m.name.as_str()).collect();
        Ok(format!("loaded: {}", names.join(", ")))
    }
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}...")
    }
}
