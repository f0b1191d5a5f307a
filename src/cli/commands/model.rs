//! Model management command.

use crate::cli::{ModelAction, Output};
use crate::config::Settings;
use crate::error::Result;
use crate::inference::{InferenceEngine, OllamaClient};
use anyhow::Context;

/// Run the model command.
pub async fn run_model(action: &ModelAction, settings: Settings) -> anyhow::Result<()> {
    match action {
        ModelAction::Pull { model } => {
            let model = model
                .clone()
                .unwrap_or_else(|| settings.ollama.model.clone());
            let client = OllamaClient::from_settings(&settings.ollama)?;

            let spinner = Output::spinner(&format!("Pulling {} (this may take a while)...", model));
            let pulled = pull_if_missing(&client, &model).await;
            spinner.finish_and_clear();

            if pulled.with_context(|| format!("Failed to pull {}", model))? {
                Output::success(&format!("Pulled {}", model));
            } else {
                Output::info(&format!("{} is already available", model));
            }
        }
    }

    Ok(())
}

/// Pull `model` unless the engine already has it. Returns whether a pull happened.
pub async fn pull_if_missing(engine: &dyn InferenceEngine, model: &str) -> Result<bool> {
    if engine.is_model_available(model).await {
        return Ok(false);
    }
    engine.pull_model(model).await?;
    Ok(true)
}
