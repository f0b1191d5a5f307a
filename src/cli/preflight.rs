//! Pre-flight checks before expensive operations.
//!
//! Validates that the inference engine and local storage are usable
//! before starting operations that would otherwise fail midway.

use crate::config::Settings;
use crate::error::{LmsError, Result};
use crate::inference::InferenceEngine;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Serving needs writable storage; the engine is probed per request.
    Serve,
    /// A one-shot agent turn needs storage and the configured model.
    Ask,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub async fn check(
    operation: Operation,
    settings: &Settings,
    engine: &dyn InferenceEngine,
) -> Result<()> {
    match operation {
        Operation::Serve => {
            check_storage(settings)?;
        }
        Operation::Ask => {
            check_storage(settings)?;
            check_model(settings, engine).await?;
        }
    }
    Ok(())
}

/// Check that the SQLite database directory can be created.
fn check_storage(settings: &Settings) -> Result<()> {
    if settings.store.provider != "sqlite" {
        return Ok(());
    }
    let path = settings.sqlite_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            LmsError::Config(format!("Cannot create database directory {:?}: {}", parent, e))
        })?;
    }
    Ok(())
}

/// Check that the engine is up and has the configured model.
async fn check_model(settings: &Settings, engine: &dyn InferenceEngine) -> Result<()> {
    let model = &settings.ollama.model;
    if engine.is_model_available(model).await {
        Ok(())
    } else {
        Err(LmsError::EngineUnavailable(format!(
            "Model {} is not available at {}. Start Ollama with `ollama serve` and run `lms-agent model pull`",
            model, settings.ollama.host
        )))
    }
}
