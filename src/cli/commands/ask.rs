//! Ask command implementation.

use super::build_agent;
use crate::agent::ConversationMessage;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::{Prompts, Settings};
use crate::inference::{InferenceEngine, OllamaClient};
use crate::store;
use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;

/// Run one agent turn and print fragments as they arrive.
pub async fn run_ask(message: &str, model: Option<String>, settings: Settings) -> Result<()> {
    let engine: Arc<dyn InferenceEngine> = Arc::new(OllamaClient::from_settings(&settings.ollama)?);

    let mut checked = settings.clone();
    if let Some(model) = &model {
        checked.ollama.model = model.clone();
    }
    if let Err(e) = preflight::check(Operation::Ask, &checked, engine.as_ref()).await {
        Output::error(&format!("{}", e));
        Output::info("Run 'lms-agent doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let store = store::open(&settings)?;
    let agent = build_agent(&settings, engine, store, model)?;
    let prompts = Prompts::load(
        settings.prompts.custom_dir.as_deref(),
        Some(&settings.prompts.variables),
    )?;
    let system_prompt = prompts.agent_system(&agent.registry().names());

    let spinner = Output::spinner("Thinking...");
    let mut fragments = agent.run(&system_prompt, vec![ConversationMessage::user(message)]);

    let mut first = true;
    while let Some(fragment) = fragments.next().await {
        if first {
            spinner.finish_and_clear();
            println!();
            first = false;
        }
        Output::fragment(&fragment);
    }
    if first {
        spinner.finish_and_clear();
    }
    println!("\n");

    Ok(())
}
