//! Configuration module for the LMS agent.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{AgentPrompts, Prompts};
pub use settings::{
    AgentSettings, AuthSettings, DirectEmit, GeneralSettings, OllamaSettings, PromptSettings,
    SamplingSettings, ServerSettings, Settings, StoreSettings,
};
