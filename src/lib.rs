//! LMS Agent - natural-language actions for a learning-management system
//!
//! A local-first assistant that lets admins and professors manage courses,
//! sections, users and calendar events by asking in plain language. A local
//! Ollama model decides which tool to call; the tool runs once against the
//! LMS store and the model phrases the result, streamed back fragment by
//! fragment.
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `store` - LMS domain store (SQLite or in-memory)
//! - `inference` - Inference engine interface and the Ollama client
//! - `agent` - Tool registry, schema bridge and the two-round agent loop
//! - `auth` - Bearer-token authentication for the HTTP API
//! - `cli` - Command-line interface and the HTTP server
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use lms_agent::agent::{lms_registry, Agent, AgentConfig, ConversationMessage};
//! use lms_agent::config::{Prompts, Settings};
//! use lms_agent::inference::OllamaClient;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let store = lms_agent::store::open(&settings)?;
//!     let engine = Arc::new(OllamaClient::from_settings(&settings.ollama)?);
//!     let registry = Arc::new(lms_registry(store)?);
//!     let agent = Agent::new(engine, registry, AgentConfig::from_settings(&settings));
//!
//!     let system = Prompts::default().agent_system(&agent.registry().names());
//!     let mut fragments = agent.run(&system, vec![ConversationMessage::user("How many courses?")]);
//!     while let Some(fragment) = fragments.next().await {
//!         print!("{}", fragment);
//!     }
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod store;

pub use error::{LmsError, Result};
