//! CLI command implementations.

mod ask;
mod config;
mod doctor;
mod model;
mod serve;
mod tools;
mod user;

pub use ask::run_ask;
pub use config::run_config;
pub use doctor::run_doctor;
pub use model::run_model;
pub use serve::{build_router, frame, run_serve, ApiError, AppState};
pub use tools::run_tools;
pub use user::run_user;

use crate::agent::{lms_registry, Agent, AgentConfig};
use crate::config::Settings;
use crate::inference::InferenceEngine;
use crate::store::LmsStore;
use std::sync::Arc;

/// Wire the LMS tool catalog and the engine into an agent.
pub fn build_agent(
    settings: &Settings,
    engine: Arc<dyn InferenceEngine>,
    store: Arc<dyn LmsStore>,
    model: Option<String>,
) -> crate::Result<Agent> {
    let registry = Arc::new(lms_registry(store)?);
    let mut config = AgentConfig::from_settings(settings);
    if let Some(model) = model {
        config = config.with_model(model);
    }
    Ok(Agent::new(engine, registry, config))
}
