//! Error types for the LMS agent.

use thiserror::Error;

use crate::agent::ValidationError;

/// Library-level error type for LMS agent operations.
#[derive(Error, Debug)]
pub enum LmsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Inference engine error: {0}")]
    Inference(String),

    #[error("Inference engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Tool failed: {0}")]
    Tool(String),

    #[error("Not authorized: {0}")]
    Auth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type alias for LMS agent operations.
pub type Result<T> = std::result::Result<T, LmsError>;
