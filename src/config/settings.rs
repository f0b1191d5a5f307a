//! Configuration settings for the LMS agent.

use crate::error::{LmsError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub ollama: OllamaSettings,
    pub agent: AgentSettings,
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub auth: AuthSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.lms-agent".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Sampling parameters for one round of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingSettings {
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub num_predict: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// Local inference engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    /// Base URL of the Ollama server.
    pub host: String,
    /// Model used for both rounds.
    pub model: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling for the tool decision round.
    pub decide: SamplingSettings,
    /// Sampling for the streamed follow-up round.
    pub follow_up: SamplingSettings,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            timeout_secs: 300,
            decide: SamplingSettings {
                temperature: 0.7,
                num_predict: 2048,
                top_k: Some(40),
                top_p: Some(0.9),
            },
            follow_up: SamplingSettings {
                temperature: 0.7,
                num_predict: 512,
                top_k: None,
                top_p: None,
            },
        }
    }
}

/// How an answer that needed no tool is delivered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirectEmit {
    /// One fragment per character, paced by `char_delay_ms`.
    #[default]
    PerChar,
    /// The whole answer as a single fragment.
    Whole,
}

impl std::str::FromStr for DirectEmit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per_char" | "per-char" | "char" => Ok(DirectEmit::PerChar),
            "whole" => Ok(DirectEmit::Whole),
            _ => Err(format!("Unknown direct emit mode: {}", s)),
        }
    }
}

impl std::fmt::Display for DirectEmit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectEmit::PerChar => write!(f, "per_char"),
            DirectEmit::Whole => write!(f, "whole"),
        }
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub direct_emit: DirectEmit,
    /// Delay between characters when emitting per character.
    pub char_delay_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            direct_emit: DirectEmit::PerChar,
            char_delay_ms: 10,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            cors_origins: Vec::new(),
        }
    }
}

/// Domain store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Store provider (sqlite, memory).
    pub provider: String,
    /// Path to SQLite database (for sqlite provider).
    pub sqlite_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            sqlite_path: "~/.lms-agent/lms.db".to_string(),
        }
    }
}

/// API authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Require a staff bearer token on the agent routes.
    pub enabled: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    ///
    /// `OLLAMA_HOST` and `OLLAMA_MODEL` override the file.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let mut settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Settings>(&content)?
        } else {
            Settings::default()
        };

        settings.apply_overrides(
            std::env::var("OLLAMA_HOST").ok(),
            std::env::var("OLLAMA_MODEL").ok(),
        );
        settings.validate()?;
        Ok(settings)
    }

    fn apply_overrides(&mut self, host: Option<String>, model: Option<String>) {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.ollama.host = host;
        }
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.ollama.model = model;
        }
    }

    /// Check values that would otherwise fail late.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.ollama.host).map_err(|e| {
            LmsError::Config(format!("Invalid ollama.host {:?}: {}", self.ollama.host, e))
        })?;
        if self.ollama.model.trim().is_empty() {
            return Err(LmsError::Config("ollama.model must not be empty".to_string()));
        }
        Ok(())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LmsError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lms-agent")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.store.sqlite_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.ollama.host, "http://localhost:11434");
        assert_eq!(settings.ollama.model, "qwen2.5:7b");
        assert_eq!(settings.ollama.decide.num_predict, 2048);
        assert_eq!(settings.ollama.follow_up.num_predict, 512);
        assert_eq!(settings.agent.direct_emit, DirectEmit::PerChar);
        assert_eq!(settings.server.port, 5000);
        assert!(settings.auth.enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [ollama]
            model = "llama3.1:8b"

            [agent]
            direct_emit = "whole"
            "#,
        )
        .unwrap();

        assert_eq!(settings.ollama.model, "llama3.1:8b");
        assert_eq!(settings.ollama.host, "http://localhost:11434");
        assert_eq!(settings.ollama.decide.top_k, Some(40));
        assert_eq!(settings.agent.direct_emit, DirectEmit::Whole);
        assert_eq!(settings.agent.char_delay_ms, 10);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings.apply_overrides(Some("http://gpu-box:11434".to_string()), Some("  ".to_string()));
        assert_eq!(settings.ollama.host, "http://gpu-box:11434");
        assert_eq!(settings.ollama.model, "qwen2.5:7b");
    }

    #[test]
    fn test_invalid_host_rejected() {
        let mut settings = Settings::default();
        settings.ollama.host = "not a url".to_string();
        assert!(matches!(settings.validate(), Err(LmsError::Config(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.server.port = 8088;
        settings.store.provider = "memory".to_string();
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.server.port, 8088);
        assert_eq!(loaded.store.provider, "memory");
    }

    #[test]
    fn test_expand_path() {
        let path = Settings::expand_path("/tmp/lms.db");
        assert_eq!(path, PathBuf::from("/tmp/lms.db"));
    }
}
