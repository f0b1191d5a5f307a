//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;

/// Run the config command against the file at `config_path`.
pub fn run_config(action: &ConfigAction, settings: Settings, config_path: PathBuf) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&settings)
                .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Set { key, value } => {
            let updated = set_value(&settings, key, value)?;
            updated.save_to(&config_path)?;
            Output::success(&format!("Set {} = {}", key, value));
        }

        ConfigAction::Edit => {
            // Create default config if it doesn't exist
            if !config_path.exists() {
                settings.save_to(&config_path)?;
                Output::info(&format!("Created default config at {:?}", config_path));
            }

            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());

            Output::info(&format!("Opening config in {}...", editor));

            let status = std::process::Command::new(&editor)
                .arg(&config_path)
                .status();

            match status {
                Ok(s) if s.success() => match Settings::load_from(Some(&config_path)) {
                    Ok(_) => Output::success("Config saved."),
                    Err(e) => Output::warning(&format!("Config saved but is invalid: {}", e)),
                },
                Ok(_) => {
                    Output::warning("Editor exited with non-zero status.");
                }
                Err(e) => {
                    Output::error(&format!("Failed to open editor: {}", e));
                    Output::info(&format!("Config file is at: {:?}", config_path));
                }
            }
        }

        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}

/// Apply `section.key = value` and re-validate the result.
///
/// The value keeps the type of the existing entry, so `server.port = 8080`
/// stays an integer and `auth.enabled = false` stays a boolean.
fn set_value(settings: &Settings, key: &str, value: &str) -> Result<Settings> {
    let mut doc = toml::Value::try_from(settings)?;

    let mut parts: Vec<&str> = key.split('.').collect();
    let leaf = parts
        .pop()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("Empty config key"))?;

    let mut table = doc
        .as_table_mut()
        .ok_or_else(|| anyhow!("Config is not a table"))?;
    for part in parts {
        table = table
            .get_mut(part)
            .and_then(|v| v.as_table_mut())
            .ok_or_else(|| anyhow!("Unknown config section: {}", part))?;
    }

    let current = table
        .get(leaf)
        .ok_or_else(|| anyhow!("Unknown config key: {}", key))?;
    let parsed = match current {
        toml::Value::Integer(_) => toml::Value::Integer(value.parse()?),
        toml::Value::Float(_) => toml::Value::Float(value.parse()?),
        toml::Value::Boolean(_) => toml::Value::Boolean(value.parse()?),
        toml::Value::String(_) => toml::Value::String(value.to_string()),
        toml::Value::Array(_) => toml::Value::Array(
            value
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| toml::Value::String(v.to_string()))
                .collect(),
        ),
        _ => bail!("{} cannot be set from the command line", key),
    };
    table.insert(leaf.to_string(), parsed);

    let updated: Settings = doc.try_into()?;
    updated.validate()?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectEmit;

    #[test]
    fn test_set_value_keeps_types() {
        let settings = Settings::default();

        let updated = set_value(&settings, "server.port", "8080").unwrap();
        assert_eq!(updated.server.port, 8080);

        let updated = set_value(&updated, "auth.enabled", "false").unwrap();
        assert!(!updated.auth.enabled);

        let updated = set_value(&updated, "agent.direct_emit", "whole").unwrap();
        assert_eq!(updated.agent.direct_emit, DirectEmit::Whole);

        let updated = set_value(&updated, "ollama.decide.temperature", "0.2").unwrap();
        assert!((updated.ollama.decide.temperature - 0.2).abs() < 1e-6);

        let updated =
            set_value(&updated, "server.cors_origins", "http://a.test, http://b.test").unwrap();
        assert_eq!(updated.server.cors_origins.len(), 2);
    }

    #[test]
    fn test_set_value_rejects_bad_input() {
        let settings = Settings::default();
        assert!(set_value(&settings, "server.nope", "1").is_err());
        assert!(set_value(&settings, "nope.port", "1").is_err());
        assert!(set_value(&settings, "server.port", "abc").is_err());
        assert!(set_value(&settings, "ollama.host", "not a url").is_err());
        assert!(set_value(&settings, "agent.direct_emit", "sometimes").is_err());
    }

    #[test]
    fn test_set_value_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        run_config(
            &ConfigAction::Set {
                key: "ollama.model".to_string(),
                value: "llama3.1:8b".to_string(),
            },
            Settings::default(),
            path.clone(),
        )
        .unwrap();

        let loaded: Settings = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.ollama.model, "llama3.1:8b");
    }
}
