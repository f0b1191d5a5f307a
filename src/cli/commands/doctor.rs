//! Doctor command - verify the engine, storage and configuration.

use crate::cli::Output;
use crate::config::Settings;
use crate::inference::{model_matches, OllamaClient};
use crate::store::{self, LmsStore, Role};
use console::style;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub async fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    Output::header("LMS Agent Doctor");
    println!();
    println!("Checking inference engine, storage and configuration...\n");

    let mut checks = Vec::new();

    println!("{}", style("Inference Engine").bold());
    let engine_checks = check_engine(settings).await;
    for check in &engine_checks {
        check.print();
    }
    checks.extend(engine_checks);

    println!();

    println!("{}", style("Storage").bold());
    let storage_checks = check_storage(settings).await;
    for check in &storage_checks {
        check.print();
    }
    checks.extend(storage_checks);

    println!();

    println!("{}", style("Configuration").bold());
    let config_checks = vec![check_config_file(), check_auth(settings)];
    for check in &config_checks {
        check.print();
    }
    checks.extend(config_checks);

    println!();

    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before serving the agent.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! The agent is ready to use.");
    }

    Ok(())
}

/// Check that Ollama answers and has the configured model.
async fn check_engine(settings: &Settings) -> Vec<CheckResult> {
    let host = &settings.ollama.host;
    let model = &settings.ollama.model;

    let client = match OllamaClient::from_settings(&settings.ollama) {
        Ok(client) => client,
        Err(e) => {
            return vec![CheckResult::error(
                "Ollama",
                &format!("cannot create client: {}", e),
                "Check [ollama] host in the config file",
            )]
        }
    };

    match client.list_models().await {
        Ok(models) => vec![
            CheckResult::ok("Ollama", &format!("reachable at {}", host)),
            model_check(&models, model),
        ],
        Err(_) => vec![CheckResult::error(
            "Ollama",
            &format!("not reachable at {}", host),
            "Install Ollama from https://ollama.com and start it with: ollama serve",
        )],
    }
}

fn model_check(models: &[String], model: &str) -> CheckResult {
    if model_matches(models, model) {
        CheckResult::ok("Model", model)
    } else {
        CheckResult::error(
            "Model",
            &format!("{} not installed", model),
            "Pull it with: lms-agent model pull",
        )
    }
}

/// Check data directory and database.
async fn check_storage(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok(
            "Data directory",
            &format!("{}", data_dir.display()),
        ));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    if settings.store.provider == "memory" {
        results.push(CheckResult::warning(
            "Database",
            "in-memory store",
            "Data is lost on restart; set [store] provider = \"sqlite\"",
        ));
        return results;
    }

    let db_path = settings.sqlite_path();
    let existed = db_path.exists();
    match store::open(settings) {
        Ok(store) => {
            let size = std::fs::metadata(&db_path)
                .map(|m| format_size(m.len()))
                .unwrap_or_else(|_| "unknown size".to_string());
            let created = if existed { "" } else { ", created" };
            let location = format!("{} ({}{})", db_path.display(), size, created);
            results.extend(database_checks(store.as_ref(), &location, settings.auth.enabled).await);
        }
        Err(e) => results.push(CheckResult::error(
            "Database",
            &format!("{}: {}", db_path.display(), e),
            "Check [store] sqlite_path and directory permissions",
        )),
    }

    results
}

/// Summarize the database contents and staff accounts.
async fn database_checks(
    store: &dyn LmsStore,
    location: &str,
    auth_enabled: bool,
) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match (store.count_users(None).await, store.count_courses().await) {
        (Ok(users), Ok(courses)) => results.push(CheckResult::ok(
            "Database",
            &format!("{}: {} users, {} courses", location, users, courses),
        )),
        (Err(e), _) | (_, Err(e)) => results.push(CheckResult::warning(
            "Database",
            &format!("{}: cannot read counts: {}", location, e),
            "The file may be from another version; back it up and let lms-agent recreate it",
        )),
    }

    let admins = store.count_users(Some(Role::Admin)).await;
    let professors = store.count_users(Some(Role::Professor)).await;
    match (admins, professors) {
        (Ok(a), Ok(p)) => {
            if a + p == 0 && auth_enabled {
                results.push(CheckResult::warning(
                    "Staff accounts",
                    "none",
                    "Create one with: lms-agent user add --name <name> --email <email> --role admin",
                ));
            }
        }
        (Err(e), _) | (_, Err(e)) => results.push(CheckResult::warning(
            "Staff accounts",
            &format!("cannot count: {}", e),
            "Staff tokens may not authenticate until the users table is readable",
        )),
    }

    results
}

/// Check if config file exists.
fn check_config_file() -> CheckResult {
    let config_path = Settings::default_config_path();
    if config_path.exists() {
        CheckResult::ok("Config file", &format!("{}", config_path.display()))
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: lms-agent config edit",
        )
    }
}

fn check_auth(settings: &Settings) -> CheckResult {
    if settings.auth.enabled {
        CheckResult::ok("Authentication", "bearer tokens required")
    } else {
        CheckResult::warning(
            "Authentication",
            "disabled",
            "Set [auth] enabled = true before exposing the server",
        )
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};

    #[test]
    fn test_check_result_ok() {
        let result = CheckResult::ok("test", "passed");
        assert_eq!(result.status, CheckStatus::Ok);
        assert!(result.hint.is_none());
    }

    #[test]
    fn test_check_result_error() {
        let result = CheckResult::error("test", "failed", "fix it");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.hint, Some("fix it".to_string()));
    }

    #[test]
    fn test_model_check() {
        let models = vec!["qwen2.5:7b".to_string(), "llama3:latest".to_string()];
        assert_eq!(model_check(&models, "qwen2.5:7b").status, CheckStatus::Ok);
        assert_eq!(model_check(&models, "llama3").status, CheckStatus::Ok);
        assert_eq!(model_check(&models, "mistral").status, CheckStatus::Error);
    }

    #[test]
    fn test_check_auth() {
        let mut settings = Settings::default();
        assert_eq!(check_auth(&settings).status, CheckStatus::Ok);
        settings.auth.enabled = false;
        assert_eq!(check_auth(&settings).status, CheckStatus::Warning);
    }

    #[tokio::test]
    async fn test_check_storage_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.general.data_dir = dir.path().to_string_lossy().to_string();
        settings.store.sqlite_path = dir.path().join("lms.db").to_string_lossy().to_string();

        let results = check_storage(&settings).await;
        assert_eq!(results[0].status, CheckStatus::Ok);
        assert_eq!(results[1].name, "Database");
        assert_eq!(results[1].status, CheckStatus::Ok);
        assert!(dir.path().join("lms.db").exists());
    }

    #[tokio::test]
    async fn test_database_checks_counts() {
        let store = MemoryStore::new();
        let results = database_checks(&store, "memory", true).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, CheckStatus::Ok);
        assert_eq!(results[0].message, "memory: 0 users, 0 courses");
        assert_eq!(results[1].name, "Staff accounts");
        assert_eq!(results[1].status, CheckStatus::Warning);

        let results = database_checks(&store, "memory", false).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_database_checks_reports_unreadable_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lms.db");
        let store = SqliteStore::new(&path).unwrap();

        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("DROP TABLE courses; DROP TABLE users;").unwrap();
        drop(conn);

        let results = database_checks(&store, "lms.db", true).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Database");
        assert_eq!(results[0].status, CheckStatus::Warning);
        assert!(results[0].message.contains("cannot read counts"));
        assert_eq!(results[1].name, "Staff accounts");
        assert_eq!(results[1].status, CheckStatus::Warning);
        assert!(results[1].message.starts_with("cannot count"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }
}
