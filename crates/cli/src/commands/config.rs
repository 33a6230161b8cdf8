use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use outlay_core::config::{AppConfig, LoadOptions};
use serde_json::json;
use toml::Value;

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let fields = [
        (
            "database.url",
            config.database.url.clone(),
            source("database.url", &["OUTLAY_DATABASE_URL"]),
        ),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            source("database.max_connections", &["OUTLAY_DATABASE_MAX_CONNECTIONS"]),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            source("database.timeout_secs", &["OUTLAY_DATABASE_TIMEOUT_SECS"]),
        ),
        (
            "approvals.approver_augmentation",
            config.approvals.approver_augmentation.as_str().to_string(),
            source(
                "approvals.approver_augmentation",
                &["OUTLAY_APPROVALS_APPROVER_AUGMENTATION"],
            ),
        ),
        (
            "approvals.escalation_sweep_interval_secs",
            config.approvals.escalation_sweep_interval_secs.to_string(),
            source(
                "approvals.escalation_sweep_interval_secs",
                &["OUTLAY_APPROVALS_ESCALATION_SWEEP_INTERVAL_SECS"],
            ),
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            source("logging.level", &["OUTLAY_LOGGING_LEVEL", "OUTLAY_LOG_LEVEL"]),
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            source("logging.format", &["OUTLAY_LOGGING_FORMAT", "OUTLAY_LOG_FORMAT"]),
        ),
    ];

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|(key, value, source)| render_line(key, value, source)));

    let sources: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(key, _, source)| (key.to_string(), json!(source)))
        .collect();
    let details = json!({
        "effective": serde_json::to_value(&config).unwrap_or_default(),
        "sources": sources,
    });

    CommandResult::success_with_details("config", lines.join("\n"), Some(details))
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("outlay.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/outlay.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: &str) -> String {
    format!("- {key} = {value} (source: {source})")
}
