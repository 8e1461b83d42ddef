use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use karigar_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "KARIGAR_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "KARIGAR_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "KARIGAR_DATABASE_TIMEOUT_SECS",
        ),
        (
            "telegram.bot_token",
            redact_token(config.telegram.bot_token.expose_secret()),
            "KARIGAR_TELEGRAM_BOT_TOKEN",
        ),
        (
            "telegram.bot_username",
            config.telegram.bot_username.clone(),
            "KARIGAR_TELEGRAM_BOT_USERNAME",
        ),
        (
            "telegram.poll_timeout_secs",
            config.telegram.poll_timeout_secs.to_string(),
            "KARIGAR_TELEGRAM_POLL_TIMEOUT_SECS",
        ),
        (
            "storage.media_base_url",
            config.storage.media_base_url.clone(),
            "KARIGAR_STORAGE_MEDIA_BASE_URL",
        ),
        (
            "storage.documents_base_url",
            config.storage.documents_base_url.clone(),
            "KARIGAR_STORAGE_DOCUMENTS_BASE_URL",
        ),
        (
            "storage.api_key",
            if config.storage.api_key.is_some() { "<redacted>" } else { "<unset>" }.to_string(),
            "KARIGAR_STORAGE_API_KEY",
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            "KARIGAR_SERVER_BIND_ADDRESS",
        ),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            "KARIGAR_SERVER_HEALTH_CHECK_PORT",
        ),
        ("flows.ttl_hours", config.flows.ttl_hours.to_string(), "KARIGAR_FLOWS_TTL_HOURS"),
        (
            "flows.persist_state",
            config.flows.persist_state.to_string(),
            "KARIGAR_FLOWS_PERSIST_STATE",
        ),
        (
            "missions.utc_offset_minutes",
            config.missions.utc_offset_minutes.to_string(),
            "KARIGAR_MISSIONS_UTC_OFFSET_MINUTES",
        ),
        ("logging.level", config.logging.level.clone(), "KARIGAR_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "KARIGAR_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in fields {
        let source = field_source(
            key,
            Some(env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("karigar.toml"), PathBuf::from("config/karigar.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the numeric bot id and hides the secret half of `id:secret`.
pub fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((bot_id, _)) = trimmed.split_once(':') {
        return format!("{bot_id}:***");
    }

    "<redacted>".to_string()
}
