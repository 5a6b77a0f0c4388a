use std::env;
use std::fs;
use std::path::Path;

use showroom_core::config::{detect_config_path, AppConfig, LoadOptions};
use toml::Value;

/// Renders the effective configuration with the source of every value. The
/// LLM API key is never printed.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let entries: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "SHOWROOM_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "SHOWROOM_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "SHOWROOM_DATABASE_TIMEOUT_SECS",
        ),
        ("llm.provider", format!("{:?}", config.llm.provider), "SHOWROOM_LLM_PROVIDER"),
        ("llm.model", config.llm.model.clone(), "SHOWROOM_LLM_MODEL"),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "SHOWROOM_LLM_BASE_URL",
        ),
        ("llm.api_key", api_key.to_string(), "SHOWROOM_LLM_API_KEY"),
        ("llm.temperature", config.llm.temperature.to_string(), "SHOWROOM_LLM_TEMPERATURE"),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), "SHOWROOM_LLM_TIMEOUT_SECS"),
        ("llm.max_retries", config.llm.max_retries.to_string(), "SHOWROOM_LLM_MAX_RETRIES"),
        (
            "conversation.extractor",
            format!("{:?}", config.conversation.extractor),
            "SHOWROOM_CONVERSATION_EXTRACTOR",
        ),
        (
            "conversation.history_window",
            config.conversation.history_window.to_string(),
            "SHOWROOM_CONVERSATION_HISTORY_WINDOW",
        ),
        (
            "conversation.nlu_timeout_secs",
            config.conversation.nlu_timeout_secs.to_string(),
            "SHOWROOM_CONVERSATION_NLU_TIMEOUT_SECS",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "SHOWROOM_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "SHOWROOM_SERVER_PORT"),
        (
            "server.allowed_origins",
            config.server.allowed_origins.join(","),
            "SHOWROOM_SERVER_ALLOWED_ORIGINS",
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "SHOWROOM_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("logging.level", config.logging.level.clone(), "SHOWROOM_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "SHOWROOM_LOGGING_FORMAT"),
        (
            "logging.directory",
            config
                .logging
                .directory
                .as_ref()
                .map(|directory| directory.display().to_string())
                .unwrap_or_else(|| "<stdout only>".to_string()),
            "SHOWROOM_LOGGING_DIRECTORY",
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in entries {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {key} = {value} (source: {source})"));
    }
    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var(env_key).map(|value| !value.trim().is_empty()).unwrap_or(false) {
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

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn dotted_paths_resolve_through_tables() {
        let doc: toml::Value =
            "[conversation]\nhistory_window = 4\n".parse().expect("toml document");

        assert!(contains_path(&doc, "conversation.history_window"));
        assert!(!contains_path(&doc, "conversation.extractor"));
        assert!(!contains_path(&doc, "llm.model"));
    }
}
