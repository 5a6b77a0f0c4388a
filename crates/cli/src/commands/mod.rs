pub mod config;
pub mod doctor;
pub mod journey;
pub mod migrate;
pub mod purge_sessions;

use serde_json::{json, Value};
use showroom_core::config::{AppConfig, LoadOptions};
use showroom_db::{connect_with_settings, migrations, DbPool};
use tokio::runtime::Runtime;

/// Exit code plus the single JSON line printed for the operator.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let mut payload = json!({
            "command": command,
            "status": "ok",
            "error_class": null,
            "message": message.into(),
        });
        if let Some(data) = data {
            payload["data"] = data;
        }
        Self { exit_code: 0, output: payload.to_string() }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = json!({
            "command": command,
            "status": "error",
            "error_class": error_class,
            "message": message.into(),
        });
        Self { exit_code, output: payload.to_string() }
    }
}

/// A failed step, classified for scripting. Exit codes: 2 config or input,
/// 3 runtime, 4 database connectivity, 5 migration, 6 missing confirmation,
/// 7 store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl CommandFailure {
    pub fn new(class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { class, message: message.into(), exit_code }
    }

    pub fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.class, self.message, self.exit_code)
    }
}

/// Loads config and builds a single-threaded runtime for the command.
pub(crate) fn prepare() -> Result<(AppConfig, Runtime), CommandFailure> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandFailure::new("config_validation", format!("configuration issue: {error}"), 2)
    })?;
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(
        |error| CommandFailure::new("runtime_init", format!("async runtime: {error}"), 3),
    )?;
    Ok((config, runtime))
}

/// Connects and brings the schema up to date.
pub(crate) async fn open_store(config: &AppConfig) -> Result<DbPool, CommandFailure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| CommandFailure::new("db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| CommandFailure::new("migration", error.to_string(), 5))?;
    Ok(pool)
}
