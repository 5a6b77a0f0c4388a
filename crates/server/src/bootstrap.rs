use std::sync::Arc;

use showroom_agent::{
    HttpLlmClient, KeywordSlotExtractor, LlmError, LlmSlotExtractor, SlotExtractor,
    TurnController, TurnSettings,
};
use showroom_core::config::{AppConfig, ExtractorKind};
use showroom_db::{
    connect_with_settings, migrations, DbPool, SqlPreferenceRepository,
    SqlWorkingMemoryRepository,
};
use thiserror::Error;
use tracing::info;

use crate::audit::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub controller: Arc<TurnController>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("language model client could not be built: {0}")]
    LlmClient(#[source] LlmError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let extractor = build_extractor(&config).map_err(BootstrapError::LlmClient)?;
    let controller = TurnController::with_audit_sink(
        extractor,
        Arc::new(SqlWorkingMemoryRepository::new(db_pool.clone())),
        Arc::new(SqlPreferenceRepository::new(db_pool.clone())),
        TurnSettings::from(&config.conversation),
        Arc::new(TracingAuditSink),
    );
    info!(
        event_name = "system.bootstrap.controller_ready",
        correlation_id = "bootstrap",
        extractor = controller.extractor_name(),
        history_window = config.conversation.history_window,
        "turn controller ready"
    );

    Ok(Application { config, db_pool, controller: Arc::new(controller) })
}

pub fn build_extractor(config: &AppConfig) -> Result<Arc<dyn SlotExtractor>, LlmError> {
    match config.conversation.extractor {
        ExtractorKind::Keyword => Ok(Arc::new(KeywordSlotExtractor::new())),
        ExtractorKind::Llm => {
            let client = HttpLlmClient::from_config(&config.llm)?;
            info!(
                event_name = "system.bootstrap.llm_configured",
                correlation_id = "bootstrap",
                provider = ?config.llm.provider,
                model = %config.llm.model,
                "language model extractor configured"
            );
            Ok(Arc::new(LlmSlotExtractor::new(Arc::new(client))))
        }
    }
}
