mod audit;
mod bootstrap;
mod health;
mod routes;

use std::time::Duration;

use anyhow::{Context, Result};
use showroom_core::config::{AppConfig, LoadOptions};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

/// Installs the global subscriber. When a log directory is configured, events
/// go to stdout and to `showroom.log` in that directory; the returned guard
/// flushes the file writer on drop.
fn init_logging(config: &AppConfig) -> Result<Option<WorkerGuard>> {
    use showroom_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    let (writer, guard) = match &config.logging.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory).with_context(|| {
                format!("could not create log directory `{}`", directory.display())
            })?;
            let appender = tracing_appender::rolling::never(directory, "showroom.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(std::io::stdout.and(file_writer)), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_ansi(guard.is_none())
        .with_writer(writer);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    let _log_guard = init_logging(&config)?;

    let app = bootstrap::bootstrap_with_config(config).await?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("could not bind `{address}`"))?;
    let router = routes::app_router(
        app.controller.clone(),
        app.db_pool.clone(),
        &app.config.server.allowed_origins,
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        extractor = app.controller.extractor_name(),
        "showroom-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "showroom-server stopped accepting requests; draining turns"
    );
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    app.controller.shutdown(grace).await;
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for ctrl-c; shutting down"
        );
    }
}
