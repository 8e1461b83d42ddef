mod bootstrap;
mod health;
mod storage;
mod sweeper;
mod telegram;

use std::time::Duration;

use anyhow::Result;
use karigar_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use karigar_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging must be up before bootstrap so its events are captured.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState::new(app.db_pool.clone(), app.flows.clone()),
    )
    .await?;
    let sweeper = app.sweeper.spawn(Duration::from_secs(app.config.flows.sweep_interval_secs));

    let runner = app.runner;
    let mut polling = tokio::spawn(async move { runner.start().await });
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bot_username = %app.config.telegram.bot_username,
        "karigar-server started"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!(
                event_name = "system.server.stopping",
                correlation_id = "shutdown",
                "karigar-server stopping"
            );
            app.updates.stop();
            let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
            if tokio::time::timeout(grace, &mut polling).await.is_err() {
                tracing::warn!(
                    event_name = "system.server.shutdown_timeout",
                    correlation_id = "shutdown",
                    "update loop did not drain before the grace period ended"
                );
                polling.abort();
            }
        }
        finished = &mut polling => {
            finished??;
            tracing::warn!(
                event_name = "system.server.polling_ended",
                correlation_id = "shutdown",
                "update loop ended"
            );
        }
    }

    sweeper.abort();
    app.db_pool.close().await;
    Ok(())
}
