use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use teloxide::Bot;
use thiserror::Error;
use tracing::info;

use karigar_bot::{BotSettings, Dispatcher, LinkingSessions, PollingRunner, ReconnectPolicy};
use karigar_core::audit::TracingAuditSink;
use karigar_core::config::{AppConfig, ConfigError, LoadOptions};
use karigar_core::flows::{Collaborators, FlowStateStore, InMemoryFlowStateStore, StepEngine};
use karigar_core::missions::MissionTracker;
use karigar_db::{connect_with_settings, migrations, DbPool, SqlFlowStateStore, SqlMissionStore, SqlRecordStore};

use crate::storage::HttpDocumentRenderer;
use crate::sweeper::StaleFlowSweeper;
use crate::telegram::{TelegramMediaUploader, TelegramMessenger, TelegramUpdateSource};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub flows: Arc<dyn FlowStateStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub updates: Arc<TelegramUpdateSource>,
    pub runner: PollingRunner,
    pub sweeper: StaleFlowSweeper,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client could not be built: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
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

    let flows: Arc<dyn FlowStateStore> = if config.flows.persist_state {
        Arc::new(SqlFlowStateStore::new(db_pool.clone()))
    } else {
        Arc::new(InMemoryFlowStateStore::default())
    };
    info!(
        event_name = "system.bootstrap.flow_store",
        correlation_id = "bootstrap",
        persistent = config.flows.persist_state,
        "flow state store selected"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.storage.timeout_secs))
        .build()
        .map_err(BootstrapError::HttpClient)?;
    let bot = Bot::new(config.telegram.bot_token.expose_secret());

    let records = Arc::new(SqlRecordStore::new(db_pool.clone()));
    let missions = Arc::new(MissionTracker::new(
        Arc::new(SqlMissionStore::new(db_pool.clone())),
        records.clone(),
        config.missions.clone(),
    ));
    let collaborators = Collaborators {
        flows: flows.clone(),
        records,
        media: Arc::new(TelegramMediaUploader::new(
            bot.clone(),
            config.telegram.bot_token.clone(),
            http.clone(),
            config.storage.media_base_url.clone(),
            config.storage.api_key.clone(),
        )),
        documents: Arc::new(HttpDocumentRenderer::new(
            http,
            config.storage.documents_base_url.clone(),
            config.storage.api_key.clone(),
        )),
        messenger: Arc::new(TelegramMessenger::new(bot.clone())),
        missions,
        audit: Arc::new(TracingAuditSink),
    };

    let engine = Arc::new(StepEngine::new(collaborators, config.rewards.clone()));
    let sessions = Arc::new(LinkingSessions::new(chrono::Duration::hours(i64::from(
        config.flows.ttl_hours,
    ))));
    let dispatcher = Arc::new(Dispatcher::new(
        engine,
        sessions.clone(),
        BotSettings { bot_username: config.telegram.bot_username.clone() },
    ));

    let updates = Arc::new(TelegramUpdateSource::new(bot, config.telegram.poll_timeout_secs));
    let runner = PollingRunner::new(updates.clone(), dispatcher.clone(), ReconnectPolicy::default());
    let sweeper = StaleFlowSweeper::new(flows.clone(), sessions, config.flows.ttl_hours);

    Ok(Application { config, db_pool, flows, dispatcher, updates, runner, sweeper })
}

#[cfg(test)]
mod tests {
    use karigar_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str, persist: bool) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                telegram_bot_token: Some("123456789:AAE-bootstrap-test-token-0001".to_string()),
                persist_flow_state: Some(persist),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_a_bot_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                telegram_bot_token: Some("not-a-token".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("telegram.bot_token"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_flow_store() {
        let app = bootstrap(overrides("sqlite::memory:", true)).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('accounts', 'sellers', 'seller_products', \
             'mission_completions', 'flow_instances')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables");
        assert_eq!(table_count, 5);

        assert_eq!(app.flows.count().await.expect("count"), 0);
        assert!(app.dispatcher.linking_sessions().state(karigar_core::ChatId(1)).await.is_none());
    }
}
