use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Offset, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::mission::MissionType;
use crate::flows::states::FlowKind;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub flows: FlowsConfig,
    pub rewards: RewardsConfig,
    pub missions: MissionsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub bot_username: String,
    pub poll_timeout_secs: u32,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub media_base_url: String,
    pub documents_base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct FlowsConfig {
    pub ttl_hours: u32,
    pub sweep_interval_secs: u64,
    pub persist_state: bool,
}

/// Fixed credit bonus per completed flow. The weekly product flow is paid
/// through its mission instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewardsConfig {
    pub seller_registration: i64,
    pub verification: i64,
    pub store_creation: i64,
    pub story_creation: i64,
    pub buyer_registration: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissionsConfig {
    pub product_reward: i64,
    pub invite_reward: i64,
    pub whatsapp_reward: i64,
    pub utc_offset_minutes: i32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub media_base_url: Option<String>,
    pub documents_base_url: Option<String>,
    pub persist_flow_state: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://karigar.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            telegram: TelegramConfig {
                bot_token: String::new().into(),
                bot_username: "karigar_bot".to_string(),
                poll_timeout_secs: 30,
            },
            storage: StorageConfig {
                media_base_url: "http://localhost:9000/karigar-media".to_string(),
                documents_base_url: "http://localhost:8090".to_string(),
                api_key: None,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            flows: FlowsConfig { ttl_hours: 24, sweep_interval_secs: 600, persist_state: false },
            rewards: RewardsConfig::default(),
            missions: MissionsConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            seller_registration: 50,
            verification: 25,
            store_creation: 25,
            story_creation: 10,
            buyer_registration: 10,
        }
    }
}

impl RewardsConfig {
    /// Zero for flows without a fixed bonus.
    pub fn bonus_for(&self, kind: FlowKind) -> i64 {
        match kind {
            FlowKind::SellerRegistration => self.seller_registration,
            FlowKind::Verification => self.verification,
            FlowKind::StoreCreation => self.store_creation,
            FlowKind::StoryCreation => self.story_creation,
            FlowKind::BuyerRegistration => self.buyer_registration,
            FlowKind::WeeklyProductAdd | FlowKind::ProductBrowsing => 0,
        }
    }
}

impl Default for MissionsConfig {
    fn default() -> Self {
        Self { product_reward: 20, invite_reward: 10, whatsapp_reward: 10, utc_offset_minutes: 330 }
    }
}

impl MissionsConfig {
    pub fn reward_for(&self, mission: MissionType) -> i64 {
        match mission {
            MissionType::Product => self.product_reward,
            MissionType::Invite => self.invite_reward,
            MissionType::Whatsapp => self.whatsapp_reward,
        }
    }

    /// Validation keeps the offset in range; out-of-range values fall back to UTC.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("karigar.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(telegram) = patch.telegram {
            if let Some(bot_token) = telegram.bot_token {
                self.telegram.bot_token = secret_value(bot_token);
            }
            if let Some(bot_username) = telegram.bot_username {
                self.telegram.bot_username = bot_username;
            }
            if let Some(poll_timeout_secs) = telegram.poll_timeout_secs {
                self.telegram.poll_timeout_secs = poll_timeout_secs;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(media_base_url) = storage.media_base_url {
                self.storage.media_base_url = media_base_url;
            }
            if let Some(documents_base_url) = storage.documents_base_url {
                self.storage.documents_base_url = documents_base_url;
            }
            if let Some(api_key) = storage.api_key {
                self.storage.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = storage.timeout_secs {
                self.storage.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(flows) = patch.flows {
            if let Some(ttl_hours) = flows.ttl_hours {
                self.flows.ttl_hours = ttl_hours;
            }
            if let Some(sweep_interval_secs) = flows.sweep_interval_secs {
                self.flows.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(persist_state) = flows.persist_state {
                self.flows.persist_state = persist_state;
            }
        }

        if let Some(rewards) = patch.rewards {
            if let Some(value) = rewards.seller_registration {
                self.rewards.seller_registration = value;
            }
            if let Some(value) = rewards.verification {
                self.rewards.verification = value;
            }
            if let Some(value) = rewards.store_creation {
                self.rewards.store_creation = value;
            }
            if let Some(value) = rewards.story_creation {
                self.rewards.story_creation = value;
            }
            if let Some(value) = rewards.buyer_registration {
                self.rewards.buyer_registration = value;
            }
        }

        if let Some(missions) = patch.missions {
            if let Some(value) = missions.product_reward {
                self.missions.product_reward = value;
            }
            if let Some(value) = missions.invite_reward {
                self.missions.invite_reward = value;
            }
            if let Some(value) = missions.whatsapp_reward {
                self.missions.whatsapp_reward = value;
            }
            if let Some(value) = missions.utc_offset_minutes {
                self.missions.utc_offset_minutes = value;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("KARIGAR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("KARIGAR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_num("KARIGAR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("KARIGAR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_num("KARIGAR_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("KARIGAR_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("KARIGAR_TELEGRAM_BOT_USERNAME") {
            self.telegram.bot_username = value;
        }
        if let Some(value) = read_env("KARIGAR_TELEGRAM_POLL_TIMEOUT_SECS") {
            self.telegram.poll_timeout_secs =
                parse_num("KARIGAR_TELEGRAM_POLL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("KARIGAR_STORAGE_MEDIA_BASE_URL") {
            self.storage.media_base_url = value;
        }
        if let Some(value) = read_env("KARIGAR_STORAGE_DOCUMENTS_BASE_URL") {
            self.storage.documents_base_url = value;
        }
        if let Some(value) = read_env("KARIGAR_STORAGE_API_KEY") {
            self.storage.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("KARIGAR_STORAGE_TIMEOUT_SECS") {
            self.storage.timeout_secs = parse_num("KARIGAR_STORAGE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("KARIGAR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("KARIGAR_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_num("KARIGAR_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("KARIGAR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_num("KARIGAR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("KARIGAR_FLOWS_TTL_HOURS") {
            self.flows.ttl_hours = parse_num("KARIGAR_FLOWS_TTL_HOURS", &value)?;
        }
        if let Some(value) = read_env("KARIGAR_FLOWS_SWEEP_INTERVAL_SECS") {
            self.flows.sweep_interval_secs =
                parse_num("KARIGAR_FLOWS_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("KARIGAR_FLOWS_PERSIST_STATE") {
            self.flows.persist_state = parse_num("KARIGAR_FLOWS_PERSIST_STATE", &value)?;
        }

        if let Some(value) = read_env("KARIGAR_MISSIONS_UTC_OFFSET_MINUTES") {
            self.missions.utc_offset_minutes =
                parse_num("KARIGAR_MISSIONS_UTC_OFFSET_MINUTES", &value)?;
        }

        let log_level = read_env("KARIGAR_LOGGING_LEVEL").or_else(|| read_env("KARIGAR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("KARIGAR_LOGGING_FORMAT").or_else(|| read_env("KARIGAR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_token) = overrides.telegram_bot_token {
            self.telegram.bot_token = secret_value(bot_token);
        }
        if let Some(media_base_url) = overrides.media_base_url {
            self.storage.media_base_url = media_base_url;
        }
        if let Some(documents_base_url) = overrides.documents_base_url {
            self.storage.documents_base_url = documents_base_url;
        }
        if let Some(persist_state) = overrides.persist_flow_state {
            self.flows.persist_state = persist_state;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_telegram(&self.telegram)?;
        validate_storage(&self.storage)?;
        validate_server(&self.server)?;
        validate_flows(&self.flows)?;
        validate_rewards(&self.rewards, &self.missions)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("karigar.toml"), PathBuf::from("config/karigar.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || !matches!(chars.peek(), Some('{')) {
            output.push(ch);
            continue;
        }
        chars.next();

        let mut key = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(next) => key.push(next),
                None => return Err(ConfigError::UnterminatedInterpolation),
            }
        }

        let value =
            env::var(&key).map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
        output.push_str(&value);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

/// Bot API tokens look like `<numeric bot id>:<secret>`.
fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    let token = telegram.bot_token.expose_secret();
    if token.is_empty() {
        return Err(ConfigError::Validation(
            "telegram.bot_token is required. Create a bot with @BotFather and copy the token it returns"
                .to_string(),
        ));
    }

    let well_formed = token
        .split_once(':')
        .map(|(id, secret)| {
            !id.is_empty() && id.chars().all(|ch| ch.is_ascii_digit()) && secret.len() >= 20
        })
        .unwrap_or(false);
    if !well_formed {
        return Err(ConfigError::Validation(
            "telegram.bot_token must look like `123456789:AA...` as issued by @BotFather"
                .to_string(),
        ));
    }

    if telegram.bot_username.trim().is_empty() || telegram.bot_username.starts_with('@') {
        return Err(ConfigError::Validation(
            "telegram.bot_username must be set without the leading `@`".to_string(),
        ));
    }

    if telegram.poll_timeout_secs == 0 || telegram.poll_timeout_secs > 50 {
        return Err(ConfigError::Validation(
            "telegram.poll_timeout_secs must be in range 1..=50".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    for (key, url) in [
        ("storage.media_base_url", &storage.media_base_url),
        ("storage.documents_base_url", &storage.documents_base_url),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }

    if storage.timeout_secs == 0 || storage.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "storage.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_flows(flows: &FlowsConfig) -> Result<(), ConfigError> {
    if flows.ttl_hours == 0 {
        return Err(ConfigError::Validation(
            "flows.ttl_hours must be greater than zero".to_string(),
        ));
    }

    if flows.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "flows.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_rewards(rewards: &RewardsConfig, missions: &MissionsConfig) -> Result<(), ConfigError> {
    let amounts = [
        ("rewards.seller_registration", rewards.seller_registration),
        ("rewards.verification", rewards.verification),
        ("rewards.store_creation", rewards.store_creation),
        ("rewards.story_creation", rewards.story_creation),
        ("rewards.buyer_registration", rewards.buyer_registration),
        ("missions.product_reward", missions.product_reward),
        ("missions.invite_reward", missions.invite_reward),
        ("missions.whatsapp_reward", missions.whatsapp_reward),
    ];
    if let Some((key, _)) = amounts.iter().find(|(_, amount)| *amount < 0) {
        return Err(ConfigError::Validation(format!("{key} must not be negative")));
    }

    // chrono accepts offsets strictly inside +-24h.
    if missions.utc_offset_minutes.abs() >= 24 * 60 {
        return Err(ConfigError::Validation(
            "missions.utc_offset_minutes must be within -1439..=1439".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    telegram: Option<TelegramPatch>,
    storage: Option<StoragePatch>,
    server: Option<ServerPatch>,
    flows: Option<FlowsPatch>,
    rewards: Option<RewardsPatch>,
    missions: Option<MissionsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    bot_token: Option<String>,
    bot_username: Option<String>,
    poll_timeout_secs: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    media_base_url: Option<String>,
    documents_base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FlowsPatch {
    ttl_hours: Option<u32>,
    sweep_interval_secs: Option<u64>,
    persist_state: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RewardsPatch {
    seller_registration: Option<i64>,
    verification: Option<i64>,
    store_creation: Option<i64>,
    story_creation: Option<i64>,
    buyer_registration: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct MissionsPatch {
    product_reward: Option<i64>,
    invite_reward: Option<i64>,
    whatsapp_reward: Option<i64>,
    utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::domain::mission::MissionType;
    use crate::flows::states::FlowKind;

    const TOKEN: &str = "123456789:AAEexampleexampleexample00";

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_KARIGAR_BOT_TOKEN", TOKEN);

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("karigar.toml");
            fs::write(
                &path,
                r#"
[telegram]
bot_token = "${TEST_KARIGAR_BOT_TOKEN}"
bot_username = "craft_market_bot"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.telegram.bot_token.expose_secret() == TOKEN,
                "bot token should be interpolated from the environment",
            )?;
            ensure(
                config.telegram.bot_username == "craft_market_bot",
                "bot username should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_KARIGAR_BOT_TOKEN"]);
        result
    }

    #[test]
    fn reward_sections_override_per_flow_constants() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KARIGAR_TELEGRAM_BOT_TOKEN", TOKEN);

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("karigar.toml");
            fs::write(
                &path,
                r#"
[rewards]
seller_registration = 10
story_creation = 25

[missions]
invite_reward = 15
utc_offset_minutes = 0
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.rewards.bonus_for(FlowKind::SellerRegistration) == 10,
                "seller registration bonus should come from the file",
            )?;
            ensure(
                config.rewards.bonus_for(FlowKind::Verification) == 25,
                "verification bonus should keep its default",
            )?;
            ensure(
                config.rewards.bonus_for(FlowKind::ProductBrowsing) == 0,
                "browsing never pays a bonus",
            )?;
            ensure(
                config.missions.reward_for(MissionType::Invite) == 15,
                "invite reward should come from the file",
            )?;
            ensure(
                config.missions.offset().local_minus_utc() == 0,
                "offset should be UTC when configured as zero",
            )?;
            Ok(())
        })();

        clear_vars(&["KARIGAR_TELEGRAM_BOT_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KARIGAR_TELEGRAM_BOT_TOKEN", TOKEN);
        env::set_var("KARIGAR_LOG_LEVEL", "warn");
        env::set_var("KARIGAR_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["KARIGAR_TELEGRAM_BOT_TOKEN", "KARIGAR_LOG_LEVEL", "KARIGAR_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KARIGAR_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("KARIGAR_FLOWS_TTL_HOURS", "48");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("karigar.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[telegram]
bot_token = "42:file-token-file-token-file"

[flows]
ttl_hours = 12
sweep_interval_secs = 60

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.flows.ttl_hours == 48, "env ttl should win over the file")?;
            ensure(config.flows.sweep_interval_secs == 60, "file sweep interval should apply")?;
            ensure(
                config.telegram.bot_token.expose_secret() == "42:file-token-file-token-file",
                "file token should win over the empty default",
            )?;
            Ok(())
        })();

        clear_vars(&["KARIGAR_DATABASE_URL", "KARIGAR_FLOWS_TTL_HOURS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KARIGAR_TELEGRAM_BOT_TOKEN", "not-a-token");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("telegram.bot_token")
            );
            ensure(has_message, "validation failure should mention telegram.bot_token")
        })();

        clear_vars(&["KARIGAR_TELEGRAM_BOT_TOKEN"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KARIGAR_TELEGRAM_BOT_TOKEN", TOKEN);
        env::set_var("KARIGAR_FLOWS_SWEEP_INTERVAL_SECS", "often");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "KARIGAR_FLOWS_SWEEP_INTERVAL_SECS",
                "error should name the offending variable",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected an invalid override error".to_string()),
        };

        clear_vars(&["KARIGAR_TELEGRAM_BOT_TOKEN", "KARIGAR_FLOWS_SWEEP_INTERVAL_SECS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KARIGAR_TELEGRAM_BOT_TOKEN", TOKEN);
        env::set_var("KARIGAR_STORAGE_API_KEY", "storage-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains(TOKEN), "debug output should not contain the bot token")?;
            ensure(
                !debug.contains("storage-secret-value"),
                "debug output should not contain the storage key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["KARIGAR_TELEGRAM_BOT_TOKEN", "KARIGAR_STORAGE_API_KEY"]);
        result
    }
}
