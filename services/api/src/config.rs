//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub quiz_model: String,
    pub cards_model: String,
    pub chat_model: String,
    /// Upper bound for each store or model call made on behalf of a workflow.
    pub call_timeout: Duration,
    pub chat_history_path: PathBuf,
    /// Chat threads untouched for longer than this are pruned at startup. `None` keeps them.
    pub chat_retention: Option<Duration>,
    pub cors_origin: String,
}

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CHAT_RETENTION_DAYS: u64 = 90;
const SECS_PER_DAY: u64 = 24 * 60 * 60;

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Server and Database Settings ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            var("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Model Settings ---
        let openai_api_key = var("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
        let quiz_model = var("QUIZ_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let cards_model = var("CARDS_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let chat_model = var("CHAT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        // --- Workflow Settings ---
        let call_timeout = match var("CALL_TIMEOUT_SECS") {
            Some(raw) => parse_timeout(&raw)?,
            None => Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        };
        let chat_history_path = var("CHAT_HISTORY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./chat-history"));
        let chat_retention = match var("CHAT_RETENTION_DAYS") {
            Some(raw) => parse_retention(&raw)?,
            None => Some(Duration::from_secs(DEFAULT_CHAT_RETENTION_DAYS * SECS_PER_DAY)),
        };
        let cors_origin =
            var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            quiz_model,
            cards_model,
            chat_model,
            call_timeout,
            chat_history_path,
            chat_retention,
            cors_origin,
        })
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidValue(
            "CALL_TIMEOUT_SECS".to_string(),
            format!("'{}' is not a positive number of seconds", raw),
        )),
    }
}

/// Days to keep chat threads; `0` keeps them forever.
fn parse_retention(raw: &str) -> Result<Option<Duration>, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Ok(None),
        Ok(days) => Ok(Some(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))),
        Err(_) => Err(ConfigError::InvalidValue(
            "CHAT_RETENTION_DAYS".to_string(),
            format!("'{}' is not a number of days", raw),
        )),
    }
}
