//! services/api/src/error.rs
//!
//! Startup and wiring failures of the perspective service. Request-level failures
//! never reach this type; handlers turn them into status codes.

use crate::config::ConfigError;
use drishti_core::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// The pool could not connect, or the server loop failed on the database.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("OPENAI_API_KEY must be set to generate quizzes and cards")]
    MissingApiKey,

    #[error("CORS_ORIGIN '{origin}' is not a valid header value: {reason}")]
    InvalidCorsOrigin { origin: String, reason: String },

    /// Binding the listener or serving connections.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
