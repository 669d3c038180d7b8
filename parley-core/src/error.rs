use thiserror::Error;

use crate::completion::CompletionError;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Auth(String),

    #[error("Invalid or missing session token")]
    InvalidToken,

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] CompletionError),

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ParleyError>;
