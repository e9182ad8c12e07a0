use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transient infrastructure error: {0}")]
    TransientInfra(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors worth another attempt through the message retry path
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientInfra(_) | Error::Database(_) | Error::Storage(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<lapin::Error> for Error {
    fn from(e: lapin::Error) -> Self {
        Error::TransientInfra(format!("RabbitMQ error: {}", e))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            // unique_violation
            if db_err.code().as_deref() == Some("23505") {
                return Error::Conflict(db_err.message().to_string());
            }
        }
        Error::Database(e.to_string())
    }
}
