use thiserror::Error;

/// Error kinds surfaced by the agent core.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Missing or malformed settings (API key, connection parameters).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The database or the completion service could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A tool was called without a required parameter.
    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(String),

    /// The completion service answered with an error or an unusable payload.
    #[error("completion service error: {0}")]
    Completion(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl From<tokio_postgres::Error> for AgentError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.is_closed() {
            AgentError::Connection(e.to_string())
        } else {
            AgentError::Database(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if code.code == rusqlite::ErrorCode::CannotOpen =>
            {
                AgentError::Connection(e.to_string())
            }
            other => AgentError::Database(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            AgentError::Connection(e.to_string())
        } else {
            AgentError::Completion(e.to_string())
        }
    }
}
