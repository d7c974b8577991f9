//! Application layer errors

use thiserror::Error;

/// Engine operation result type
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors reported by the voting engine.
///
/// None of these are fatal: every variant is a refusal the caller turns into
/// a failed result for the user.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Unknown voter/proposal/article, out-of-range points, malformed request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Illegal lifecycle transition or action outside the allowed state
    #[error("State error: {0}")]
    State(String),

    /// Attempt to modify article 0 or to meet its requirement
    #[error("Immutable: {0}")]
    Immutability(String),

    #[error("Timed out waiting for exclusive access to {0}")]
    ConcurrencyTimeout(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        EngineError::State(msg.into())
    }

    pub fn immutable(msg: impl Into<String>) -> Self {
        EngineError::Immutability(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::ConcurrencyTimeout(_))
    }
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Not registered: use !register first")]
    NoSender,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
