//! Error taxonomy shared by the ledger, the stores, and the review pipeline.
//!
//! Every error that reaches a caller carries a stable numeric code (see
//! [`ContractError::code`]), a human-readable message, and optionally a
//! structured JSON payload. The HTTP layer maps the code onto the response
//! status; the CLI prints the message.

use serde_json::Value;

/// Top-level error type for contract, version, and review operations.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// Missing contract, version, or content record.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate content hash or duplicate contract number.
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        data: Option<Value>,
    },

    /// Disallowed file type, illegal status transition, malformed request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Remote file transfer or an external service was unreachable or
    /// answered with a non-success status.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No user identity attached to an operation that requires one.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Database failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Local filesystem failure (scratch files, local remote backend).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ContractError>;

impl ContractError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
            data: None,
        }
    }

    /// Conflict carrying a structured payload (e.g. the version that already
    /// holds a duplicate hash).
    pub fn conflict_with(msg: impl Into<String>, data: Value) -> Self {
        Self::Conflict {
            message: msg.into(),
            data: Some(data),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    /// Stable numeric code surfaced to API clients.
    pub fn code(&self) -> u16 {
        match self {
            ContractError::NotFound(_) => 404,
            ContractError::Conflict { .. } => 409,
            ContractError::InvalidInput(_) => 400,
            ContractError::Transport(_) => 502,
            ContractError::Unauthenticated(_) => 401,
            ContractError::Storage(_) | ContractError::Io(_) => 500,
        }
    }

    /// Optional structured payload for the error envelope.
    pub fn data(&self) -> Option<&Value> {
        match self {
            ContractError::Conflict { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// True for SQLite `UNIQUE` constraint violations.
    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

impl From<reqwest::Error> for ContractError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ContractError::Transport(format!("request timed out: {}", err))
        } else {
            ContractError::Transport(err.to_string())
        }
    }
}

impl From<ssh2::Error> for ContractError {
    fn from(err: ssh2::Error) -> Self {
        ContractError::Transport(format!("sftp: {}", err))
    }
}
