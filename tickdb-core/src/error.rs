//! Error types for TickDB operations
//!
//! The `Display` strings here are wire protocol: clients match on them, so
//! they must not be reworded.

use thiserror::Error;

use crate::point::FieldType;

/// Result type for TickDB operations
pub type TickResult<T> = Result<T, TickError>;

/// Error taxonomy shared by the HTTP API and its backends
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TickError {
    #[error("database is required")]
    DatabaseRequired,

    /// Write-path lookup failure; carries the requested name, quoted.
    #[error("database not found: {0:?}")]
    DatabaseNotFound(String),

    /// Statement-level lookup failure, reported without the name.
    #[error("database not found")]
    DatabaseMissing,

    #[error("database exists")]
    DatabaseExists,

    #[error("retention policy not found")]
    RetentionPolicyNotFound,

    #[error("retention policy exists")]
    RetentionPolicyExists,

    #[error("fields are required")]
    FieldsRequired,

    #[error("field {field:?} is type {got}, mapped as type {stored}")]
    FieldTypeConflict {
        field: String,
        got: FieldType,
        stored: FieldType,
    },

    #[error("user exists")]
    UserExists,

    #[error("user not found")]
    UserNotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    /// Authentication or privilege failure; the message is surfaced verbatim
    /// with status 401.
    #[error("{0}")]
    Authorize(String),

    #[error("data node exists")]
    DataNodeExists,

    #[error("data node not found")]
    DataNodeNotFound,

    #[error("data node url required")]
    DataNodeUrlRequired,

    #[error("{0}")]
    InvalidTimestamp(String),

    /// Statement could not be parsed; mapped to 400 at the query endpoint.
    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Internal(String),
}

impl TickError {
    /// Create a new parse error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    /// Create a new authorization error
    pub fn authorize<S: Into<String>>(message: S) -> Self {
        Self::Authorize(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// True for identity and privilege failures, which map to 401.
    pub fn is_authorization(&self) -> bool {
        matches!(self, TickError::Authorize(_) | TickError::InvalidCredentials)
    }

    /// True for malformed-statement failures, which map to 400 on the query
    /// endpoint.
    pub fn is_parse(&self) -> bool {
        matches!(self, TickError::Parse(_))
    }
}
