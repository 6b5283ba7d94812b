//! Authentication error types.

use crate::password_policy::PasswordViolation;
use std::fmt;
use thiserror::Error;

/// A server-reported problem with one input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Field name, or `None` when the server did not point at a field.
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn new(field: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            field: field.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}: {}", field, self.message),
            None => f.write_str(&self.message),
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The server rejected the submitted credentials
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Registration or profile fields were rejected, reported per field
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<FieldError>),

    /// Username or email already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The refresh exchange failed and the session was cleared
    #[error("Session expired")]
    SessionExpired,

    /// Transport failure, no response received
    #[error("Network error: {0}")]
    Network(String),

    /// Any other non-success response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// No credentials stored
    #[error("Not logged in")]
    NotLoggedIn,

    /// Client-side password checks failed before any request was sent
    #[error("Password rejected: {}", join(.0))]
    PasswordPolicy(Vec<PasswordViolation>),

    /// A logout or dispose happened while the operation was in flight
    #[error("Operation superseded by a session change")]
    Superseded,

    /// The session manager has been disposed
    #[error("Session manager disposed")]
    Disposed,

    /// Invalid state transition in the session FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] token_store::StorageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] pga_core::CoreError),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(err.to_string())
    }
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Transport failures (connect, timeout, reset)
    /// - Responses with 5xx status codes
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            AuthError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
