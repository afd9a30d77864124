use thiserror::Error;

use crate::password::PasswordError;

/// Postgres error code reported by the backend for a unique-constraint violation.
pub const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Backend is not configured")]
    NotConfigured,

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend error ({status}): {message}")]
    Backend {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error("Password recovery is not available: {0}")]
    RecoveryUnavailable(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn backend(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            code,
            message: message.into(),
        }
    }

    /// True when the backend rejected a write because the row already exists.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Backend { code: Some(code), .. } if code == UNIQUE_VIOLATION)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_detection() {
        let err = AppError::backend(409, Some("23505".to_string()), "duplicate key value");
        assert!(err.is_unique_violation());

        let err = AppError::backend(400, Some("23502".to_string()), "null value");
        assert!(!err.is_unique_violation());
        assert!(!AppError::NotConfigured.is_unique_violation());
    }

    #[test]
    fn test_error_messages() {
        let err = AppError::backend(500, None, "boom");
        assert_eq!(err.to_string(), "Backend error (500): boom");
        assert_eq!(AppError::NotSignedIn.to_string(), "Not signed in");
    }
}
