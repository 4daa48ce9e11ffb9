//! Auth error types.

use vigil_core::NotifyError;

/// Errors that can occur while obtaining a token.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The provider refused the credentials.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The token endpoint answered with an error status.
    #[error("OAuth error ({status}): {message}")]
    OAuth {
        /// HTTP status code (0 if no response).
        status: u16,
        /// Error description.
        message: String,
    },

    /// No token source is configured.
    #[error("no auth configured: {0}")]
    NotConfigured(String),
}

impl From<AuthError> for NotifyError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
