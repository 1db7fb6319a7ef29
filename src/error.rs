//! Failure taxonomy shared by the session and federation engines.

use thiserror::Error;

/// Typed failures surfaced to authentication and callback controllers.
///
/// Validation failures are terminal for the request and are never retried
/// inside the core. [`Error::StorageUnavailable`] is the only transient kind;
/// callers decide whether to retry the whole operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("an account with this email already exists")]
    DuplicateIdentity,
    #[error("invalid email or password")]
    InvalidCredential,
    #[error("invalid token")]
    InvalidToken,
    #[error("refresh token expired")]
    TokenExpired,
    #[error("correlation state not found")]
    StateNotFound,
    #[error("storage unavailable: {0:#}")]
    StorageUnavailable(#[source] anyhow::Error),
    #[error("internal error: {0:#}")]
    Internal(#[source] anyhow::Error),
}

impl Error {
    /// Whether the caller may retry the whole operation.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}
