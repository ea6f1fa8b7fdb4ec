//! Session error taxonomy

use crate::types::FieldError;
use thiserror::Error;

/// Errors surfaced by the session layer.
///
/// `Clone` so that one coalesced refresh outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Login rejected by the identity service
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Refresh token rejected; the session cannot be renewed
    #[error("Refresh token is invalid or expired")]
    InvalidOrExpiredRefreshToken,

    /// Refresh call exceeded the request timeout
    #[error("Token refresh timed out")]
    RefreshTimeout,

    /// Login call exceeded the request timeout
    #[error("Login timed out")]
    LoginTimeout,

    /// Access token rejected by an authenticated endpoint
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Transport failure talking to the identity service
    #[error("Network error: {0}")]
    Network(String),

    /// Access token payload could not be decoded
    #[error("Access token could not be decoded: {0}")]
    UndecodableToken(String),

    /// Operation requires a session but none exists
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The session was ended while the operation was in flight
    #[error("Session ended before the operation completed")]
    SessionEnded,

    /// Persisting or clearing tokens failed
    #[error("Token storage error: {0}")]
    Storage(String),

    /// Registration form failed client-side checks; nothing was sent
    #[error("Invalid registration: {}", join_fields(.0))]
    InvalidRegistration(Vec<FieldError>),

    /// Request refused by the identity service with an explanation
    #[error("{0}")]
    Rejected(String),

    /// Unexpected status from the identity service
    #[error("Identity service error {status}: {message}")]
    Service { status: u16, message: String },
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Token persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}
