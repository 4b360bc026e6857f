//! Server error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use boardcast_hub::SnapshotError;
use thiserror::Error;
use tracing::warn;

/// Password hashing or verification failure.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The configured password is empty.
    #[error("password must not be empty")]
    EmptyPassword,
    /// bcrypt rejected the input or the stored hash.
    #[error("bcrypt error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    /// The blocking verification task panicked or was cancelled.
    #[error("password check task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Request-level failure returned by a handler.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body is not a JSON object with a string `password`.
    #[error("Invalid request format")]
    BadRequest,
    /// Password did not match.
    #[error("Invalid password")]
    InvalidPassword,
    /// No valid session cookie.
    #[error("Unauthorized")]
    Unauthorized,
    /// Password verification itself failed.
    #[error("Session error")]
    Auth(#[from] AuthError),
    /// Writing the snapshot file failed.
    #[error("Failed to save snapshot")]
    Save(#[source] SnapshotError),
    /// Reading the snapshot file failed.
    #[error("Failed to restore snapshot")]
    Restore(#[source] SnapshotError),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::InvalidPassword | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Auth(_) | Self::Save(_) | Self::Restore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Auth(source) => warn!(error = %source, "password verification failed"),
            Self::Save(source) | Self::Restore(source) => warn!(error = %source, "{self}"),
            _ => {}
        }
        (status, self.to_string()).into_response()
    }
}

/// Invalid server configuration.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid server config: {field} {reason}")]
pub struct ConfigError {
    /// Offending field.
    pub field: &'static str,
    /// Why the value was rejected.
    pub reason: &'static str,
}

impl ConfigError {
    /// Build a config error for `field`.
    pub fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
