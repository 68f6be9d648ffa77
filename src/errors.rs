use crate::db::errors::DbError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

/// Error taxonomy for the authentication core.
///
/// Every expected failure is a distinct variant so callers can branch on kind
/// instead of string-matching messages. `user_message` deliberately collapses
/// several variants into one client-visible phrasing (credential failures,
/// unknown-vs-revoked records) while the server-side log keeps the detail.
#[derive(ThisError, Debug)]
pub enum Error {
    /// No user with the given email or id
    #[error("User not found")]
    UserNotFound,

    /// Password does not match the stored hash
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Operation requires a verified email address
    #[error("Email address is not verified")]
    EmailNotVerified,

    /// Verification requested for an already-verified address
    #[error("Email address is already verified")]
    AlreadyVerified,

    /// Bad signature or malformed token structure
    #[error("Invalid token")]
    TokenInvalid,

    /// Token past its expiry claim
    #[error("Token expired")]
    TokenExpired,

    /// Token presented before its not-before claim
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// Token claims carry no jti where one is required
    #[error("Token has no jti claim")]
    MissingJti,

    /// No server-side record for the jti, or the record is revoked.
    /// This is the replay-detection point for rotated-out refresh tokens.
    #[error("Unknown or revoked token")]
    UnknownOrRevokedToken,

    /// Stored digest does not match the presented token - possible tampering
    #[error("Token digest mismatch")]
    TokenMismatch,

    /// Malformed request body or failed field validation
    #[error("{message}")]
    ValidationFailed { message: String },

    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated,

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::UserNotFound | Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Error::EmailNotVerified => StatusCode::FORBIDDEN,
            Error::AlreadyVerified => StatusCode::CONFLICT,
            Error::TokenInvalid | Error::TokenExpired | Error::TokenNotYetValid | Error::MissingJti => StatusCode::UNAUTHORIZED,
            Error::UnknownOrRevokedToken | Error::TokenMismatch => StatusCode::FORBIDDEN,
            Error::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details.
    ///
    /// Credential failures never distinguish unknown-user from wrong-password, and
    /// token-record failures never distinguish missing from revoked - both splits
    /// would hand an attacker an enumeration or replay oracle.
    pub fn user_message(&self) -> String {
        match self {
            Error::UserNotFound | Error::InvalidCredentials => "Invalid email or password".to_string(),
            Error::EmailNotVerified => "Email address has not been verified".to_string(),
            Error::AlreadyVerified => "Email address is already verified".to_string(),
            Error::TokenInvalid | Error::TokenNotYetValid | Error::MissingJti => "Invalid token".to_string(),
            Error::TokenExpired => "Token expired".to_string(),
            Error::UnknownOrRevokedToken | Error::TokenMismatch => "Invalid or revoked token".to_string(),
            Error::ValidationFailed { message } => message.clone(),
            Error::Unauthenticated => "Authentication required".to_string(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, table, .. } => match (table.as_deref(), constraint.as_deref()) {
                    (Some("users"), Some(c)) if c.contains("email") => "An account with this email address already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            // Replay and tamper signals are worth monitoring, expiry is routine
            Error::UnknownOrRevokedToken | Error::TokenMismatch => {
                tracing::warn!("Suspicious token failure: {}", self);
            }
            Error::UserNotFound | Error::InvalidCredentials | Error::Unauthenticated => {
                tracing::info!("Authentication failure: {}", self);
            }
            Error::TokenInvalid | Error::TokenExpired | Error::TokenNotYetValid | Error::MissingJti => {
                tracing::debug!("Token verification failure: {}", self);
            }
            Error::EmailNotVerified | Error::AlreadyVerified | Error::ValidationFailed { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = serde_json::json!({ "error": self.user_message() });
        (status, axum::Json(body)).into_response()
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_share_one_client_message() {
        assert_eq!(Error::UserNotFound.user_message(), Error::InvalidCredentials.user_message());
        assert_eq!(Error::UserNotFound.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn record_failures_share_one_client_message() {
        assert_eq!(
            Error::UnknownOrRevokedToken.user_message(),
            Error::TokenMismatch.user_message()
        );
        assert_eq!(Error::UnknownOrRevokedToken.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn expiry_is_distinguishable_from_invalidity() {
        assert_ne!(Error::TokenExpired.user_message(), Error::TokenInvalid.user_message());
    }
}
