//! Authentication and session error types

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tollgate_store::StoreError;

/// Authentication and session errors
///
/// The first six variants are the only outcomes a public operation returns.
/// Messages never reveal which internal check failed.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthError {
    /// Bad login name, password, role or an ineligible account
    #[error("Invalid credentials")]
    InvalidCredentials { remaining_attempts: u32 },

    /// Too many failed attempts for this login name and role
    #[error("Account locked, retry in {retry_after_minutes} minute(s)")]
    AccountLocked { retry_after_minutes: u64 },

    /// Unknown, expired, malformed or already revoked refresh token
    #[error("Invalid token")]
    InvalidToken,

    /// A rotated refresh token was presented again
    #[error("Security violation: token reuse detected")]
    SecurityViolation,

    /// Missing, invalid or force-revoked access token
    #[error("Unauthorized")]
    Unauthorized,

    /// Caller lacks the role required for the operation
    #[error("Forbidden")]
    Forbidden,

    /// Profile lookup found nothing for an authenticated principal
    #[error("User not found")]
    UserNotFound,

    /// Configuration errors
    #[error("Authentication configuration error: {message}")]
    ConfigurationError { message: String },

    /// Cryptographic errors
    #[error("Cryptographic error: {message}")]
    CryptographicError { message: String },

    /// Session store failure that no fallback could absorb
    #[error("Session store error: {message}")]
    SessionStore { message: String },

    /// Credential or profile source failure
    #[error("Lookup error: {message}")]
    LookupError { message: String },
}

impl AuthError {
    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials { .. } => "INVALID_CREDENTIALS",
            AuthError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::SecurityViolation => "SECURITY_VIOLATION",
            AuthError::Unauthorized => "UNAUTHORIZED",
            AuthError::Forbidden => "FORBIDDEN",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::ConfigurationError { .. } => "CONFIGURATION_ERROR",
            AuthError::CryptographicError { .. } => "CRYPTOGRAPHIC_ERROR",
            AuthError::SessionStore { .. } => "SESSION_STORE_ERROR",
            AuthError::LookupError { .. } => "LOOKUP_ERROR",
        }
    }

    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::InvalidCredentials { .. } => 401,
            AuthError::AccountLocked { .. } => 429, // Too Many Requests
            AuthError::InvalidToken => 401,
            AuthError::SecurityViolation => 401,
            AuthError::Unauthorized => 401,
            AuthError::Forbidden => 403,
            AuthError::UserNotFound => 404,
            AuthError::ConfigurationError { .. } => 500,
            AuthError::CryptographicError { .. } => 500,
            AuthError::SessionStore { .. } => 503,
            AuthError::LookupError { .. } => 503,
        }
    }

    /// Whether this error may be shown to an external caller as-is
    pub fn is_caller_visible(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials { .. }
                | AuthError::AccountLocked { .. }
                | AuthError::InvalidToken
                | AuthError::SecurityViolation
                | AuthError::Unauthorized
                | AuthError::Forbidden
                | AuthError::UserNotFound
        )
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Create a cryptographic error
    pub fn crypto_error(message: impl Into<String>) -> Self {
        Self::CryptographicError { message: message.into() }
    }

    /// Create a session store error
    pub fn store_error(message: impl Into<String>) -> Self {
        Self::SessionStore { message: message.into() }
    }

    /// Create a lookup error
    pub fn lookup_error(message: impl Into<String>) -> Self {
        Self::LookupError { message: message.into() }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::store_error(err.to_string())
    }
}

#[cfg(feature = "argon2")]
impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        Self::crypto_error(err.to_string())
    }
}

#[cfg(feature = "bcrypt")]
impl From<bcrypt::BcryptError> for AuthError {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self::crypto_error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AuthError::InvalidCredentials { remaining_attempts: 3 }.error_code(),
            "INVALID_CREDENTIALS"
        );
        assert_eq!(AuthError::SecurityViolation.error_code(), "SECURITY_VIOLATION");
        assert_eq!(AuthError::Forbidden.error_code(), "FORBIDDEN");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::InvalidToken.status_code(), 401);
        assert_eq!(AuthError::Forbidden.status_code(), 403);
        assert_eq!(AuthError::AccountLocked { retry_after_minutes: 5 }.status_code(), 429);
        assert_eq!(AuthError::config_error("test").status_code(), 500);
        assert_eq!(AuthError::store_error("down").status_code(), 503);
    }

    #[test]
    fn test_invalid_credentials_message_is_uniform() {
        let a = AuthError::InvalidCredentials { remaining_attempts: 9 };
        let b = AuthError::InvalidCredentials { remaining_attempts: 0 };
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), "Invalid credentials");
    }

    #[test]
    fn test_error_display() {
        let err = AuthError::AccountLocked { retry_after_minutes: 7 };
        assert_eq!(
            err.to_string(),
            "Account locked due to failed login attempts, retry in 7 minute(s)"
        );
        assert!(err.is_caller_visible());
        assert!(!AuthError::store_error("x").is_caller_visible());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: AuthError = StoreError::Timeout.into();
        assert_eq!(err, AuthError::store_error("Timeout error"));
    }
}
