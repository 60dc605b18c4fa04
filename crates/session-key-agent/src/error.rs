//! Error types for `session-key-agent`.

use session_key_crypto::CryptoError;
use thiserror::Error;

/// Errors talking to the session key backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request or response body could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend answered with a non-success status.
    #[error("backend error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The backend has no record for the given session key.
    #[error("session key not found: {0}")]
    NotFound(String),

    /// The response was well-formed JSON but semantically unusable.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

/// Errors produced by session key lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionKeyError {
    /// Cryptographic failure, including PIN validation and the generic
    /// decryption failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The fingerprint of this device differs from the one the key was sealed under.
    #[error("device fingerprint does not match the session key")]
    FingerprintMismatch,

    /// The backend reports this device is not the one the key is bound to.
    #[error("session key {session_key_id} is bound to another device; use recovery")]
    DeviceMismatch {
        /// The session key that was being loaded.
        session_key_id: String,
    },

    /// No cached key and no PIN supplied.
    #[error("PIN required: session key is not unlocked")]
    PinRequired,

    /// `extend` called while nothing is cached.
    #[error("session key is not cached")]
    NotCached,

    /// The session key has been revoked.
    #[error("session key has been revoked")]
    Revoked,

    /// No session key has been created or loaded yet.
    #[error("no active session key")]
    NotActive,

    /// Backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Configuration file could not be parsed or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking crypto task was cancelled or panicked.
    #[error("background task failed: {0}")]
    Task(String),
}

impl SessionKeyError {
    /// Malformed PIN or malformed recovery payload.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Crypto(CryptoError::Validation(_) | CryptoError::MalformedRecoveryData(_))
        )
    }

    /// The generic authentication failure (wrong PIN, wrong device or tampering).
    #[must_use]
    pub const fn is_decryption(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::Decryption))
    }

    /// The caller should switch to the recovery flow instead of retrying the PIN.
    #[must_use]
    pub const fn requires_recovery(&self) -> bool {
        matches!(self, Self::DeviceMismatch { .. } | Self::FingerprintMismatch)
    }
}

impl From<tokio::task::JoinError> for SessionKeyError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_classify_errors() {
        assert!(SessionKeyError::from(CryptoError::Validation("pin".into())).is_validation());
        assert!(
            SessionKeyError::from(CryptoError::MalformedRecoveryData("x".into())).is_validation()
        );
        assert!(SessionKeyError::from(CryptoError::Decryption).is_decryption());
        assert!(SessionKeyError::FingerprintMismatch.requires_recovery());
        assert!(SessionKeyError::DeviceMismatch {
            session_key_id: "sk_1".into()
        }
        .requires_recovery());
        assert!(!SessionKeyError::PinRequired.requires_recovery());
    }

    #[test]
    fn decryption_error_is_not_more_specific_through_wrapper() {
        let err = SessionKeyError::from(CryptoError::Decryption);
        assert_eq!(err.to_string(), "decryption failed");
    }
}
