//! Cryptographic error types for `session-key-crypto`.

use thiserror::Error;

/// Errors produced by session key cryptographic operations.
///
/// No variant ever carries PIN digits, derived keys, or plaintext key bytes.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Caller-supplied input is malformed (PIN format, hash encoding, key length).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Key derivation failed (Argon2id/PBKDF2 parameter validation, memory allocation).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Symmetric encryption failure (AES-256-GCM).
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Authentication tag verification failed.
    ///
    /// Deliberately carries no detail: wrong PIN, wrong fingerprint, wrong
    /// nonce and corrupted ciphertext are indistinguishable here.
    #[error("decryption failed")]
    Decryption,

    /// Invalid key material (wrong length, public half does not match seed).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Digital signature creation or verification failure.
    #[error("signature error: {0}")]
    Signature(String),

    /// Secure memory allocation failure (mlock, CSPRNG).
    #[error("secure memory error: {0}")]
    SecureMemory(String),

    /// Recovery payload could not be decoded (missing fields, bad encoding).
    #[error("malformed recovery data: {0}")]
    MalformedRecoveryData(String),
}
