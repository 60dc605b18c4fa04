//! Portable recovery payloads and device migration.
//!
//! This module provides:
//! - [`generate`]: derive a [`RecoveryPayload`] from an [`EncryptedSessionKey`]
//! - [`encode`] / [`decode`]: lossless JSON text form
//! - [`encode_compact`] / [`decode_compact`]: base64url form for QR codes
//! - [`re_encrypt_for_new_device`]: decrypt under old credentials, seal under new ones
//!
//! The payload leaves out the originating device fingerprint. Whoever holds
//! a printed payload learns nothing about the device; the fingerprint has to
//! be supplied separately when recovering.

use chrono::{DateTime, Utc};
use data_encoding::BASE64URL_NOPAD;
use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::error::CryptoError;
use crate::fingerprint::FingerprintHash;
use crate::kdf::{KdfProfile, Pin};
use crate::keypair::SessionPublicKey;
use crate::record::{EncryptedSessionKey, KeyFormatVersion};
use crate::symmetric::{SealedData, NONCE_LEN};

/// Portable copy of an encrypted session key, minus the device binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPayload {
    #[serde(with = "encoding::base64_bytes")]
    pub encrypted_session_key: Vec<u8>,
    #[serde(with = "encoding::base64_array")]
    pub nonce: [u8; NONCE_LEN],
    pub public_key: SessionPublicKey,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

impl RecoveryPayload {
    /// Rebind the payload to the fingerprint it was originally sealed under.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::MalformedRecoveryData` if the ciphertext length
    /// or version is not one this crate produces.
    pub fn to_encrypted(
        &self,
        original_fingerprint: FingerprintHash,
    ) -> Result<EncryptedSessionKey, CryptoError> {
        KeyFormatVersion::parse(&self.version)
            .map_err(|e| CryptoError::MalformedRecoveryData(e.to_string()))?;
        EncryptedSessionKey::assemble(
            SealedData {
                nonce: self.nonce,
                ciphertext: self.encrypted_session_key.clone(),
            },
            self.public_key,
            original_fingerprint,
        )
        .map_err(|e| CryptoError::MalformedRecoveryData(e.to_string()))
    }
}

/// Build the portable payload for `encrypted`. Pure; nothing is decrypted.
#[must_use]
pub fn generate(encrypted: &EncryptedSessionKey) -> RecoveryPayload {
    RecoveryPayload {
        encrypted_session_key: encrypted.ciphertext().to_vec(),
        nonce: *encrypted.nonce(),
        public_key: *encrypted.public_key(),
        version: encrypted.version().as_str().to_owned(),
        created_at: Utc::now(),
    }
}

/// Serialize to JSON.
///
/// # Errors
///
/// Returns `CryptoError::MalformedRecoveryData` if serialization fails.
pub fn encode(payload: &RecoveryPayload) -> Result<String, CryptoError> {
    serde_json::to_string(payload).map_err(|e| CryptoError::MalformedRecoveryData(e.to_string()))
}

/// Parse JSON produced by [`encode`].
///
/// # Errors
///
/// Returns `CryptoError::MalformedRecoveryData` if the text is not JSON,
/// a required field is absent, or a field has the wrong encoding.
pub fn decode(text: &str) -> Result<RecoveryPayload, CryptoError> {
    let payload: RecoveryPayload = serde_json::from_str(text)
        .map_err(|e| CryptoError::MalformedRecoveryData(e.to_string()))?;
    KeyFormatVersion::parse(&payload.version)
        .map_err(|e| CryptoError::MalformedRecoveryData(e.to_string()))?;
    Ok(payload)
}

/// JSON wrapped in unpadded base64url, suitable for a QR code.
///
/// # Errors
///
/// Returns `CryptoError::MalformedRecoveryData` if serialization fails.
pub fn encode_compact(payload: &RecoveryPayload) -> Result<String, CryptoError> {
    Ok(BASE64URL_NOPAD.encode(encode(payload)?.as_bytes()))
}

/// Inverse of [`encode_compact`].
///
/// # Errors
///
/// Returns `CryptoError::MalformedRecoveryData` for bad base64url or any
/// [`decode`] failure.
pub fn decode_compact(text: &str) -> Result<RecoveryPayload, CryptoError> {
    let bytes = BASE64URL_NOPAD
        .decode(text.trim().as_bytes())
        .map_err(|e| CryptoError::MalformedRecoveryData(format!("invalid base64url: {e}")))?;
    let json = String::from_utf8(bytes)
        .map_err(|_| CryptoError::MalformedRecoveryData("payload is not UTF-8".into()))?;
    decode(&json)
}

/// Move a session key to a new device.
///
/// Always decrypts under `(old_pin, old_fingerprint)` first and seals the
/// recovered plaintext again under `(new_pin, new_fingerprint)` with a new
/// nonce. The old ciphertext is never re-wrapped.
///
/// # Errors
///
/// Returns `CryptoError::Decryption` if the old credentials are wrong,
/// `CryptoError::MalformedRecoveryData` if the payload is inconsistent, and
/// propagates KDF or cipher failures for the new credentials.
pub fn re_encrypt_for_new_device(
    payload: &RecoveryPayload,
    old_pin: &Pin,
    old_fingerprint: &FingerprintHash,
    new_pin: &Pin,
    new_fingerprint: &FingerprintHash,
    profile: &KdfProfile,
) -> Result<EncryptedSessionKey, CryptoError> {
    let previous = payload.to_encrypted(*old_fingerprint)?;
    let keypair = previous.open(old_pin, old_fingerprint, profile)?;
    let migrated = EncryptedSessionKey::seal(&keypair, new_pin, new_fingerprint, profile)?;
    tracing::debug!(public_key = %migrated.public_key(), "session key re-encrypted for new device");
    Ok(migrated)
}
