//! Session key backend contract.
//!
//! One request/response pair per endpoint plus the [`SessionKeyBackend`]
//! trait. Requests are built only from [`EncryptedSessionKey`] and
//! [`RecoveryPayload`], neither of which holds a PIN, a derived key or
//! plaintext key bytes, so no request can carry them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_key_crypto::encoding;
use session_key_crypto::symmetric::{SealedData, NONCE_LEN};
use session_key_crypto::{EncryptedSessionKey, FingerprintHash, RecoveryPayload, SessionPublicKey};

use crate::error::BackendError;

/// Spending authority granted to a session key, in USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendLimits {
    /// Total the key may spend over its lifetime.
    pub limit_usd: f64,
    /// Cap for a single transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_transaction_usd: Option<f64>,
    /// Requested lifetime; the backend picks its own default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_for_days: Option<u32>,
}

impl SpendLimits {
    #[must_use]
    pub const fn new(limit_usd: f64) -> Self {
        Self {
            limit_usd,
            per_transaction_usd: None,
            valid_for_days: None,
        }
    }
}

// ── create ─────────────────────────────────────────────────────────

/// Body of `POST /session-keys/create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionKeyRequest {
    #[serde(with = "encoding::base64_bytes")]
    pub encrypted_session_key: Vec<u8>,
    #[serde(with = "encoding::base64_array")]
    pub nonce: [u8; NONCE_LEN],
    pub session_public_key: SessionPublicKey,
    pub device_fingerprint: FingerprintHash,
    pub spend_limits: SpendLimits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_payload: Option<RecoveryPayload>,
}

impl CreateSessionKeyRequest {
    #[must_use]
    pub fn new(
        encrypted: &EncryptedSessionKey,
        spend_limits: SpendLimits,
        recovery_payload: Option<RecoveryPayload>,
    ) -> Self {
        Self {
            encrypted_session_key: encrypted.ciphertext().to_vec(),
            nonce: *encrypted.nonce(),
            session_public_key: *encrypted.public_key(),
            device_fingerprint: *encrypted.device_fingerprint(),
            spend_limits,
            recovery_payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionKeyResponse {
    pub session_key_id: String,
    pub expires_at: DateTime<Utc>,
}

// ── get-encrypted ──────────────────────────────────────────────────

/// Body of `POST /session-keys/{id}/get-encrypted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEncryptedRequest {
    pub device_fingerprint: FingerprintHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEncryptedResponse {
    #[serde(with = "encoding::base64_bytes")]
    pub encrypted_session_key: Vec<u8>,
    #[serde(with = "encoding::base64_array")]
    pub nonce: [u8; NONCE_LEN],
    /// Whether the fingerprint on file equals the one in the request.
    pub device_fingerprint_valid: bool,
}

impl GetEncryptedResponse {
    #[must_use]
    pub fn sealed(&self) -> SealedData {
        SealedData {
            nonce: self.nonce,
            ciphertext: self.encrypted_session_key.clone(),
        }
    }
}

// ── recover ────────────────────────────────────────────────────────

/// Body of `POST /session-keys/{id}/recover`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverSessionKeyRequest {
    pub recovery_payload: RecoveryPayload,
    pub new_device_fingerprint: FingerprintHash,
    #[serde(with = "encoding::base64_bytes")]
    pub new_encrypted_session_key: Vec<u8>,
    #[serde(with = "encoding::base64_array")]
    pub new_nonce: [u8; NONCE_LEN],
}

impl RecoverSessionKeyRequest {
    #[must_use]
    pub fn new(recovery_payload: RecoveryPayload, migrated: &EncryptedSessionKey) -> Self {
        Self {
            recovery_payload,
            new_device_fingerprint: *migrated.device_fingerprint(),
            new_encrypted_session_key: migrated.ciphertext().to_vec(),
            new_nonce: *migrated.nonce(),
        }
    }
}

// ── revoke / status ────────────────────────────────────────────────

/// Body of `POST /session-keys/revoke`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeSessionKeyRequest {
    pub session_key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Body of `POST /session-keys/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub session_key_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyStatus {
    pub is_active: bool,
    pub limit_usd: f64,
    pub used_usd: f64,
    pub expires_at: DateTime<Utc>,
}

impl SessionKeyStatus {
    /// Spend left before the limit is reached, never negative.
    #[must_use]
    pub fn remaining_usd(&self) -> f64 {
        (self.limit_usd - self.used_usd).max(0.0)
    }
}

// ── trait ──────────────────────────────────────────────────────────

/// Remote custody of encrypted session keys.
///
/// Implementations only ever see opaque ciphertext. `create` is not
/// idempotent: retrying it after a partial success can orphan a key id.
#[async_trait]
pub trait SessionKeyBackend: Send + Sync {
    /// Register a new encrypted session key.
    async fn create(
        &self,
        request: &CreateSessionKeyRequest,
    ) -> Result<CreateSessionKeyResponse, BackendError>;

    /// Fetch the encrypted key for `session_key_id` and check the fingerprint.
    async fn get_encrypted(
        &self,
        session_key_id: &str,
        request: &GetEncryptedRequest,
    ) -> Result<GetEncryptedResponse, BackendError>;

    /// Replace the stored blob with one sealed for a new device.
    async fn recover(
        &self,
        session_key_id: &str,
        request: &RecoverSessionKeyRequest,
    ) -> Result<(), BackendError>;

    async fn revoke(&self, request: &RevokeSessionKeyRequest) -> Result<(), BackendError>;

    async fn status(&self, request: &StatusRequest) -> Result<SessionKeyStatus, BackendError>;
}
