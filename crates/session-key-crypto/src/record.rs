//! The encrypted session key record.
//!
//! [`EncryptedSessionKey`] is the encryption boundary: the device side sees
//! the plaintext keypair, the backend and the network only ever see this
//! record. It is built once per session key and replaced wholesale on
//! recovery, never edited.

use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::error::CryptoError;
use crate::fingerprint::FingerprintHash;
use crate::kdf::{self, KdfProfile, Pin};
use crate::keypair::{SessionKeypair, SessionPublicKey, KEYPAIR_LEN};
use crate::symmetric::{self, SealedData, NONCE_LEN, TAG_LEN};

/// Expected ciphertext length: 64-byte keypair plus the GCM tag.
pub const CIPHERTEXT_LEN: usize = 80;

/// Record format version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyFormatVersion {
    /// Ed25519 `seed || public` under AES-256-GCM, key from PIN + fingerprint salt.
    #[default]
    #[serde(rename = "v1")]
    V1,
}

impl KeyFormatVersion {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
        }
    }

    /// # Errors
    ///
    /// Returns `CryptoError::Validation` for unknown versions.
    pub fn parse(value: &str) -> Result<Self, CryptoError> {
        match value {
            "v1" | "1" => Ok(Self::V1),
            other => Err(CryptoError::Validation(format!(
                "unsupported key format version: {other}"
            ))),
        }
    }
}

/// Opaque, device-bound encrypted session key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSessionKey {
    #[serde(with = "encoding::base64_bytes")]
    ciphertext: Vec<u8>,
    #[serde(with = "encoding::base64_array")]
    nonce: [u8; NONCE_LEN],
    public_key: SessionPublicKey,
    device_fingerprint: FingerprintHash,
    #[serde(default)]
    version: KeyFormatVersion,
}

impl EncryptedSessionKey {
    /// Assemble a record from an already sealed keypair.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Validation` if the ciphertext is not exactly
    /// keypair length plus tag.
    pub fn assemble(
        sealed: SealedData,
        public_key: SessionPublicKey,
        device_fingerprint: FingerprintHash,
    ) -> Result<Self, CryptoError> {
        check_ciphertext_len(sealed.ciphertext.len())?;
        Ok(Self {
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            public_key,
            device_fingerprint,
            version: KeyFormatVersion::V1,
        })
    }

    /// Encrypt `keypair` under `derive(pin, fingerprint)` with a fresh nonce.
    ///
    /// # Errors
    ///
    /// Propagates KDF and cipher failures.
    pub fn seal(
        keypair: &SessionKeypair,
        pin: &Pin,
        fingerprint: &FingerprintHash,
        profile: &KdfProfile,
    ) -> Result<Self, CryptoError> {
        let key = kdf::derive(pin, fingerprint, profile)?;
        let sealed = symmetric::encrypt(keypair.expose_secret_bytes(), key.expose())?;
        Self::assemble(sealed, *keypair.public_key(), *fingerprint)
    }

    /// Derive the key for `(pin, fingerprint)` and decrypt the keypair.
    ///
    /// Does not compare `fingerprint` with the stored one; callers that want
    /// a fast mismatch check do it before paying for the KDF.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Decryption` on any authentication failure and
    /// `CryptoError::InvalidKeyMaterial` if the decrypted keypair does not
    /// belong to the recorded public key.
    pub fn open(
        &self,
        pin: &Pin,
        fingerprint: &FingerprintHash,
        profile: &KdfProfile,
    ) -> Result<SessionKeypair, CryptoError> {
        let key = kdf::derive(pin, fingerprint, profile)?;
        let plaintext = symmetric::decrypt(&self.sealed(), key.expose())?;
        let keypair = SessionKeypair::from_bytes(plaintext.expose())?;
        if keypair.public_key() != &self.public_key {
            return Err(CryptoError::InvalidKeyMaterial(
                "decrypted keypair does not match recorded public key".into(),
            ));
        }
        Ok(keypair)
    }

    #[must_use]
    pub fn sealed(&self) -> SealedData {
        SealedData {
            nonce: self.nonce,
            ciphertext: self.ciphertext.clone(),
        }
    }

    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    #[must_use]
    pub const fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    #[must_use]
    pub const fn public_key(&self) -> &SessionPublicKey {
        &self.public_key
    }

    #[must_use]
    pub const fn device_fingerprint(&self) -> &FingerprintHash {
        &self.device_fingerprint
    }

    #[must_use]
    pub const fn version(&self) -> KeyFormatVersion {
        self.version
    }

    /// Base64 ciphertext, as sent in `encryptedSessionKey` fields.
    #[must_use]
    pub fn ciphertext_base64(&self) -> String {
        encoding::to_base64(&self.ciphertext)
    }

    /// Base64 nonce, as sent in `nonce` fields.
    #[must_use]
    pub fn nonce_base64(&self) -> String {
        encoding::to_base64(&self.nonce)
    }
}

fn check_ciphertext_len(len: usize) -> Result<(), CryptoError> {
    if len == CIPHERTEXT_LEN {
        Ok(())
    } else {
        Err(CryptoError::Validation(format!(
            "invalid ciphertext length: {len} bytes (expected {KEYPAIR_LEN} + {TAG_LEN})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::Argon2idParams;

    const TEST_PROFILE: KdfProfile = KdfProfile::Argon2id(Argon2idParams {
        m_cost: 32,
        t_cost: 1,
        p_cost: 1,
    });

    const FP: FingerprintHash = FingerprintHash::from_bytes([0x5A; 32]);

    fn pin(s: &str) -> Pin {
        Pin::parse(s).expect("valid pin")
    }

    #[test]
    fn ciphertext_len_constant_matches_layout() {
        assert_eq!(CIPHERTEXT_LEN, KEYPAIR_LEN + TAG_LEN);
    }

    #[test]
    fn seal_then_open_recovers_keypair() {
        let kp = SessionKeypair::generate().expect("generate should succeed");
        let record =
            EncryptedSessionKey::seal(&kp, &pin("123456"), &FP, &TEST_PROFILE).expect("seal");
        assert_eq!(record.ciphertext().len(), CIPHERTEXT_LEN);
        assert_eq!(record.public_key(), kp.public_key());
        assert_eq!(record.device_fingerprint(), &FP);
        assert_eq!(record.version(), KeyFormatVersion::V1);

        let opened = record
            .open(&pin("123456"), &FP, &TEST_PROFILE)
            .expect("open should succeed");
        assert_eq!(opened.expose_secret_bytes(), kp.expose_secret_bytes());
    }

    #[test]
    fn open_with_wrong_pin_fails_closed() {
        let kp = SessionKeypair::generate().expect("generate should succeed");
        let record =
            EncryptedSessionKey::seal(&kp, &pin("111111"), &FP, &TEST_PROFILE).expect("seal");
        let err = record
            .open(&pin("000000"), &FP, &TEST_PROFILE)
            .expect_err("wrong pin must fail");
        assert!(matches!(err, CryptoError::Decryption));
    }

    #[test]
    fn assemble_rejects_wrong_ciphertext_length() {
        let kp = SessionKeypair::generate().expect("generate should succeed");
        let sealed = SealedData {
            nonce: [0u8; NONCE_LEN],
            ciphertext: vec![0u8; 10],
        };
        assert!(matches!(
            EncryptedSessionKey::assemble(sealed, *kp.public_key(), FP),
            Err(CryptoError::Validation(_))
        ));
    }

    #[test]
    fn json_shape_uses_transport_encodings() {
        let kp = SessionKeypair::generate().expect("generate should succeed");
        let record =
            EncryptedSessionKey::seal(&kp, &pin("123456"), &FP, &TEST_PROFILE).expect("seal");
        let json = serde_json::to_value(&record).expect("serialize should succeed");
        assert_eq!(json["ciphertext"], record.ciphertext_base64());
        assert_eq!(json["nonce"], record.nonce_base64());
        assert_eq!(json["publicKey"], kp.public_key().to_base58());
        assert_eq!(json["deviceFingerprint"], FP.to_hex());
        assert_eq!(json["version"], "v1");

        let back: EncryptedSessionKey =
            serde_json::from_value(json).expect("deserialize should succeed");
        assert_eq!(back, record);
    }

    #[test]
    fn version_parse_accepts_known_tags() {
        assert_eq!(KeyFormatVersion::parse("v1").expect("v1"), KeyFormatVersion::V1);
        assert_eq!(KeyFormatVersion::parse("1").expect("1"), KeyFormatVersion::V1);
        assert!(KeyFormatVersion::parse("v9").is_err());
    }
}
