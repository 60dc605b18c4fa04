//! Ed25519 session keypairs.
//!
//! This module provides:
//! - [`SessionKeypair`]: a freshly generated or decrypted keypair in secure memory
//! - [`SessionPublicKey`]: the Base58-encoded public half (safe to share)
//! - [`SignedTransaction`]: opaque message bytes plus detached signature
//! - [`verify`]: check a signature against a public key
//!
//! # Plaintext layout
//!
//! The bytes that get encrypted are `seed (32) || public key (32)`, 64 bytes
//! in total. Loading them back checks that the public half really belongs
//! to the seed, so a blob decrypted under the right key but spliced with a
//! foreign public key is rejected.

use std::fmt;
use std::str::FromStr;

use ring::signature::{self, Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::encoding;
use crate::error::CryptoError;
use crate::memory::{SecretBuffer, SecretBytes};

/// Ed25519 seed (private key) length in bytes.
pub const SEED_LEN: usize = 32;

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Plaintext keypair length: seed followed by public key.
pub const KEYPAIR_LEN: usize = 64;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Public key
// ---------------------------------------------------------------------------

/// Ed25519 public key, displayed and serialized as Base58.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionPublicKey([u8; PUBLIC_KEY_LEN]);

impl SessionPublicKey {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_base58(&self) -> String {
        encoding::to_base58(&self.0)
    }
}

impl fmt::Display for SessionPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for SessionPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionPublicKey({})", self.to_base58())
    }
}

impl FromStr for SessionPublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = encoding::from_base58(s)?;
        let array = <[u8; PUBLIC_KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
            CryptoError::Validation(format!(
                "invalid public key length: {} bytes (expected {PUBLIC_KEY_LEN})",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl Serialize for SessionPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for SessionPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

/// Session keypair with its private half in [`SecretBuffer`].
///
/// Intentionally not `Serialize` and not `Clone`.
pub struct SessionKeypair {
    bytes: SecretBuffer,
    public: SessionPublicKey,
}

impl SessionKeypair {
    /// Generate a new keypair from a 32-byte `OsRng` seed held in locked memory.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::SecureMemory` if the CSPRNG fails, or
    /// `CryptoError::Signature` if ring rejects the seed.
    pub fn generate() -> Result<Self, CryptoError> {
        let seed = SecretBytes::<SEED_LEN>::random()?;
        let kp = Ed25519KeyPair::from_seed_unchecked(seed.expose())
            .map_err(|e| CryptoError::Signature(format!("Ed25519 key generation failed: {e}")))?;
        let mut public = [0u8; PUBLIC_KEY_LEN];
        public.copy_from_slice(kp.public_key().as_ref());

        let mut raw = Vec::with_capacity(KEYPAIR_LEN);
        raw.extend_from_slice(seed.expose());
        raw.extend_from_slice(&public);

        Ok(Self {
            bytes: SecretBuffer::from_vec(raw),
            public: SessionPublicKey(public),
        })
    }

    /// Rebuild a keypair from its 64-byte plaintext form.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyMaterial` if the length is wrong or the
    /// public half does not match the seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEYPAIR_LEN {
            return Err(CryptoError::InvalidKeyMaterial(format!(
                "invalid keypair length: {} bytes (expected {KEYPAIR_LEN})",
                bytes.len()
            )));
        }
        let (seed, public) = bytes.split_at(SEED_LEN);
        Ed25519KeyPair::from_seed_and_public_key(seed, public).map_err(|_| {
            CryptoError::InvalidKeyMaterial("public key does not match seed".into())
        })?;

        let mut pk = [0u8; PUBLIC_KEY_LEN];
        pk.copy_from_slice(public);
        Ok(Self {
            bytes: SecretBuffer::new(bytes)?,
            public: SessionPublicKey(pk),
        })
    }

    #[must_use]
    pub const fn public_key(&self) -> &SessionPublicKey {
        &self.public
    }

    /// The 64 plaintext bytes. Only for handing to the cipher.
    #[must_use]
    pub fn expose_secret_bytes(&self) -> &[u8] {
        self.bytes.expose()
    }

    /// Sign opaque message bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Signature` if the stored key material is rejected.
    pub fn sign(&self, message: &[u8]) -> Result<SignedTransaction, CryptoError> {
        let (seed, public) = self.bytes.expose().split_at(SEED_LEN);
        let kp = Ed25519KeyPair::from_seed_and_public_key(seed, public)
            .map_err(|e| CryptoError::Signature(format!("Ed25519 key rejected: {e}")))?;
        let sig = kp.sign(message);

        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(sig.as_ref());
        Ok(SignedTransaction {
            message: message.to_vec(),
            signature,
            signer: self.public,
        })
    }
}

impl fmt::Debug for SessionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKeypair({}, ***)", self.public)
    }
}

// ---------------------------------------------------------------------------
// Signed output
// ---------------------------------------------------------------------------

/// Message bytes and the detached Ed25519 signature over them.
#[must_use = "signed transactions must be submitted"]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    #[serde(with = "encoding::base64_bytes")]
    pub message: Vec<u8>,
    #[serde(with = "encoding::base64_array")]
    pub signature: [u8; SIGNATURE_LEN],
    pub signer: SessionPublicKey,
}

impl SignedTransaction {
    /// Wire form: `signature (64) || message`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SIGNATURE_LEN.saturating_add(self.message.len()));
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.message);
        out
    }

    /// Verify the signature against the embedded signer.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Signature` if verification fails.
    pub fn verify(&self) -> Result<(), CryptoError> {
        verify(&self.signer, &self.message, &self.signature)
    }
}

/// Verify an Ed25519 signature.
///
/// # Errors
///
/// Returns `CryptoError::Signature` if the signature does not verify.
pub fn verify(
    public_key: &SessionPublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    signature::UnparsedPublicKey::new(&signature::ED25519, public_key.as_bytes())
        .verify(message, signature)
        .map_err(|_| CryptoError::Signature("Ed25519 verification failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keypair_has_64_byte_plaintext() {
        let kp = SessionKeypair::generate().expect("generate should succeed");
        assert_eq!(kp.expose_secret_bytes().len(), KEYPAIR_LEN);
        assert_eq!(&kp.expose_secret_bytes()[SEED_LEN..], kp.public_key().as_bytes());
    }

    #[test]
    fn from_bytes_restores_same_public_key() {
        let kp = SessionKeypair::generate().expect("generate should succeed");
        let restored =
            SessionKeypair::from_bytes(kp.expose_secret_bytes()).expect("restore should succeed");
        assert_eq!(restored.public_key(), kp.public_key());
    }

    #[test]
    fn from_bytes_rejects_mismatched_public_half() {
        let a = SessionKeypair::generate().expect("generate should succeed");
        let b = SessionKeypair::generate().expect("generate should succeed");
        let mut spliced = a.expose_secret_bytes()[..SEED_LEN].to_vec();
        spliced.extend_from_slice(b.public_key().as_bytes());
        assert!(matches!(
            SessionKeypair::from_bytes(&spliced),
            Err(CryptoError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(matches!(
            SessionKeypair::from_bytes(&[0u8; 32]),
            Err(CryptoError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn sign_and_verify() {
        let kp = SessionKeypair::generate().expect("generate should succeed");
        let signed = kp.sign(b"pay 10 to alice").expect("sign should succeed");
        signed.verify().expect("signature should verify");
        assert_eq!(signed.to_bytes().len(), SIGNATURE_LEN + 15);
    }

    #[test]
    fn verify_rejects_other_message_and_other_key() {
        let kp = SessionKeypair::generate().expect("generate should succeed");
        let other = SessionKeypair::generate().expect("generate should succeed");
        let signed = kp.sign(b"message").expect("sign should succeed");
        assert!(verify(kp.public_key(), b"massage", &signed.signature).is_err());
        assert!(verify(other.public_key(), b"message", &signed.signature).is_err());
    }

    #[test]
    fn public_key_base58_roundtrip() {
        let kp = SessionKeypair::generate().expect("generate should succeed");
        let text = kp.public_key().to_string();
        let parsed: SessionPublicKey = text.parse().expect("parse should succeed");
        assert_eq!(&parsed, kp.public_key());
        let json = serde_json::to_string(kp.public_key()).expect("serialize should succeed");
        assert_eq!(json, format!("\"{text}\""));
    }

    #[test]
    fn debug_hides_private_half() {
        let kp = SessionKeypair::generate().expect("generate should succeed");
        let debug = format!("{kp:?}");
        assert!(debug.ends_with("***)"));
        assert!(debug.contains(&kp.public_key().to_base58()));
    }
}
