//! AES-256-GCM authenticated encryption of session keypairs.
//!
//! This module provides:
//! - [`encrypt`]: encrypt plaintext under a fresh random nonce, returning [`SealedData`]
//! - [`decrypt`]: authenticate and decrypt [`SealedData`], returning [`SecretBuffer`]
//!
//! Every failure to open a sealed box is reported as the single
//! [`CryptoError::Decryption`] variant. Callers cannot tell a wrong PIN from a
//! wrong fingerprint or a flipped ciphertext bit.

use crate::error::CryptoError;
use crate::memory::SecretBuffer;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead;
use zeroize::Zeroize;

/// AES-256-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// AES-256-GCM key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Ciphertext and the nonce it was sealed under.
///
/// `ciphertext` is `encrypted bytes || tag`, so its length is always the
/// plaintext length plus [`TAG_LEN`].
#[must_use = "encrypted data must be stored or transmitted"]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedData {
    /// 96-bit random nonce, unique per encryption.
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the 16-byte GCM tag appended.
    pub ciphertext: Vec<u8>,
}

impl SealedData {
    /// Length of the plaintext this box decrypts to.
    #[must_use]
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_LEN)
    }
}

fn aead_key(key: &[u8]) -> Result<aead::LessSafeKey, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::Encryption(format!(
            "invalid key length: {} bytes (expected {KEY_LEN})",
            key.len()
        )));
    }
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| CryptoError::Encryption("failed to create AES-256-GCM key".into()))?;
    Ok(aead::LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` with AES-256-GCM under a fresh 96-bit nonce from `OsRng`.
///
/// The nonce never depends on the PIN or fingerprint.
///
/// # Errors
///
/// Returns `CryptoError::Encryption` if the key is not exactly 32 bytes or
/// sealing fails.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<SealedData, CryptoError> {
    let sealing_key = aead_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| CryptoError::Encryption(format!("nonce generation failed: {e}")))?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    if sealing_key
        .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .is_err()
    {
        in_out.zeroize();
        return Err(CryptoError::Encryption(
            "AES-256-GCM encryption failed".into(),
        ));
    }

    Ok(SealedData {
        nonce: nonce_bytes,
        ciphertext: in_out,
    })
}

/// Decrypt and authenticate a [`SealedData`].
///
/// # Errors
///
/// Returns `CryptoError::Encryption` if the key is not exactly 32 bytes.
/// Returns `CryptoError::Decryption` for any authentication failure,
/// including ciphertext shorter than a tag.
pub fn decrypt(sealed: &SealedData, key: &[u8]) -> Result<SecretBuffer, CryptoError> {
    let opening_key = aead_key(key)?;
    if sealed.ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption);
    }

    let nonce = aead::Nonce::assume_unique_for_key(sealed.nonce);
    let mut in_out = sealed.ciphertext.clone();

    let opened = opening_key
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map(|plaintext| plaintext.len());

    let result = match opened {
        Ok(len) => SecretBuffer::new(&in_out[..len]),
        Err(_) => Err(CryptoError::Decryption),
    };
    in_out.zeroize();
    result
}
