//! Transport encodings for binary fields in JSON.
//!
//! Ciphertext and nonces travel as standard padded base64, public keys as
//! Base58. Used through `#[serde(with = "...")]`.

use crate::error::CryptoError;
use data_encoding::BASE64;

/// Encode bytes as standard padded base64.
#[must_use]
pub fn to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode standard padded base64.
///
/// # Errors
///
/// Returns `CryptoError::Validation` if `text` is not valid base64.
pub fn from_base64(text: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(text.as_bytes())
        .map_err(|e| CryptoError::Validation(format!("invalid base64: {e}")))
}

/// Encode a public key as Base58.
#[must_use]
pub fn to_base58(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Decode a Base58 public key.
///
/// # Errors
///
/// Returns `CryptoError::Validation` if `text` is not valid Base58.
pub fn from_base58(text: &str) -> Result<Vec<u8>, CryptoError> {
    bs58::decode(text)
        .into_vec()
        .map_err(|e| CryptoError::Validation(format!("invalid base58: {e}")))
}

/// `serde(with)` adapter: `Vec<u8>` <-> base64 string.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::from_base64(&text).map_err(serde::de::Error::custom)
    }
}

/// `serde(with)` adapter: `[u8; N]` <-> base64 string, length checked.
pub mod base64_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = super::from_base64(&text).map_err(serde::de::Error::custom)?;
        <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
            serde::de::Error::custom(format!("expected {N} bytes, got {}", bytes.len()))
        })
    }
}
