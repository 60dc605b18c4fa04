//! PIN + device fingerprint key derivation.
//!
//! This module provides:
//! - [`Pin`]: a validated 6-digit PIN held in zeroizing memory
//! - [`KdfProfile`]: Argon2id (memory-hard) or the PBKDF2-HMAC-SHA256 fallback
//! - [`derive`]: turn `(pin, fingerprint)` into a 256-bit AES key
//!
//! The fingerprint digest is the salt, so the same PIN yields unrelated keys
//! on different devices. A 6-digit PIN carries roughly 20 bits of entropy;
//! the work factor of the profile is what stands between a leaked blob and
//! an offline search.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::fingerprint::FingerprintHash;
use crate::memory::{SecretBuffer, SecretBytes};

/// Output length of the KDF in bytes (256 bits).
pub const OUTPUT_LEN: usize = 32;

/// Number of digits in a session key PIN.
pub const PIN_LEN: usize = 6;

/// 64 MiB in KiB, the baseline Argon2id memory.
const MEMORY_64MB: u32 = 65_536;

/// Baseline Argon2id iterations.
const MIN_ARGON2_T_COST: u32 = 3;

/// Baseline Argon2id lanes.
const MIN_ARGON2_P_COST: u32 = 4;

/// Baseline PBKDF2-HMAC-SHA256 iteration count.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

// ---------------------------------------------------------------------------
// Pin
// ---------------------------------------------------------------------------

/// A 6-digit numeric PIN. Never printed, zeroized on drop.
pub struct Pin(SecretBytes<PIN_LEN>);

impl Pin {
    /// Parse a PIN. Exactly six ASCII digits; nothing is trimmed or coerced.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Validation` for any other input.
    pub fn parse(input: &str) -> Result<Self, CryptoError> {
        let bytes = input.as_bytes();
        if bytes.len() != PIN_LEN || !bytes.iter().all(u8::is_ascii_digit) {
            return Err(CryptoError::Validation(
                "PIN must be exactly 6 digits".into(),
            ));
        }
        let mut digits = [0u8; PIN_LEN];
        digits.copy_from_slice(bytes);
        let pin = Self(SecretBytes::new(digits));
        digits.zeroize();
        Ok(pin)
    }

    pub(crate) const fn expose(&self) -> &[u8; PIN_LEN] {
        self.0.expose()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(***)")
    }
}

impl std::str::FromStr for Pin {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Argon2id parameter set.
///
/// Fields use the `argon2` crate convention:
/// - `m_cost`: memory in KiB
/// - `t_cost`: number of iterations
/// - `p_cost`: degree of parallelism
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2idParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

/// Which KDF turns a PIN into a key.
///
/// The PBKDF2 variant exists for hosts without a usable memory-hard
/// primitive. It is never selected implicitly; choosing it is a
/// configuration decision and is logged when a manager starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "camelCase")]
pub enum KdfProfile {
    /// Memory-hard Argon2id (v1.3).
    Argon2id(Argon2idParams),
    /// Iterated PBKDF2-HMAC-SHA256. Lower security margin.
    Pbkdf2Sha256 { iterations: u32 },
}

impl KdfProfile {
    /// Argon2id, 64 MiB, 3 iterations, 4 lanes.
    #[must_use]
    pub const fn recommended() -> Self {
        Self::Argon2id(Argon2idParams {
            m_cost: MEMORY_64MB,
            t_cost: MIN_ARGON2_T_COST,
            p_cost: MIN_ARGON2_P_COST,
        })
    }

    /// PBKDF2-HMAC-SHA256 with 100 000 iterations.
    #[must_use]
    pub const fn pbkdf2_fallback() -> Self {
        Self::Pbkdf2Sha256 {
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }

    #[must_use]
    pub const fn is_memory_hard(&self) -> bool {
        matches!(self, Self::Argon2id(_))
    }

    /// Whether the work factor reaches the minimum for its algorithm.
    #[must_use]
    pub const fn meets_baseline(&self) -> bool {
        match self {
            Self::Argon2id(p) => {
                p.m_cost >= MEMORY_64MB
                    && p.t_cost >= MIN_ARGON2_T_COST
                    && p.p_cost >= MIN_ARGON2_P_COST
            }
            Self::Pbkdf2Sha256 { iterations } => *iterations >= MIN_PBKDF2_ITERATIONS,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Argon2id(_) => "argon2id",
            Self::Pbkdf2Sha256 { .. } => "pbkdf2-sha256",
        }
    }
}

impl Default for KdfProfile {
    fn default() -> Self {
        Self::recommended()
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Derive the 256-bit symmetric key for `(pin, fingerprint)`.
///
/// Deterministic: the same PIN, fingerprint and profile always produce the
/// same key. The intermediate stack buffer is zeroized.
///
/// # Errors
///
/// Returns `CryptoError::KeyDerivation` if the profile parameters are
/// rejected by the underlying primitive or the derivation itself fails.
pub fn derive(
    pin: &Pin,
    fingerprint: &FingerprintHash,
    profile: &KdfProfile,
) -> Result<SecretBuffer, CryptoError> {
    let salt = fingerprint.as_bytes();
    let mut output = [0u8; OUTPUT_LEN];

    match profile {
        KdfProfile::Argon2id(params) => {
            let argon2_params =
                argon2::Params::new(params.m_cost, params.t_cost, params.p_cost, Some(OUTPUT_LEN))
                    .map_err(|e| CryptoError::KeyDerivation(format!("invalid argon2 params: {e}")))?;
            let argon2 = argon2::Argon2::new(
                argon2::Algorithm::Argon2id,
                argon2::Version::V0x13,
                argon2_params,
            );
            if let Err(e) = argon2.hash_password_into(pin.expose(), salt, &mut output) {
                output.zeroize();
                return Err(CryptoError::KeyDerivation(format!(
                    "argon2id derivation failed: {e}"
                )));
            }
        }
        KdfProfile::Pbkdf2Sha256 { iterations } => {
            if *iterations == 0 {
                return Err(CryptoError::KeyDerivation(
                    "pbkdf2 iterations must be non-zero".into(),
                ));
            }
            pbkdf2::pbkdf2_hmac::<Sha256>(pin.expose(), salt, *iterations, &mut output);
        }
    }

    let key = SecretBuffer::new(&output);
    output.zeroize();
    key
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Small params for fast tests: 32 KiB, 1 iteration, 1 lane.
    const TEST_PROFILE: KdfProfile = KdfProfile::Argon2id(Argon2idParams {
        m_cost: 32,
        t_cost: 1,
        p_cost: 1,
    });

    const FP_A: FingerprintHash = FingerprintHash::from_bytes([0x11; 32]);
    const FP_B: FingerprintHash = FingerprintHash::from_bytes([0x22; 32]);

    fn pin(s: &str) -> Pin {
        Pin::parse(s).expect("valid pin")
    }

    #[test]
    fn pin_accepts_six_digits() {
        for s in ["000000", "123456", "999999"] {
            assert!(Pin::parse(s).is_ok(), "{s} should parse");
        }
    }

    #[test]
    fn pin_rejects_malformed_input() {
        for s in ["", "12345", "1234567", "12a456", " 123456", "123456 ", "١٢٣٤٥٦", "12.456"] {
            assert!(
                matches!(Pin::parse(s), Err(CryptoError::Validation(_))),
                "{s:?} should be rejected"
            );
        }
    }

    #[test]
    fn pin_debug_is_masked() {
        let p = pin("424242");
        assert_eq!(format!("{p:?}"), "Pin(***)");
    }

    #[test]
    fn derive_produces_32_byte_output() {
        let key = derive(&pin("123456"), &FP_A, &TEST_PROFILE).expect("derive should succeed");
        assert_eq!(key.len(), OUTPUT_LEN);
    }

    #[test]
    fn derive_is_deterministic() {
        let a = derive(&pin("123456"), &FP_A, &TEST_PROFILE).expect("derive should succeed");
        let b = derive(&pin("123456"), &FP_A, &TEST_PROFILE).expect("derive should succeed");
        assert_eq!(a.expose(), b.expose());
    }

    #[test]
    fn different_fingerprints_produce_different_keys() {
        let a = derive(&pin("123456"), &FP_A, &TEST_PROFILE).expect("derive should succeed");
        let b = derive(&pin("123456"), &FP_B, &TEST_PROFILE).expect("derive should succeed");
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn different_pins_produce_different_keys() {
        let a = derive(&pin("123456"), &FP_A, &TEST_PROFILE).expect("derive should succeed");
        let b = derive(&pin("123457"), &FP_A, &TEST_PROFILE).expect("derive should succeed");
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn pbkdf2_profile_is_deterministic_and_distinct_from_argon2() {
        let profile = KdfProfile::Pbkdf2Sha256 { iterations: 1_000 };
        let a = derive(&pin("123456"), &FP_A, &profile).expect("derive should succeed");
        let b = derive(&pin("123456"), &FP_A, &profile).expect("derive should succeed");
        let c = derive(&pin("123456"), &FP_A, &TEST_PROFILE).expect("derive should succeed");
        assert_eq!(a.expose(), b.expose());
        assert_ne!(a.expose(), c.expose());
    }

    #[test]
    fn pbkdf2_rejects_zero_iterations() {
        let profile = KdfProfile::Pbkdf2Sha256 { iterations: 0 };
        assert!(matches!(
            derive(&pin("123456"), &FP_A, &profile),
            Err(CryptoError::KeyDerivation(_))
        ));
    }

    #[test]
    fn invalid_argon2_params_are_rejected() {
        let profile = KdfProfile::Argon2id(Argon2idParams {
            m_cost: 1,
            t_cost: 0,
            p_cost: 0,
        });
        let err = derive(&pin("123456"), &FP_A, &profile).expect_err("should fail");
        assert!(format!("{err}").contains("invalid argon2 params"));
    }

    #[test]
    fn recommended_profile_meets_baseline() {
        let p = KdfProfile::recommended();
        assert!(p.meets_baseline());
        assert!(p.is_memory_hard());
        assert_eq!(
            p,
            KdfProfile::Argon2id(Argon2idParams {
                m_cost: 65_536,
                t_cost: 3,
                p_cost: 4,
            })
        );
    }

    #[test]
    fn fallback_profile_is_flagged() {
        let p = KdfProfile::pbkdf2_fallback();
        assert!(p.meets_baseline());
        assert!(!p.is_memory_hard());
        assert!(!TEST_PROFILE.meets_baseline());
        assert!(!KdfProfile::Pbkdf2Sha256 { iterations: 10 }.meets_baseline());
    }

    #[test]
    fn kdf_profile_serde_is_tagged() {
        let json = serde_json::to_string(&KdfProfile::pbkdf2_fallback())
            .expect("serialize should succeed");
        assert_eq!(json, r#"{"algorithm":"pbkdf2Sha256","iterations":100000}"#);
        let back: KdfProfile = serde_json::from_str(
            r#"{"algorithm":"argon2id","m_cost":65536,"t_cost":3,"p_cost":4}"#,
        )
        .expect("deserialize should succeed");
        assert_eq!(back, KdfProfile::recommended());
    }
}
