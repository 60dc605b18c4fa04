//! `session-key-crypto`: device-bound session key cryptography.
//!
//! Pure and synchronous: zero network, zero async. Everything that touches
//! plaintext key material lives here; the backend-facing side only ever
//! receives an [`EncryptedSessionKey`] or a [`RecoveryPayload`].

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod encoding;
pub mod error;
pub mod memory;

pub mod fingerprint;
pub mod kdf;
pub mod symmetric;

pub mod keypair;

pub mod record;

pub mod recovery;

pub use error::CryptoError;
pub use fingerprint::{
    DeviceFingerprint, FingerprintCollector, FingerprintHash, FnSignal, SignalSource,
    StaticSignal, REQUIRED_SIGNALS, SENTINEL,
};
pub use kdf::{derive, Argon2idParams, KdfProfile, Pin};
pub use keypair::{verify, SessionKeypair, SessionPublicKey, SignedTransaction};
pub use memory::{SecretBuffer, SecretBytes};
pub use record::{EncryptedSessionKey, KeyFormatVersion};
pub use recovery::{re_encrypt_for_new_device, RecoveryPayload};
pub use symmetric::{decrypt, encrypt, SealedData};
