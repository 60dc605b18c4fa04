#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Property-based tests for the AES-256-GCM wrapper.

use proptest::prelude::*;
use session_key_crypto::symmetric::{decrypt, encrypt, SealedData, KEY_LEN, TAG_LEN};
use session_key_crypto::CryptoError;

const PROP_KEY: [u8; KEY_LEN] = [0xCC; KEY_LEN];
const OTHER_KEY: [u8; KEY_LEN] = [0x33; KEY_LEN];

proptest! {
    /// encrypt → decrypt recovers the plaintext; ciphertext grows by the tag.
    #[test]
    fn encrypt_decrypt_roundtrip(
        plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let sealed = encrypt(&plaintext, &PROP_KEY).unwrap();
        prop_assert_eq!(sealed.ciphertext.len(), plaintext.len() + TAG_LEN);
        prop_assert_eq!(sealed.plaintext_len(), plaintext.len());
        let decrypted = decrypt(&sealed, &PROP_KEY).unwrap();
        prop_assert_eq!(decrypted.expose(), plaintext.as_slice());
    }

    /// Any single flipped bit in the ciphertext or nonce fails closed.
    #[test]
    fn bit_flip_fails_closed(
        plaintext in proptest::collection::vec(any::<u8>(), 1..256),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
        in_nonce in any::<bool>(),
    ) {
        let mut sealed = encrypt(&plaintext, &PROP_KEY).unwrap();
        if in_nonce {
            let i = position.index(sealed.nonce.len());
            sealed.nonce[i] ^= 1 << bit;
        } else {
            let i = position.index(sealed.ciphertext.len());
            sealed.ciphertext[i] ^= 1 << bit;
        }
        prop_assert!(matches!(decrypt(&sealed, &PROP_KEY), Err(CryptoError::Decryption)));
    }

    /// Wrong key yields the same generic error as tampering.
    #[test]
    fn wrong_key_fails_closed(
        plaintext in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let sealed = encrypt(&plaintext, &PROP_KEY).unwrap();
        prop_assert!(matches!(decrypt(&sealed, &OTHER_KEY), Err(CryptoError::Decryption)));
    }

    /// Inputs shorter than a tag are rejected, not panicked on.
    #[test]
    fn truncated_ciphertext_fails_closed(
        nonce in any::<[u8; 12]>(),
        short in proptest::collection::vec(any::<u8>(), 0..TAG_LEN),
    ) {
        let sealed = SealedData { nonce, ciphertext: short };
        prop_assert!(matches!(decrypt(&sealed, &PROP_KEY), Err(CryptoError::Decryption)));
    }
}
