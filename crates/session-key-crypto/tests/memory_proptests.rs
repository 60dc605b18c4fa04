#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Property-based tests for secret-holding types.

use proptest::prelude::*;
use session_key_crypto::memory::{SecretBuffer, SecretBytes};
use session_key_crypto::{Pin, SessionKeypair};

proptest! {
    /// SecretBuffer keeps its bytes and length.
    #[test]
    fn secret_buffer_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..1024)) {
        let buf = SecretBuffer::new(&data).unwrap();
        prop_assert_eq!(buf.expose(), data.as_slice());
        prop_assert_eq!(buf.len(), data.len());
        prop_assert_eq!(buf.is_empty(), data.is_empty());
    }

    /// Debug and Display are always the masked string.
    #[test]
    fn secret_buffer_never_prints_contents(data in proptest::collection::vec(any::<u8>(), 1..256)) {
        let buf = SecretBuffer::new(&data).unwrap();
        prop_assert_eq!(format!("{buf:?}"), "SecretBuffer(***)");
        prop_assert_eq!(format!("{buf}"), "SecretBuffer(***)");
    }

    /// A PIN's digits never show up in its Debug output.
    #[test]
    fn pin_debug_is_masked(digits in "[0-9]{6}") {
        let pin = Pin::parse(&digits).unwrap();
        let debug = format!("{pin:?}");
        prop_assert!(!debug.contains(&digits));
    }
}

#[test]
fn secret_bytes_random_lengths() {
    assert_eq!(SecretBytes::<6>::random().unwrap().expose().len(), 6);
    assert_eq!(SecretBytes::<32>::random().unwrap().expose().len(), 32);
}

#[test]
fn keypair_debug_shows_only_public_half() {
    let kp = SessionKeypair::generate().unwrap();
    let debug = format!("{kp:?}");
    assert!(debug.contains(&kp.public_key().to_base58()));
    assert!(debug.ends_with("***)"));
}
