//! PIN-unlocked signing cache for one session key.
//!
//! Each [`SessionKeyCache`] owns exactly one encrypted record and at most one
//! decrypted keypair. There is no shared cache across session keys, and no
//! background timer: expiry is checked whenever the slot is touched.
//!
//! # Locking
//!
//! The slot mutex covers every read or write of the decrypted keypair and
//! the revoked flag. KDF work happens outside the lock; the resulting
//! keypair is only installed (and used) once the lock is re-taken and the
//! revoked flag re-checked.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use session_key_crypto::{
    CryptoError, EncryptedSessionKey, FingerprintHash, KdfProfile, Pin, SessionKeypair,
    SessionPublicKey, SignedTransaction,
};

use crate::error::SessionKeyError;

/// Credentials for an unlock performed as part of `sign`.
#[derive(Debug, Clone, Copy)]
pub struct Unlock<'a> {
    pub pin: &'a Pin,
    pub fingerprint: &'a FingerprintHash,
}

struct CacheEntry {
    keypair: SessionKeypair,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct CacheSlot {
    entry: Option<CacheEntry>,
    revoked: bool,
}

impl CacheSlot {
    /// Drop the entry if it has expired and return what is left.
    fn live_entry(&mut self, now: Instant) -> Option<&CacheEntry> {
        if self.entry.as_ref().is_some_and(|e| !e.is_valid(now)) {
            self.entry = None;
            tracing::debug!("session key cache entry expired");
        }
        self.entry.as_ref()
    }
}

/// Encrypted session key plus its time-bounded decrypted form.
pub struct SessionKeyCache {
    record: EncryptedSessionKey,
    profile: KdfProfile,
    default_ttl: Duration,
    disclose_mismatch: bool,
    slot: Mutex<CacheSlot>,
}

impl SessionKeyCache {
    #[must_use]
    pub fn new(
        record: EncryptedSessionKey,
        profile: KdfProfile,
        default_ttl: Duration,
        disclose_mismatch: bool,
    ) -> Self {
        Self {
            record,
            profile,
            default_ttl,
            disclose_mismatch,
            slot: Mutex::new(CacheSlot::default()),
        }
    }

    #[must_use]
    pub const fn record(&self) -> &EncryptedSessionKey {
        &self.record
    }

    #[must_use]
    pub const fn public_key(&self) -> &SessionPublicKey {
        self.record.public_key()
    }

    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// True only if a decrypted key is present and not yet expired.
    /// An expired entry is evicted by this call.
    pub fn is_cached(&self) -> bool {
        self.lock_for_clear().live_entry(Instant::now()).is_some()
    }

    /// Time left before the cached key expires, if any.
    pub fn expires_in(&self) -> Option<Duration> {
        let now = Instant::now();
        self.lock_for_clear()
            .live_entry(now)
            .map(|e| e.expires_at.saturating_duration_since(now))
    }

    /// Decrypt the record and cache the keypair for `ttl` (or the default).
    ///
    /// # Errors
    ///
    /// - `FingerprintMismatch` (or `Decryption` when mismatches are not
    ///   disclosed) if `fingerprint` differs from the record's; no KDF runs.
    /// - `Crypto(Decryption)` for a wrong PIN or tampered record.
    /// - `Revoked` if the key was revoked meanwhile.
    pub fn unlock(
        &self,
        pin: &Pin,
        fingerprint: &FingerprintHash,
        ttl: Option<Duration>,
    ) -> Result<(), SessionKeyError> {
        let keypair = self.decrypt(pin, fingerprint)?;
        self.store(keypair, ttl.unwrap_or(self.default_ttl))?;
        tracing::debug!(public_key = %self.record.public_key(), "session key unlocked");
        Ok(())
    }

    /// Cache a keypair that was decrypted elsewhere (load).
    ///
    /// # Errors
    ///
    /// `InvalidKeyMaterial` if it is not the record's keypair, `Revoked`
    /// after revocation.
    pub(crate) fn store(
        &self,
        keypair: SessionKeypair,
        ttl: Duration,
    ) -> Result<(), SessionKeyError> {
        if keypair.public_key() != self.record.public_key() {
            return Err(CryptoError::InvalidKeyMaterial(
                "keypair does not belong to this session key".into(),
            )
            .into());
        }
        let expires_at = expiry(Instant::now(), ttl)?;

        let mut slot = self.lock()?;
        if slot.revoked {
            return Err(SessionKeyError::Revoked);
        }
        slot.entry = Some(CacheEntry {
            keypair,
            expires_at,
        });
        Ok(())
    }

    /// Sign `message` with the cached key, unlocking first on a cache miss.
    ///
    /// # Errors
    ///
    /// `Revoked` regardless of cache state once revoked, `PinRequired` on a
    /// miss without `unlock`, and any [`unlock`](Self::unlock) error.
    pub fn sign(
        &self,
        message: &[u8],
        unlock: Option<Unlock<'_>>,
    ) -> Result<SignedTransaction, SessionKeyError> {
        {
            let mut slot = self.lock()?;
            if slot.revoked {
                return Err(SessionKeyError::Revoked);
            }
            if let Some(entry) = slot.live_entry(Instant::now()) {
                tracing::debug!("signing with cached session key");
                return Ok(entry.keypair.sign(message)?);
            }
        }

        let Some(Unlock { pin, fingerprint }) = unlock else {
            return Err(SessionKeyError::PinRequired);
        };
        let keypair = self.decrypt(pin, fingerprint)?;
        let expires_at = expiry(Instant::now(), self.default_ttl)?;

        let mut slot = self.lock()?;
        if slot.revoked {
            return Err(SessionKeyError::Revoked);
        }
        let signed = keypair.sign(message)?;
        slot.entry = Some(CacheEntry {
            keypair,
            expires_at,
        });
        Ok(signed)
    }

    /// Push the expiry of the cached key forward by `additional`.
    ///
    /// # Errors
    ///
    /// `NotCached` if nothing valid is cached, `Revoked` after revocation.
    pub fn extend(&self, additional: Duration) -> Result<(), SessionKeyError> {
        let mut slot = self.lock()?;
        if slot.revoked {
            return Err(SessionKeyError::Revoked);
        }
        if slot.live_entry(Instant::now()).is_none() {
            return Err(SessionKeyError::NotCached);
        }
        if let Some(entry) = slot.entry.as_mut() {
            entry.expires_at = expiry(entry.expires_at, additional)?;
        }
        Ok(())
    }

    /// Drop (and zeroize) the cached key. Always succeeds.
    pub fn clear(&self) {
        let mut slot = self.lock_for_clear();
        if slot.entry.take().is_some() {
            tracing::debug!("session key cache cleared");
        }
    }

    /// Clear the cache and refuse every later unlock or sign.
    pub fn revoke(&self) {
        let mut slot = self.lock_for_clear();
        slot.entry = None;
        slot.revoked = true;
    }

    pub fn is_revoked(&self) -> bool {
        self.lock_for_clear().revoked
    }

    fn decrypt(
        &self,
        pin: &Pin,
        fingerprint: &FingerprintHash,
    ) -> Result<SessionKeypair, SessionKeyError> {
        if fingerprint != self.record.device_fingerprint() {
            tracing::warn!("device fingerprint differs from the session key's binding");
            return Err(if self.disclose_mismatch {
                SessionKeyError::FingerprintMismatch
            } else {
                CryptoError::Decryption.into()
            });
        }
        Ok(self.record.open(pin, fingerprint, &self.profile)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheSlot>, SessionKeyError> {
        self.slot
            .lock()
            .map_err(|_| SessionKeyError::Task("session key cache lock poisoned".into()))
    }

    // Clearing and revocation must go through even after a panic elsewhere.
    fn lock_for_clear(&self) -> MutexGuard<'_, CacheSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SessionKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyCache")
            .field("public_key", self.record.public_key())
            .field("profile", &self.profile.name())
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

fn expiry(from: Instant, ttl: Duration) -> Result<Instant, SessionKeyError> {
    from.checked_add(ttl).ok_or_else(|| {
        CryptoError::Validation(format!("cache TTL out of range: {}s", ttl.as_secs())).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_key_crypto::kdf::Argon2idParams;

    const TEST_PROFILE: KdfProfile = KdfProfile::Argon2id(Argon2idParams {
        m_cost: 32,
        t_cost: 1,
        p_cost: 1,
    });
    const FP: FingerprintHash = FingerprintHash::from_bytes([0x11; 32]);
    const OTHER_FP: FingerprintHash = FingerprintHash::from_bytes([0x22; 32]);

    fn pin(s: &str) -> Pin {
        Pin::parse(s).unwrap()
    }

    fn cache_with(disclose: bool) -> SessionKeyCache {
        let kp = SessionKeypair::generate().unwrap();
        let record = EncryptedSessionKey::seal(&kp, &pin("123456"), &FP, &TEST_PROFILE).unwrap();
        SessionKeyCache::new(record, TEST_PROFILE, Duration::from_secs(60), disclose)
    }

    fn cache() -> SessionKeyCache {
        cache_with(true)
    }

    #[test]
    fn starts_empty() {
        let c = cache();
        assert!(!c.is_cached());
        assert!(c.expires_in().is_none());
    }

    #[test]
    fn unlock_populates_cache() {
        let c = cache();
        c.unlock(&pin("123456"), &FP, None).unwrap();
        assert!(c.is_cached());
        let left = c.expires_in().unwrap();
        assert!(left <= Duration::from_secs(60) && left > Duration::from_secs(50));
    }

    #[test]
    fn unlock_with_wrong_pin_is_generic_decryption_failure() {
        let c = cache();
        let err = c.unlock(&pin("000000"), &FP, None).unwrap_err();
        assert!(err.is_decryption());
        assert!(!c.is_cached());
    }

    #[test]
    fn fingerprint_mismatch_is_disclosed_when_configured() {
        let c = cache_with(true);
        assert!(matches!(
            c.unlock(&pin("123456"), &OTHER_FP, None),
            Err(SessionKeyError::FingerprintMismatch)
        ));
    }

    #[test]
    fn fingerprint_mismatch_is_hidden_when_configured() {
        let c = cache_with(false);
        let err = c.unlock(&pin("123456"), &OTHER_FP, None).unwrap_err();
        assert!(err.is_decryption());
    }

    #[test]
    fn ttl_expiry_evicts_lazily() {
        let c = cache();
        c.unlock(&pin("123456"), &FP, Some(Duration::from_millis(100)))
            .unwrap();
        assert!(c.is_cached());
        std::thread::sleep(Duration::from_millis(150));
        assert!(!c.is_cached());
        assert!(matches!(
            c.sign(b"late", None),
            Err(SessionKeyError::PinRequired)
        ));
    }

    #[test]
    fn sign_without_cache_or_pin_requires_pin() {
        let c = cache();
        assert!(matches!(
            c.sign(b"payload", None),
            Err(SessionKeyError::PinRequired)
        ));
    }

    #[test]
    fn sign_with_pin_populates_cache_then_signs_without() {
        let c = cache();
        let p = pin("123456");
        let first = c
            .sign(
                b"0123456789",
                Some(Unlock {
                    pin: &p,
                    fingerprint: &FP,
                }),
            )
            .unwrap();
        assert!(c.is_cached());
        let second = c.sign(b"abcdefghij", None).unwrap();

        first.verify().unwrap();
        second.verify().unwrap();
        assert_eq!(first.signer, second.signer);
        assert_eq!(&first.signer, c.public_key());
        assert_ne!(first.signature, second.signature);
    }

    #[test]
    fn extend_requires_cached_key() {
        let c = cache();
        assert!(matches!(
            c.extend(Duration::from_secs(10)),
            Err(SessionKeyError::NotCached)
        ));
        c.unlock(&pin("123456"), &FP, Some(Duration::from_secs(5)))
            .unwrap();
        c.extend(Duration::from_secs(100)).unwrap();
        assert!(c.expires_in().unwrap() > Duration::from_secs(100));
    }

    #[test]
    fn clear_is_idempotent() {
        let c = cache();
        c.unlock(&pin("123456"), &FP, None).unwrap();
        c.clear();
        c.clear();
        assert!(!c.is_cached());
    }

    #[test]
    fn revoke_beats_cache() {
        let c = cache();
        c.unlock(&pin("123456"), &FP, None).unwrap();
        c.revoke();
        assert!(c.is_revoked());
        assert!(!c.is_cached());
        assert!(matches!(
            c.sign(b"payload", None),
            Err(SessionKeyError::Revoked)
        ));
        assert!(matches!(
            c.unlock(&pin("123456"), &FP, None),
            Err(SessionKeyError::Revoked)
        ));
        assert!(matches!(
            c.extend(Duration::from_secs(1)),
            Err(SessionKeyError::Revoked)
        ));
    }

    #[test]
    fn huge_ttl_is_rejected_not_panicking() {
        let c = cache();
        let err = c
            .unlock(&pin("123456"), &FP, Some(Duration::MAX))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn debug_hides_key_material() {
        let c = cache();
        c.unlock(&pin("123456"), &FP, None).unwrap();
        let text = format!("{c:?}");
        assert!(text.contains("SessionKeyCache"));
        assert!(!text.contains("keypair"));
    }
}
