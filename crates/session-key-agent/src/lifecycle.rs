//! Session key lifecycle: create, load, sign, recover, revoke.
//!
//! [`SessionKeyManager`] drives one session key through
//! `Uninitialized → Active → Revoked`. It owns the only decrypted copy of
//! the keypair (inside a [`SessionKeyCache`]) and talks to the backend
//! exclusively with encrypted records:
//!
//! - create: generate keypair → fingerprint → derive + seal → register
//! - load: fetch record → device check → derive + open → cache
//! - recover: open under old credentials → seal under new → re-register
//! - revoke: refuse locally first, then tell the backend
//!
//! KDF and cipher work runs on the blocking pool so a slow derivation for
//! one key never stalls the async runtime.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_key_crypto::{
    derive, recovery, symmetric, EncryptedSessionKey, FingerprintCollector, FingerprintHash,
    KdfProfile, Pin, RecoveryPayload, SessionKeypair, SessionPublicKey, SignedTransaction,
};

use crate::backend::{
    CreateSessionKeyRequest, GetEncryptedRequest, RecoverSessionKeyRequest,
    RevokeSessionKeyRequest, SessionKeyBackend, SessionKeyStatus, SpendLimits, StatusRequest,
};
use crate::cache::{SessionKeyCache, Unlock};
use crate::config::AgentConfig;
use crate::error::SessionKeyError;
use crate::transaction::{CanonicalJsonEncoder, PaymentIntent, TransactionEncoder};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where the managed session key is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandleState {
    /// Nothing created or loaded yet.
    Uninitialized,
    /// A key is registered and can sign.
    Active,
    /// Terminal. Signing fails with `Revoked` whatever the cache holds.
    Revoked,
}

/// A registered session key and its signing cache.
#[derive(Debug)]
pub struct SessionKeyHandle {
    session_key_id: String,
    expires_at: Option<DateTime<Utc>>,
    cache: SessionKeyCache,
}

impl SessionKeyHandle {
    #[must_use]
    pub fn session_key_id(&self) -> &str {
        &self.session_key_id
    }

    /// Backend-side expiry, known only for keys created by this manager.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    #[must_use]
    pub const fn public_key(&self) -> &SessionPublicKey {
        self.cache.public_key()
    }

    #[must_use]
    pub const fn cache(&self) -> &SessionKeyCache {
        &self.cache
    }

    #[must_use]
    pub const fn record(&self) -> &EncryptedSessionKey {
        self.cache.record()
    }
}

#[derive(Debug)]
struct ManagerState {
    state: HandleState,
    handle: Option<Arc<SessionKeyHandle>>,
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Result of [`SessionKeyManager::create`]. Contains no key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSessionKey {
    pub session_key_id: String,
    pub public_key: SessionPublicKey,
    pub expires_at: DateTime<Utc>,
    /// Present when recovery payload generation is enabled.
    pub recovery_payload: Option<RecoveryPayload>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Orchestrates one device-bound session key against a backend.
pub struct SessionKeyManager<B: SessionKeyBackend> {
    backend: Arc<B>,
    collector: Arc<FingerprintCollector>,
    config: AgentConfig,
    encoder: Box<dyn TransactionEncoder>,
    inner: Mutex<ManagerState>,
}

impl<B: SessionKeyBackend> SessionKeyManager<B> {
    /// # Errors
    ///
    /// Returns `SessionKeyError::Config` if `config` fails validation.
    pub fn new(
        backend: B,
        collector: FingerprintCollector,
        config: AgentConfig,
    ) -> Result<Self, SessionKeyError> {
        config.validate()?;
        log_kdf_profile(&config.kdf_profile);
        Ok(Self {
            backend: Arc::new(backend),
            collector: Arc::new(collector),
            config,
            encoder: Box::new(CanonicalJsonEncoder),
            inner: Mutex::new(ManagerState {
                state: HandleState::Uninitialized,
                handle: None,
            }),
        })
    }

    /// Replace the default [`CanonicalJsonEncoder`].
    #[must_use]
    pub fn with_encoder(mut self, encoder: impl TransactionEncoder + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    // -- lifecycle ---------------------------------------------------------

    /// Generate, seal and register a new session key.
    ///
    /// The keypair is not left in the cache; the first `sign` needs the PIN.
    /// Not safe to retry blindly: a failure after the backend stored the
    /// record leaves an orphaned id.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed PIN, `Revoked` once revoked, crypto
    /// failures from sealing, and backend errors from registration.
    pub async fn create(
        &self,
        pin: &str,
        spend_limits: SpendLimits,
    ) -> Result<CreatedSessionKey, SessionKeyError> {
        self.ensure_not_revoked()?;
        let pin = Pin::parse(pin)?;
        let fingerprint = *self.collector.collect().hash();
        let profile = self.config.kdf_profile.clone();

        let record = blocking(move || {
            let keypair = SessionKeypair::generate()?;
            Ok(EncryptedSessionKey::seal(
                &keypair,
                &pin,
                &fingerprint,
                &profile,
            )?)
        })
        .await?;

        let recovery_payload = self
            .config
            .generate_recovery_payload
            .then(|| recovery::generate(&record));
        let request =
            CreateSessionKeyRequest::new(&record, spend_limits, recovery_payload.clone());
        let response = self.backend.create(&request).await?;

        let public_key = *record.public_key();
        self.activate(SessionKeyHandle {
            session_key_id: response.session_key_id.clone(),
            expires_at: Some(response.expires_at),
            cache: self.new_cache(record),
        })?;
        tracing::info!(
            session_key_id = %response.session_key_id,
            public_key = %public_key,
            kdf = self.config.kdf_profile.name(),
            "session key created"
        );

        Ok(CreatedSessionKey {
            session_key_id: response.session_key_id,
            public_key,
            expires_at: response.expires_at,
            recovery_payload,
        })
    }

    /// Fetch the encrypted key for `session_key_id` and unlock it with `pin`.
    ///
    /// The handle only becomes `Active` once decryption succeeded; the
    /// decrypted key is cached for the default TTL.
    ///
    /// # Errors
    ///
    /// `DeviceMismatch` when the backend rejects this device's fingerprint
    /// (use the recovery flow), `Decryption` for a wrong PIN, `Validation`
    /// for a malformed PIN, and backend errors.
    pub async fn load(&self, session_key_id: &str, pin: &str) -> Result<(), SessionKeyError> {
        self.ensure_not_revoked()?;
        let pin = Pin::parse(pin)?;
        let fingerprint = *self.collector.collect().hash();

        let response = self
            .backend
            .get_encrypted(
                session_key_id,
                &GetEncryptedRequest {
                    device_fingerprint: fingerprint,
                },
            )
            .await?;
        if !response.device_fingerprint_valid {
            tracing::warn!(session_key_id, "backend rejected device fingerprint");
            return Err(SessionKeyError::DeviceMismatch {
                session_key_id: session_key_id.to_owned(),
            });
        }

        let sealed = response.sealed();
        let profile = self.config.kdf_profile.clone();
        let (keypair, record) = blocking(move || {
            let key = derive(&pin, &fingerprint, &profile)?;
            let plaintext = symmetric::decrypt(&sealed, key.expose())?;
            let keypair = SessionKeypair::from_bytes(plaintext.expose())?;
            let record = EncryptedSessionKey::assemble(sealed, *keypair.public_key(), fingerprint)?;
            Ok((keypair, record))
        })
        .await?;

        let cache = self.new_cache(record);
        cache.store(keypair, self.config.cache_ttl())?;
        self.activate(SessionKeyHandle {
            session_key_id: session_key_id.to_owned(),
            expires_at: None,
            cache,
        })?;
        tracing::info!(session_key_id, "session key loaded");
        Ok(())
    }

    /// Encode `intent` with the configured encoder and sign it.
    ///
    /// # Errors
    ///
    /// See [`sign_bytes`](Self::sign_bytes); encoder validation errors too.
    pub async fn sign(
        &self,
        intent: &PaymentIntent,
        pin: Option<&str>,
    ) -> Result<SignedTransaction, SessionKeyError> {
        let handle = self.active_handle()?;
        let message = self.encoder.encode(intent, handle.public_key())?;
        self.sign_with(handle, message, pin).await
    }

    /// Sign opaque bytes, unlocking with `pin` on a cache miss.
    ///
    /// # Errors
    ///
    /// `Revoked` after revocation (even with a warm cache), `NotActive`
    /// before create/load, `PinRequired` on a miss without PIN, and unlock
    /// errors.
    pub async fn sign_bytes(
        &self,
        message: &[u8],
        pin: Option<&str>,
    ) -> Result<SignedTransaction, SessionKeyError> {
        let handle = self.active_handle()?;
        self.sign_with(handle, message.to_vec(), pin).await
    }

    async fn sign_with(
        &self,
        handle: Arc<SessionKeyHandle>,
        message: Vec<u8>,
        pin: Option<&str>,
    ) -> Result<SignedTransaction, SessionKeyError> {
        let Some(pin) = pin.map(Pin::parse).transpose()? else {
            return handle.cache.sign(&message, None);
        };
        match handle.cache.sign(&message, None) {
            Err(SessionKeyError::PinRequired) => {}
            warm => return warm,
        }

        // The entry may reappear or vanish again before this runs;
        // `cache.sign` re-checks the slot under its own lock.
        let collector = Arc::clone(&self.collector);
        blocking(move || {
            let fingerprint = *collector.collect().hash();
            handle.cache.sign(
                &message,
                Some(Unlock {
                    pin: &pin,
                    fingerprint: &fingerprint,
                }),
            )
        })
        .await
    }

    /// Move a session key onto this device.
    ///
    /// `old_fingerprint` is the hash of the device the payload was sealed
    /// on; the payload itself does not carry it. The migrated key is
    /// registered under the same id and left locked.
    ///
    /// # Errors
    ///
    /// `Decryption` if the old credentials are wrong, `MalformedRecoveryData`
    /// for an inconsistent payload, `Validation` for malformed PINs, and
    /// backend errors.
    pub async fn recover(
        &self,
        session_key_id: &str,
        payload: &RecoveryPayload,
        old_fingerprint: FingerprintHash,
        old_pin: &str,
        new_pin: &str,
    ) -> Result<(), SessionKeyError> {
        self.ensure_not_revoked()?;
        let old_pin = Pin::parse(old_pin)?;
        let new_pin = Pin::parse(new_pin)?;
        let new_fingerprint = *self.collector.collect().hash();
        let profile = self.config.kdf_profile.clone();

        let owned_payload = payload.clone();
        let migrated = blocking(move || {
            Ok(recovery::re_encrypt_for_new_device(
                &owned_payload,
                &old_pin,
                &old_fingerprint,
                &new_pin,
                &new_fingerprint,
                &profile,
            )?)
        })
        .await?;

        let request = RecoverSessionKeyRequest::new(payload.clone(), &migrated);
        self.backend.recover(session_key_id, &request).await?;

        self.activate(SessionKeyHandle {
            session_key_id: session_key_id.to_owned(),
            expires_at: None,
            cache: self.new_cache(migrated),
        })?;
        tracing::info!(session_key_id, "session key recovered onto this device");
        Ok(())
    }

    /// Revoke the active key.
    ///
    /// Local state flips to `Revoked` and the cache is wiped before the
    /// backend is contacted, so a failed request still leaves the key
    /// unusable here. Revoking twice is a no-op.
    ///
    /// # Errors
    ///
    /// `NotActive` if nothing was created or loaded; backend errors.
    pub async fn revoke(&self, reason: Option<&str>) -> Result<(), SessionKeyError> {
        let handle = {
            let mut inner = self.inner();
            match inner.state {
                HandleState::Revoked => return Ok(()),
                HandleState::Uninitialized => return Err(SessionKeyError::NotActive),
                HandleState::Active => {}
            }
            let handle = inner.handle.clone().ok_or(SessionKeyError::NotActive)?;
            handle.cache.revoke();
            inner.state = HandleState::Revoked;
            handle
        };
        tracing::info!(session_key_id = %handle.session_key_id, "session key revoked locally");

        self.backend
            .revoke(&RevokeSessionKeyRequest {
                session_key_id: handle.session_key_id.clone(),
                reason: reason.map(str::to_owned),
            })
            .await?;
        Ok(())
    }

    /// Spend and expiry as reported by the backend.
    ///
    /// # Errors
    ///
    /// `NotActive` / `Revoked` for the local state, backend errors.
    pub async fn status(&self) -> Result<SessionKeyStatus, SessionKeyError> {
        let handle = self.active_handle()?;
        Ok(self
            .backend
            .status(&StatusRequest {
                session_key_id: handle.session_key_id.clone(),
            })
            .await?)
    }

    // -- cache passthrough -------------------------------------------------

    /// Decrypt the active key into the cache for `ttl` (default from config).
    ///
    /// The fingerprint is collected fresh and the KDF runs off the async
    /// runtime.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed PIN, `NotActive` / `Revoked` for the
    /// local state, `FingerprintMismatch` or `Decryption` on bad credentials.
    pub async fn unlock(&self, pin: &str, ttl: Option<Duration>) -> Result<(), SessionKeyError> {
        let pin = Pin::parse(pin)?;
        let handle = self.active_handle()?;
        let collector = Arc::clone(&self.collector);
        blocking(move || {
            let fingerprint = *collector.collect().hash();
            handle.cache.unlock(&pin, &fingerprint, ttl)
        })
        .await
    }

    pub fn is_cached(&self) -> bool {
        self.current().is_some_and(|h| h.cache.is_cached())
    }

    /// # Errors
    ///
    /// `NotCached` without a valid cached key, `Revoked` after revocation.
    pub fn extend_cache(&self, additional: Duration) -> Result<(), SessionKeyError> {
        self.current()
            .ok_or(SessionKeyError::NotCached)?
            .cache
            .extend(additional)
    }

    /// Wipe the decrypted key. Always succeeds.
    pub fn clear_cache(&self) {
        if let Some(handle) = self.current() {
            handle.cache.clear();
        }
    }

    pub fn cache_expires_in(&self) -> Option<Duration> {
        self.current().and_then(|h| h.cache.expires_in())
    }

    // -- accessors ---------------------------------------------------------

    pub fn state(&self) -> HandleState {
        self.inner().state
    }

    pub fn handle(&self) -> Option<Arc<SessionKeyHandle>> {
        self.current()
    }

    pub fn session_key_id(&self) -> Option<String> {
        self.current().map(|h| h.session_key_id.clone())
    }

    pub fn public_key(&self) -> Option<SessionPublicKey> {
        self.current().map(|h| *h.public_key())
    }

    // -- internals ---------------------------------------------------------

    fn new_cache(&self, record: EncryptedSessionKey) -> SessionKeyCache {
        SessionKeyCache::new(
            record,
            self.config.kdf_profile.clone(),
            self.config.cache_ttl(),
            self.config.disclose_fingerprint_mismatch,
        )
    }

    fn inner(&self) -> MutexGuard<'_, ManagerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<SessionKeyHandle>> {
        self.inner().handle.clone()
    }

    fn ensure_not_revoked(&self) -> Result<(), SessionKeyError> {
        if self.inner().state == HandleState::Revoked {
            return Err(SessionKeyError::Revoked);
        }
        Ok(())
    }

    fn active_handle(&self) -> Result<Arc<SessionKeyHandle>, SessionKeyError> {
        let inner = self.inner();
        match inner.state {
            HandleState::Revoked => Err(SessionKeyError::Revoked),
            HandleState::Uninitialized => Err(SessionKeyError::NotActive),
            HandleState::Active => inner.handle.clone().ok_or(SessionKeyError::NotActive),
        }
    }

    /// Install `handle` as the active key, wiping any previous cache.
    fn activate(&self, handle: SessionKeyHandle) -> Result<(), SessionKeyError> {
        let mut inner = self.inner();
        if inner.state == HandleState::Revoked {
            return Err(SessionKeyError::Revoked);
        }
        if let Some(previous) = inner.handle.replace(Arc::new(handle)) {
            previous.cache.clear();
        }
        inner.state = HandleState::Active;
        Ok(())
    }
}

impl<B: SessionKeyBackend> Drop for SessionKeyManager<B> {
    fn drop(&mut self) {
        self.clear_cache();
    }
}

fn log_kdf_profile(profile: &KdfProfile) {
    if !profile.is_memory_hard() {
        tracing::warn!(
            kdf = profile.name(),
            "session keys use a non memory-hard KDF; lower margin against PIN brute force"
        );
    }
    if !profile.meets_baseline() {
        tracing::warn!(kdf = profile.name(), "KDF work factor below recommended baseline");
    }
}

async fn blocking<T, F>(task: F) -> Result<T, SessionKeyError>
where
    F: FnOnce() -> Result<T, SessionKeyError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await?
}
