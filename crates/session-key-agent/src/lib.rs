//! `session-key-agent`: session key lifecycle for payment agents.
//!
//! Registers device-bound encrypted session keys with a backend, keeps the
//! decrypted key in a short-lived signing cache, and migrates keys between
//! devices via recovery payloads.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod config;
pub mod error;

pub mod backend;
pub mod http;

pub mod cache;
pub mod lifecycle;
pub mod transaction;

pub use backend::{
    CreateSessionKeyRequest, CreateSessionKeyResponse, GetEncryptedRequest, GetEncryptedResponse,
    RecoverSessionKeyRequest, RevokeSessionKeyRequest, SessionKeyBackend, SessionKeyStatus,
    SpendLimits, StatusRequest,
};
pub use cache::{SessionKeyCache, Unlock};
pub use config::AgentConfig;
pub use error::{BackendError, SessionKeyError};
pub use http::HttpBackend;
pub use lifecycle::{CreatedSessionKey, HandleState, SessionKeyHandle, SessionKeyManager};
pub use transaction::{CanonicalJsonEncoder, PaymentIntent, TransactionEncoder};
