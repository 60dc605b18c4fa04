//! Agent configuration: stored as plain JSON next to the host application.
//!
//! Holds no secrets apart from the optional backend API key. PINs and key
//! material are never part of configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use session_key_crypto::KdfProfile;

use crate::error::SessionKeyError;

/// Environment variable overriding [`AgentConfig::backend_url`].
pub const ENV_BACKEND_URL: &str = "SESSION_KEY_BACKEND_URL";

/// Environment variable overriding [`AgentConfig::api_key`].
pub const ENV_API_KEY: &str = "SESSION_KEY_API_KEY";

// ── Top-level configuration ────────────────────────────────────────

/// Session key agent settings. All fields have defaults via [`Default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Base URL of the session key backend, without trailing slash.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Bearer token sent with every backend request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-request timeout for backend calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long a decrypted key stays cached after unlock, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// KDF used to turn `(PIN, fingerprint)` into the wrapping key.
    #[serde(default)]
    pub kdf_profile: KdfProfile,

    /// Build a recovery payload when creating a session key.
    #[serde(default = "default_true")]
    pub generate_recovery_payload: bool,

    /// Surface fingerprint mismatches as their own error instead of the
    /// generic decryption failure.
    #[serde(default = "default_true")]
    pub disclose_fingerprint_mismatch: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            kdf_profile: KdfProfile::default(),
            generate_recovery_payload: true,
            disclose_fingerprint_mismatch: true,
        }
    }
}

fn default_backend_url() -> String {
    "http://localhost:3000/api".into()
}
const fn default_request_timeout() -> u64 {
    30
}
const fn default_cache_ttl() -> u64 {
    30 * 60
}
const fn default_true() -> bool {
    true
}

impl AgentConfig {
    /// Load configuration from `path`.
    ///
    /// A missing file yields [`Default::default()`]. A corrupt file is an
    /// error, never a reset to defaults (which could switch KDF profile).
    ///
    /// # Errors
    ///
    /// Returns [`SessionKeyError::Config`] for invalid JSON or values that
    /// fail [`validate`](Self::validate), and [`SessionKeyError::Io`] for
    /// read failures other than "not found".
    pub fn load(path: &Path) -> Result<Self, SessionKeyError> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| SessionKeyError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Persist to `path` via a temporary file and rename. Owner-only on Unix.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory is missing or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), SessionKeyError> {
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SessionKeyError::Config(e.to_string()))?;

        fs::write(&tmp, &json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Apply [`ENV_BACKEND_URL`] and [`ENV_API_KEY`] if set and non-empty.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = non_empty_env(ENV_BACKEND_URL) {
            self.backend_url = url;
        }
        if let Some(key) = non_empty_env(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        self
    }

    /// # Errors
    ///
    /// Returns [`SessionKeyError::Config`] for an empty backend URL or a
    /// zero timeout/TTL.
    pub fn validate(&self) -> Result<(), SessionKeyError> {
        if self.backend_url.trim().is_empty() {
            return Err(SessionKeyError::Config("backendUrl must not be empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SessionKeyError::Config(
                "requestTimeoutSecs must be positive".into(),
            ));
        }
        if self.cache_ttl_secs == 0 {
            return Err(SessionKeyError::Config("cacheTtlSecs must be positive".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ── Tests ──────────────────────────────────────────────────────────
