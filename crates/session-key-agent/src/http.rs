//! `reqwest` implementation of [`SessionKeyBackend`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{
    CreateSessionKeyRequest, CreateSessionKeyResponse, GetEncryptedRequest, GetEncryptedResponse,
    RecoverSessionKeyRequest, RevokeSessionKeyRequest, SessionKeyBackend, SessionKeyStatus,
    StatusRequest,
};
use crate::config::AgentConfig;
use crate::error::{BackendError, SessionKeyError};

/// HTTP/JSON client for the session key backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    /// Build a client from `config`: base URL, bearer token, request timeout.
    ///
    /// # Errors
    ///
    /// Returns `SessionKeyError::Config` for an unparsable URL or API key,
    /// or `SessionKeyError::Backend` if the TLS client cannot be built.
    pub fn new(config: &AgentConfig) -> Result<Self, SessionKeyError> {
        let base = Url::parse(config.backend_url.trim())
            .map_err(|e| SessionKeyError::Config(format!("invalid backendUrl: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SessionKeyError::Config(format!(
                "backendUrl is not a base URL: {base}"
            )));
        }

        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| SessionKeyError::Config("apiKey contains invalid characters".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(BackendError::from)?;

        Ok(Self { client, base })
    }

    /// Absolute URL for `segments` below the base, each segment escaped.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::InvalidResponse(format!("not a base URL: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post<B: Serialize + Sync>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<Response, BackendError> {
        let url = self.endpoint(segments)?;
        tracing::debug!(path = url.path(), "backend request");
        let resp = self.client.post(url).json(body).send().await?;
        check_status(resp).await
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<R, BackendError> {
        let resp = self.post(segments, body).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn check_status(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let path = resp.url().path().to_owned();
    let body = resp.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), path, "backend request failed");
    Err(status_error(status, &path, body))
}

pub(crate) fn status_error(status: StatusCode, path: &str, body: String) -> BackendError {
    if status == StatusCode::NOT_FOUND {
        return BackendError::NotFound(path.to_owned());
    }
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown").to_owned()
    } else {
        body
    };
    BackendError::Server {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl SessionKeyBackend for HttpBackend {
    async fn create(
        &self,
        request: &CreateSessionKeyRequest,
    ) -> Result<CreateSessionKeyResponse, BackendError> {
        self.post_json(&["session-keys", "create"], request).await
    }

    async fn get_encrypted(
        &self,
        session_key_id: &str,
        request: &GetEncryptedRequest,
    ) -> Result<GetEncryptedResponse, BackendError> {
        self.post_json(&["session-keys", session_key_id, "get-encrypted"], request)
            .await
    }

    async fn recover(
        &self,
        session_key_id: &str,
        request: &RecoverSessionKeyRequest,
    ) -> Result<(), BackendError> {
        self.post(&["session-keys", session_key_id, "recover"], request)
            .await
            .map(drop)
    }

    async fn revoke(&self, request: &RevokeSessionKeyRequest) -> Result<(), BackendError> {
        self.post(&["session-keys", "revoke"], request).await.map(drop)
    }

    async fn status(&self, request: &StatusRequest) -> Result<SessionKeyStatus, BackendError> {
        self.post_json(&["session-keys", "status"], request).await
    }
}
