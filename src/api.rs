//! Draft API and connectivity interfaces.
//!
//! The autosave coordinator talks to the server through [`DraftApi`] and
//! reads the client's network status through [`Connectivity`]; both are
//! traits so views and tests can supply their own. [`HttpDraftApi`] is the
//! production implementation.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::{DraftPatch, FollowUpDraft};

/// Errors from draft API calls.
#[derive(Debug)]
pub enum ApiError {
    /// Request failed to complete (connection, timeout, ...)
    HttpError(String),
    /// Server answered with a non-success status
    StatusError(u16),
    /// Response body could not be decoded
    DecodeError(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::HttpError(e) => write!(f, "HTTP error: {}", e),
            ApiError::StatusError(code) => write!(f, "Server returned status {}", code),
            ApiError::DecodeError(e) => write!(f, "Failed to decode response: {}", e),
        }
    }
}

impl std::error::Error for ApiError {}

/// Save and recovery-fetch calls for follow-up drafts.
#[async_trait]
pub trait DraftApi: Send + Sync {
    /// Persists only the changed fields of a draft.
    async fn save_draft(&self, attempt_id: &str, patch: &DraftPatch) -> Result<(), ApiError>;

    /// Fetches the authoritative draft; used to re-synchronize after a save
    /// failure.
    async fn fetch_draft(&self, attempt_id: &str) -> Result<FollowUpDraft, ApiError>;
}

/// Client network status, sampled at the moment a save begins.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Shared online/offline cell, flipped by whatever owns the connection
/// lifecycle and read by the coordinator.
#[derive(Debug, Clone)]
pub struct SharedConnectivity(Arc<AtomicBool>);

impl SharedConnectivity {
    /// Starts online.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::Relaxed);
    }
}

impl Default for SharedConnectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Connectivity for SharedConnectivity {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// HTTP implementation of [`DraftApi`] against the attempt API.
#[derive(Debug, Clone)]
pub struct HttpDraftApi {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpDraftApi {
    /// Creates a client against a base URL like `http://localhost:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Adds a Bearer token to every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn draft_url(&self, attempt_id: &str) -> String {
        format!(
            "{}/api/task-attempts/{}/follow-up-draft",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(attempt_id)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }
}

#[async_trait]
impl DraftApi for HttpDraftApi {
    async fn save_draft(&self, attempt_id: &str, patch: &DraftPatch) -> Result<(), ApiError> {
        let response = self
            .authorize(self.client.put(self.draft_url(attempt_id)))
            .json(patch)
            .send()
            .await
            .map_err(|e| ApiError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ApiError::StatusError(response.status().as_u16()));
        }
        Ok(())
    }

    async fn fetch_draft(&self, attempt_id: &str) -> Result<FollowUpDraft, ApiError> {
        let response = self
            .authorize(self.client.get(self.draft_url(attempt_id)))
            .send()
            .await
            .map_err(|e| ApiError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ApiError::StatusError(response.status().as_u16()));
        }

        response
            .json::<FollowUpDraft>()
            .await
            .map_err(|e| ApiError::DecodeError(e.to_string()))
    }
}
