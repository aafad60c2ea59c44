//! Asset generation providers.
//!
//! The coordinator talks to image backends through [`AssetProvider`],
//! so tests can substitute a scripted double and the daemon can wire in
//! an HTTP backend. Errors are split by whether a retry can help.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Worth retrying: rate limits, upstream 5xx, network flakiness.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Retrying will not help: bad request, auth, unknown model.
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// One asset generation request.
#[derive(Debug, Clone, Serialize)]
pub struct AssetRequest {
    pub skill_id: String,
    pub description: String,
    pub model: String,
    pub seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_hint: Option<String>,
    /// Anchor artifact to hold style consistent across a wave.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_artifact: Option<PathBuf>,
}

/// Generated artifact bytes plus what the backend says they are.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub media_type: String,
    /// Cost reported by the backend, when it reports one.
    pub reported_cost: Option<f64>,
}

#[async_trait]
pub trait AssetProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &AssetRequest) -> Result<Artifact, ProviderError>;
}

/// HTTP image backend speaking a JSON POST protocol.
pub struct HttpImageProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpImageProvider {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl AssetProvider for HttpImageProvider {
    fn name(&self) -> &str {
        "http-image"
    }

    async fn generate(&self, request: &AssetRequest) -> Result<Artifact, ProviderError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            return Err(ProviderError::Transient(format!(
                "backend returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Permanent(format!(
                "backend returned {status}"
            )));
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let reported_cost = response
            .headers()
            .get("x-generation-cost")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transient(format!("body read failed: {e}")))?;

        if bytes.is_empty() {
            return Err(ProviderError::Permanent("backend returned empty body".into()));
        }

        tracing::debug!(
            target: "brandloom::provider",
            skill = %request.skill_id,
            model = %request.model,
            bytes = bytes.len(),
            "asset generated"
        );
        Ok(Artifact {
            bytes: bytes.to_vec(),
            media_type,
            reported_cost,
        })
    }
}
