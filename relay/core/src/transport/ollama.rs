//! Ollama Transport
//!
//! reqwest-backed [`Transport`] for a local Ollama server.
//!
//! # Ollama API
//!
//! - `/api/version` - Server version (startup probe)
//! - `/api/tags` - List installed models
//! - `/api/generate` - Generate completions (streaming or whole)

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use super::{ByteStream, Transport};
use crate::config::DispatcherConfig;
use crate::error::TransportError;

/// Ollama HTTP client
#[derive(Clone, Debug)]
pub struct OllamaTransport {
    /// Base URL without trailing slash
    base_url: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaTransport {
    /// Create a transport for a base URL such as `http://localhost:11434`
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Create from dispatcher configuration
    pub fn from_config(config: &DispatcherConfig) -> Result<Self, TransportError> {
        Self::new(config.base_url())
    }

    /// Base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turn a non-2xx reply into a status error carrying the body
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Transport for OllamaTransport {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn get_json(&self, path: &str, timeout: Duration) -> Result<Value, TransportError> {
        let response = self
            .http_client
            .get(self.url(path))
            .timeout(timeout)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<ByteStream, TransportError> {
        let response = self
            .http_client
            .post(self.url(path))
            .json(body)
            .timeout(timeout)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed())
    }
}
