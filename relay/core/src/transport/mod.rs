//! Inference Server Transport
//!
//! The dispatcher only needs two operations from the network: GET a JSON
//! document, and POST a JSON body and read the reply as a byte stream. The
//! reply is either a single JSON object or newline-delimited JSON chunks;
//! the dispatcher decides which from the request's `stream` flag.
//!
//! # Available Transports
//!
//! - **Ollama**: reqwest client against a local Ollama server (default)
//!
//! Tests supply in-memory implementations of [`Transport`].

mod ndjson;
mod ollama;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::TransportError;

pub use ndjson::{GenerateChunk, NdjsonDecoder};
pub use ollama::OllamaTransport;

/// Health probe endpoint
pub const VERSION_PATH: &str = "/api/version";
/// Model catalog endpoint
pub const TAGS_PATH: &str = "/api/tags";
/// Generation endpoint
pub const GENERATE_PATH: &str = "/api/generate";

/// Response body as it arrives
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Network access to the inference server
///
/// Implementations map non-2xx replies to [`TransportError::Status`] with
/// the body text, and honor the given timeout for the whole exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// GET a JSON document
    async fn get_json(&self, path: &str, timeout: Duration) -> Result<Value, TransportError>;

    /// POST a JSON body and return the reply body as a stream of bytes
    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<ByteStream, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn get_json(&self, path: &str, timeout: Duration) -> Result<Value, TransportError> {
        (**self).get_json(path, timeout).await
    }

    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<ByteStream, TransportError> {
        (**self).post_json(path, body, timeout).await
    }
}
