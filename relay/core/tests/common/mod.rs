//! Shared test infrastructure: an in-memory inference server.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use relay_core::transport::{GENERATE_PATH, TAGS_PATH, VERSION_PATH};
use relay_core::{
    ByteStream, ChannelObserver, DispatchEvent, DispatcherConfig, RequestDispatcher, Transport,
    TransportError,
};

// =============================================================================
// Mock Transport
// =============================================================================

/// What the mock server answers to one `/api/generate` call
#[derive(Clone, Debug)]
pub enum Reply {
    /// A single JSON body
    Json(Value),
    /// Raw body chunks, delivered in order
    Chunks(Vec<String>),
    /// A non-2xx status
    Status(u16, String),
}

/// A recorded `/api/generate` call
#[derive(Clone, Debug)]
pub struct Call {
    pub at: Instant,
    pub model: String,
    pub prompt: String,
    pub body: Value,
}

type Handler = dyn Fn(&str, &Value) -> Reply + Send + Sync;

/// In-memory server with a fixed catalog and a per-call handler
pub struct MockTransport {
    catalog: Value,
    probe_ok: bool,
    latency: Duration,
    handler: Box<Handler>,
    calls: Mutex<Vec<Call>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTransport {
    /// Server exposing `models`, answering every call with "ok"
    pub fn new(models: &[&str]) -> Self {
        let entries: Vec<Value> = models
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "size": 1_048_576,
                    "digest": "abc123",
                    "modified_at": "2024-05-01T10:20:30Z",
                    "details": {"family": "test", "parameter_size": "7B", "quantization_level": "Q4_0"}
                })
            })
            .collect();

        Self {
            catalog: json!({ "models": entries }),
            probe_ok: true,
            latency: Duration::ZERO,
            handler: Box::new(|_: &str, _: &Value| ok_reply("ok")),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Answer calls with `handler(model, body)`
    pub fn with_handler(
        mut self,
        handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    ) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Delay every generate call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the `/api/version` probe
    pub fn unreachable(mut self) -> Self {
        self.probe_ok = false;
        self
    }

    /// Every generate call so far
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of simultaneous generate calls observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "Mock"
    }

    async fn get_json(&self, path: &str, _timeout: Duration) -> Result<Value, TransportError> {
        if !self.probe_ok {
            return Err(TransportError::Connection("connection refused".to_string()));
        }
        match path {
            VERSION_PATH => Ok(json!({ "version": "0.1.32" })),
            TAGS_PATH => Ok(self.catalog.clone()),
            _ => Err(TransportError::Status {
                status: 404,
                body: "not found".to_string(),
            }),
        }
    }

    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        _timeout: Duration,
    ) -> Result<ByteStream, TransportError> {
        assert_eq!(path, GENERATE_PATH);
        let model = body["model"].as_str().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            model: model.clone(),
            prompt: body["prompt"].as_str().unwrap_or_default().to_string(),
            body: body.clone(),
        });

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match (self.handler)(&model, body) {
            Reply::Json(value) => {
                let bytes = Bytes::from(value.to_string());
                Ok(futures::stream::iter(vec![Ok(bytes)]).boxed())
            }
            Reply::Chunks(parts) => {
                let parts: Vec<_> = parts.into_iter().map(|p| Ok(Bytes::from(p))).collect();
                Ok(futures::stream::iter(parts).boxed())
            }
            Reply::Status(status, body) => Err(TransportError::Status { status, body }),
        }
    }
}

/// Whole-response success body with token counts
pub fn ok_reply(text: &str) -> Reply {
    Reply::Json(json!({
        "response": text,
        "done": true,
        "prompt_eval_count": 5,
        "eval_count": 7
    }))
}

/// A 500 reply
pub fn server_error() -> Reply {
    Reply::Status(500, "boom".to_string())
}

// =============================================================================
// Dispatcher Setup
// =============================================================================

pub type TestDispatcher = RequestDispatcher<Arc<MockTransport>>;

/// Dispatcher over `mock`, observed through a channel, not yet initialized
pub fn build(
    mock: MockTransport,
    max_concurrent: usize,
) -> (TestDispatcher, Arc<MockTransport>, UnboundedReceiver<DispatchEvent>) {
    let mock = Arc::new(mock);
    let config = DispatcherConfig {
        max_concurrent_requests: max_concurrent,
        ..Default::default()
    };
    let dispatcher = RequestDispatcher::new(config, Arc::clone(&mock));
    let (observer, events) = ChannelObserver::channel();
    dispatcher.add_observer(Arc::new(observer));
    (dispatcher, mock, events)
}

/// Like [`build`], then initialized
pub async fn started(
    mock: MockTransport,
    max_concurrent: usize,
) -> (TestDispatcher, Arc<MockTransport>, UnboundedReceiver<DispatchEvent>) {
    let (dispatcher, mock, events) = build(mock, max_concurrent);
    dispatcher.initialize().await.expect("initialize");
    (dispatcher, mock, events)
}

// =============================================================================
// Event Helpers
// =============================================================================

/// Next event, failing the test if none arrives
pub async fn next_event(events: &mut UnboundedReceiver<DispatchEvent>) -> DispatchEvent {
    tokio::time::timeout(Duration::from_secs(300), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collect events until `n` completions or terminal failures have arrived
pub async fn until_terminal(
    events: &mut UnboundedReceiver<DispatchEvent>,
    n: usize,
) -> Vec<DispatchEvent> {
    let mut seen = Vec::new();
    let mut terminal = 0;
    while terminal < n {
        let event = next_event(events).await;
        if matches!(
            event,
            DispatchEvent::Completed { .. } | DispatchEvent::Failed { .. }
        ) {
            terminal += 1;
        }
        seen.push(event);
    }
    seen
}
