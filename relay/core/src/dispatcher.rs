//! Request Dispatcher
//!
//! The bounded-concurrency engine. Submissions go into a priority queue; a
//! single scheduler task dequeues while fewer than `max_concurrent_requests`
//! attempts are running and spawns each attempt into a [`JoinSet`].
//!
//! # Attempt lifecycle
//!
//! ```text
//! Queued ──► Selecting ──► Calling ──┬──► Completing ──► Completed
//!                │                   │
//!                │ no model          ├──► Retrying ──(backoff)──► Queued
//!                ▼                   │
//!             Failing ◄──────────────┴──► Failing ──► Failed
//! ```
//!
//! The in-flight slot is taken by the scheduler before the attempt task is
//! spawned and released by a drop guard, so every exit path (success,
//! terminal failure, hand-off to a retry, panic) frees it. A retry sleeps
//! outside the slot and re-enters the queue under the same request ID.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::{watch, Notify};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::events::DispatchObserver;
use crate::metrics::DispatchMetrics;
use crate::queue::{QueueEntry, RequestQueue};
use crate::registry::{parse_catalog, ModelInfo, ModelRegistry};
use crate::request::{BatchId, LlmResponse, RequestConfig, RequestId, BATCH_KEY};
use crate::retry::RetryPolicy;
use crate::selector::ModelSelector;
use crate::status::{ModelStats, QueueStatus};
use crate::transport::{
    ByteStream, GenerateChunk, NdjsonDecoder, Transport, GENERATE_PATH, TAGS_PATH, VERSION_PATH,
};

/// Reason reported when an unhealthy model is replaced
pub const HEALTH_SWITCH_REASON: &str = "Model health issue";

/// Dispatches generation requests to an inference server
///
/// Cloning is cheap; clones share the same queue, registry and scheduler.
pub struct RequestDispatcher<T: Transport + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport + 'static> Clone for RequestDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Transport + 'static> {
    transport: T,
    global_options: RwLock<Map<String, Value>>,
    probe_timeout: Duration,
    catalog_timeout: Duration,
    poll_interval: Duration,
    registry: RwLock<ModelRegistry>,
    selector: ModelSelector,
    queue: RequestQueue,
    /// Requests that are queued, in flight, or backing off
    live: DashSet<RequestId>,
    /// Requests holding a slot, with the time the slot was taken
    in_flight: DashMap<RequestId, Instant>,
    batches: DashMap<String, BatchState>,
    observers: RwLock<Vec<Arc<dyn DispatchObserver>>>,
    metrics: DispatchMetrics,
    max_concurrent: AtomicUsize,
    auto_retry: AtomicBool,
    service_available: AtomicBool,
    initialized: AtomicBool,
    slot_freed: Notify,
    shutdown: watch::Sender<bool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone, Copy, Debug)]
struct BatchState {
    completed: usize,
    total: usize,
}

/// Successful attempt
struct Completion {
    model: String,
    content: String,
    raw: Value,
}

/// Failed attempt; `model` is set once a model was settled on
struct AttemptFailure {
    model: Option<String>,
    error: DispatchError,
}

impl<T: Transport + 'static> RequestDispatcher<T> {
    /// Create a dispatcher with the default model preferences
    pub fn new(config: DispatcherConfig, transport: T) -> Self {
        Self::with_selector(config, transport, ModelSelector::new())
    }

    /// Create a dispatcher with a custom selector
    pub fn with_selector(config: DispatcherConfig, transport: T, selector: ModelSelector) -> Self {
        let (shutdown, _) = watch::channel(false);
        let poll_interval = config.poll_interval();

        Self {
            inner: Arc::new(Inner {
                transport,
                global_options: RwLock::new(config.global_options.clone()),
                probe_timeout: config.probe_timeout(),
                catalog_timeout: config.catalog_timeout(),
                poll_interval,
                registry: RwLock::new(ModelRegistry::new()),
                selector,
                queue: RequestQueue::new(poll_interval),
                live: DashSet::new(),
                in_flight: DashMap::new(),
                batches: DashMap::new(),
                observers: RwLock::new(Vec::new()),
                metrics: DispatchMetrics::new(),
                max_concurrent: AtomicUsize::new(config.max_concurrent_requests.max(1)),
                auto_retry: AtomicBool::new(config.auto_retry_enabled),
                service_available: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                slot_freed: Notify::new(),
                shutdown,
                scheduler: Mutex::new(None),
            }),
        }
    }

    /// Attach an observer
    pub fn add_observer(&self, observer: Arc<dyn DispatchObserver>) {
        self.inner.observers.write().push(observer);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Probe the server, load the model catalog, and start scheduling
    ///
    /// A failed probe marks the service unavailable and leaves the scheduler
    /// stopped. A failed catalog fetch is logged and does not abort startup.
    pub async fn initialize(&self) -> Result<(), DispatchError> {
        tracing::info!(transport = self.inner.transport.name(), "Initializing dispatcher");

        match self
            .inner
            .transport
            .get_json(VERSION_PATH, self.inner.probe_timeout)
            .await
        {
            Ok(version) => {
                self.inner.service_available.store(true, Ordering::SeqCst);
                let version = version
                    .get("version")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                tracing::info!(version, "Inference service available");
            }
            Err(e) => {
                self.inner.service_available.store(false, Ordering::SeqCst);
                tracing::error!(error = %e, "Inference service probe failed");
                return Err(DispatchError::ServiceUnavailable);
            }
        }

        if let Err(e) = self.refresh_models().await {
            tracing::warn!(error = %e, "Model catalog refresh failed during startup");
        }

        self.inner.initialized.store(true, Ordering::SeqCst);
        self.start();
        tracing::info!("Dispatcher initialized");
        Ok(())
    }

    /// Whether the startup probe succeeded
    #[must_use]
    pub fn is_service_available(&self) -> bool {
        self.inner.service_available.load(Ordering::SeqCst)
    }

    /// Start the scheduler if it is not running
    ///
    /// Queued work is held until this is called. Has no effect after
    /// [`shutdown`](Self::shutdown).
    pub fn start(&self) {
        let mut scheduler = self.inner.scheduler.lock();
        if scheduler.is_some() || *self.inner.shutdown.borrow() {
            return;
        }
        *scheduler = Some(tokio::spawn(Arc::clone(&self.inner).run_scheduler()));
    }

    /// Stop the scheduler
    ///
    /// Attempts already in flight run to completion. Pending backoff timers
    /// are abandoned and queued requests stay queued.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        let handle = self.inner.scheduler.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler task failed");
            }
        }
        tracing::info!(queued = self.inner.queue.len(), "Dispatcher shut down");
    }

    // ========================================================================
    // Model catalog
    // ========================================================================

    /// Replace the registry from `/api/tags`; returns the number of models
    pub async fn refresh_models(&self) -> Result<usize, DispatchError> {
        if !self.is_service_available() {
            return Err(DispatchError::ServiceUnavailable);
        }

        let body = self
            .inner
            .transport
            .get_json(TAGS_PATH, self.inner.catalog_timeout)
            .await?;
        let models = parse_catalog(&body).map_err(|e| DispatchError::Decode(e.to_string()))?;

        for model in &models {
            tracing::debug!(
                model = %model.name,
                family = %model.family,
                size_mb = model.size_bytes / (1024 * 1024),
                "Found model"
            );
        }

        let mut registry = self.inner.registry.write();
        registry.refresh(models);
        tracing::info!(count = registry.len(), "Model catalog refreshed");
        Ok(registry.len())
    }

    /// One registry entry
    #[must_use]
    pub fn model_info(&self, name: &str) -> Option<ModelInfo> {
        self.inner.registry.read().get(name).cloned()
    }

    /// Every registry entry in catalog order
    #[must_use]
    pub fn list_models(&self) -> Vec<ModelInfo> {
        self.inner.registry.read().snapshot()
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Queue a request; returns immediately with its ID
    ///
    /// A caller-supplied ID that is still queued, in flight, or waiting to
    /// retry is rejected with [`DispatchError::DuplicateRequest`].
    pub fn submit(
        &self,
        config: RequestConfig,
        request_id: Option<RequestId>,
    ) -> Result<RequestId, DispatchError> {
        let request_id = request_id.unwrap_or_else(RequestId::generate);
        if !self.inner.live.insert(request_id.clone()) {
            tracing::warn!(request_id = %request_id, "Duplicate request rejected");
            return Err(DispatchError::DuplicateRequest(request_id.to_string()));
        }
        let priority = config.priority();

        self.inner.metrics.total_requests.inc();
        self.inner
            .queue
            .push(request_id.clone(), Arc::new(config), 0);

        tracing::info!(request_id = %request_id, priority, "Request queued");
        Ok(request_id)
    }

    /// Queue several requests as one batch
    ///
    /// Each member carries the batch ID in its metadata. Progress is
    /// reported every time a member reaches a terminal state.
    pub fn submit_batch(&self, configs: Vec<RequestConfig>) -> (BatchId, Vec<RequestId>) {
        let batch_id = BatchId::generate();
        if !configs.is_empty() {
            self.inner.batches.insert(
                batch_id.as_str().to_string(),
                BatchState {
                    completed: 0,
                    total: configs.len(),
                },
            );
        }

        tracing::info!(batch_id = %batch_id, size = configs.len(), "Batch queued");
        // Generated IDs are never live yet
        let ids = configs
            .into_iter()
            .filter_map(|config| {
                let config = config.with_metadata(BATCH_KEY, Value::from(batch_id.as_str()));
                self.submit(config, None).ok()
            })
            .collect();
        (batch_id, ids)
    }

    /// Drop a request that is still waiting in the queue
    ///
    /// Returns false for unknown requests and for requests that are in
    /// flight or backing off before a retry.
    pub fn cancel_queued(&self, request_id: &RequestId) -> bool {
        match self.inner.queue.remove(request_id) {
            Some(entry) => {
                self.inner.live.remove(request_id);
                tracing::info!(request_id = %request_id, "Queued request cancelled");
                self.inner.batch_member_finished(&entry.config);
                true
            }
            None => false,
        }
    }

    /// Run one request to its first outcome, outside the queue
    ///
    /// Does not take a concurrency slot and never retries. Observers see
    /// model switches and stream chunks but not completion or error.
    /// After [`shutdown`](Self::shutdown) it fails with "dispatcher has shut
    /// down" without calling the backend.
    pub async fn generate_blocking(&self, config: RequestConfig) -> LlmResponse {
        let response = match self.run_blocking(&config).await {
            Ok(response) => response,
            Err((response, _)) => response,
        };
        response.with_metadata(config.metadata)
    }

    /// Blocking path keeping the typed error next to the failed response
    pub(crate) async fn run_blocking(
        &self,
        config: &RequestConfig,
    ) -> Result<LlmResponse, (LlmResponse, DispatchError)> {
        let inner = &self.inner;
        if *inner.shutdown.borrow() {
            let error = DispatchError::Shutdown;
            return Err((LlmResponse::failure(error.to_string(), String::new(), 0), error));
        }
        if !inner.initialized.load(Ordering::SeqCst) || !self.is_service_available() {
            let error = DispatchError::ServiceUnavailable;
            return Err((LlmResponse::failure(error.to_string(), String::new(), 0), error));
        }

        let request_id = RequestId::generate();
        inner.metrics.total_requests.inc();
        tracing::debug!(request_id = %request_id, "Blocking request started");

        let started = Instant::now();
        let outcome = inner.execute(&request_id, config).await;
        let elapsed_ms = elapsed_ms(started);

        match outcome {
            Ok(completion) => Ok(inner.record_success(completion, elapsed_ms)),
            Err(failure) => {
                inner.record_failure(failure.model.as_deref(), elapsed_ms);
                inner.metrics.failed.inc();
                tracing::warn!(request_id = %request_id, error = %failure.error, "Blocking request failed");
                let response = LlmResponse::failure(
                    failure.error.to_string(),
                    failure.model.unwrap_or_default(),
                    elapsed_ms,
                );
                Err((response, failure.error))
            }
        }
    }

    // ========================================================================
    // Introspection and runtime settings
    // ========================================================================

    /// Snapshot of queue, counters and per-model statistics
    #[must_use]
    pub fn queue_status(&self) -> QueueStatus {
        let inner = &self.inner;
        let metrics = &inner.metrics;
        QueueStatus {
            queue_depth: inner.queue.len(),
            in_flight: inner.in_flight.len(),
            max_concurrent: inner.max_concurrent(),
            total_requests: metrics.total_requests.get(),
            successful_requests: metrics.successful.get(),
            failed_requests: metrics.failed.get(),
            retried_requests: metrics.retries.get(),
            model_switches: metrics.model_switches.get(),
            service_available: self.is_service_available(),
            models: inner.registry.read().iter().map(ModelStats::from).collect(),
        }
    }

    /// Whether a request is waiting in the queue
    #[must_use]
    pub fn is_queued(&self, request_id: &RequestId) -> bool {
        self.inner.queue.contains(request_id)
    }

    /// Whether a request currently holds a concurrency slot
    #[must_use]
    pub fn is_in_flight(&self, request_id: &RequestId) -> bool {
        self.inner.in_flight.contains_key(request_id)
    }

    /// Replace the options applied under every request's own options
    pub fn set_global_options(&self, options: Map<String, Value>) {
        *self.inner.global_options.write() = options;
    }

    /// Turn automatic retries on or off
    pub fn set_auto_retry_enabled(&self, enabled: bool) {
        self.inner.auto_retry.store(enabled, Ordering::SeqCst);
    }

    /// Change the concurrency cap (minimum 1); applies at the next dequeue
    pub fn set_max_concurrent_requests(&self, max: usize) {
        self.inner.max_concurrent.store(max.max(1), Ordering::SeqCst);
        self.inner.slot_freed.notify_one();
    }
}

// ============================================================================
// Scheduling
// ============================================================================

impl<T: Transport + 'static> Inner<T> {
    fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.auto_retry.load(Ordering::SeqCst))
    }

    async fn run_scheduler(self: Arc<Self>) {
        let mut attempts = JoinSet::new();
        let stop = stopped(self.shutdown.subscribe());
        tokio::pin!(stop);

        tracing::info!(max_concurrent = self.max_concurrent(), "Scheduler started");

        loop {
            while let Some(result) = attempts.try_join_next() {
                log_attempt_exit(result);
            }

            if self.metrics.in_flight.get() >= self.max_concurrent() as u64 {
                tokio::select! {
                    biased;
                    () = &mut stop => break,
                    _ = tokio::time::timeout(self.poll_interval, self.slot_freed.notified()) => {}
                }
                continue;
            }

            let entry = tokio::select! {
                biased;
                () = &mut stop => break,
                entry = self.queue.pop() => entry,
            };

            let slot = SlotGuard::acquire(&self, entry.request_id.clone());
            tracing::debug!(
                request_id = %entry.request_id,
                retries = entry.retries,
                in_flight = self.metrics.in_flight.get(),
                "Dispatching request"
            );
            attempts.spawn(Arc::clone(&self).run_attempt(entry, slot));
        }

        tracing::info!(in_flight = attempts.len(), "Scheduler stopping");
        while let Some(result) = attempts.join_next().await {
            log_attempt_exit(result);
        }
    }

    async fn run_attempt(self: Arc<Self>, entry: QueueEntry, slot: SlotGuard<T>) {
        let QueueEntry {
            request_id,
            config,
            retries,
            ..
        } = entry;

        let started = Instant::now();
        let outcome = self.execute(&request_id, &config).await;
        let elapsed_ms = elapsed_ms(started);

        match outcome {
            Ok(completion) => {
                let response = self
                    .record_success(completion, elapsed_ms)
                    .with_metadata(config.metadata.clone());
                drop(slot);
                self.live.remove(&request_id);

                tracing::info!(
                    request_id = %request_id,
                    model = %response.model,
                    elapsed_ms,
                    tokens = response.total_tokens,
                    "Request completed"
                );
                self.notify(|o| o.on_completed(&request_id, &response));
                self.batch_member_finished(&config);
            }
            Err(failure) => {
                self.record_failure(failure.model.as_deref(), elapsed_ms);
                let message = failure.error.to_string();

                if self.retry_policy().should_retry(retries, &config) {
                    drop(slot);
                    self.retry_after_backoff(request_id, config, retries + 1, &message)
                        .await;
                } else {
                    drop(slot);
                    self.live.remove(&request_id);
                    self.metrics.failed.inc();
                    tracing::warn!(
                        request_id = %request_id,
                        retries,
                        error = %message,
                        "Request failed"
                    );
                    self.notify(|o| o.on_error(&request_id, &message, retries));
                    self.batch_member_finished(&config);
                }
            }
        }
    }

    async fn retry_after_backoff(
        &self,
        request_id: RequestId,
        config: Arc<RequestConfig>,
        attempt: u32,
        reason: &str,
    ) {
        let delay = RetryPolicy::next_delay(attempt);
        self.metrics.retries.inc();
        tracing::info!(
            request_id = %request_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %reason,
            "Retrying request"
        );

        tokio::select! {
            biased;
            () = stopped(self.shutdown.subscribe()) => {
                self.live.remove(&request_id);
                tracing::debug!(request_id = %request_id, "Retry abandoned on shutdown");
            }
            () = tokio::time::sleep(delay) => {
                self.queue.push(request_id, config, attempt);
            }
        }
    }

    // ========================================================================
    // Attempt execution
    // ========================================================================

    /// Select, call, and read one attempt; statistics are left to the caller
    async fn execute(
        &self,
        request_id: &RequestId,
        config: &RequestConfig,
    ) -> Result<Completion, AttemptFailure> {
        let model = self.resolve_model(config).map_err(|error| {
            tracing::debug!(request_id = %request_id, error = %error, "Model resolution failed");
            AttemptFailure { model: None, error }
        })?;

        let payload = build_payload(config, &model, &self.global_options.read());
        tracing::debug!(request_id = %request_id, model = %model, stream = config.stream, "Calling backend");

        let call = async {
            let body = self
                .transport
                .post_json(GENERATE_PATH, &payload, config.timeout())
                .await?;
            if config.stream {
                self.read_stream(request_id, body).await
            } else {
                read_whole(body).await
            }
        };

        let result = match tokio::time::timeout(config.timeout(), call).await {
            Ok(Err(DispatchError::Timeout(_))) | Err(_) => {
                Err(DispatchError::Timeout(config.timeout_ms))
            }
            Ok(result) => result,
        };

        match result {
            Ok((content, raw)) => Ok(Completion {
                model,
                content,
                raw,
            }),
            Err(error) => Err(AttemptFailure {
                model: Some(model),
                error,
            }),
        }
    }

    /// Pinned or selected model, replaced if unhealthy
    fn resolve_model(&self, config: &RequestConfig) -> Result<String, DispatchError> {
        let (resolved, replacement) = {
            let registry = self.registry.read();
            let resolved = match config.pinned_model() {
                Some(pinned) => pinned.to_string(),
                None => self
                    .selector
                    .select(config.scenario, &registry)
                    .ok_or(DispatchError::NoSuitableModel)?,
            };
            if registry.is_healthy(&resolved) {
                return Ok(resolved);
            }
            let replacement = self.selector.select(config.scenario, &registry);
            (resolved, replacement)
        };

        match replacement {
            Some(replacement) if replacement != resolved => {
                self.metrics.model_switches.inc();
                tracing::info!(
                    from = %resolved,
                    to = %replacement,
                    "Switching from unhealthy model"
                );
                self.notify(|o| o.on_model_switched(&resolved, &replacement, HEALTH_SWITCH_REASON));
                Ok(replacement)
            }
            _ => Err(DispatchError::NoHealthyModel),
        }
    }

    /// Accumulate a newline-delimited reply, forwarding fragments as they arrive
    ///
    /// A `done` marker with no text before it is an empty response.
    async fn read_stream(
        &self,
        request_id: &RequestId,
        mut body: ByteStream,
    ) -> Result<(String, Value), DispatchError> {
        let mut decoder = NdjsonDecoder::new();
        let mut content = String::new();

        while let Some(bytes) = body.next().await {
            let bytes = bytes?;
            for line in decoder.push(&bytes) {
                if let Some(raw) = self.consume_line(request_id, &line, &mut content)? {
                    return finish_stream(content, raw);
                }
            }
        }
        if let Some(line) = decoder.finish() {
            if let Some(raw) = self.consume_line(request_id, &line, &mut content)? {
                return finish_stream(content, raw);
            }
        }
        Err(DispatchError::IncompleteStream)
    }

    /// Returns the final object once the `done` marker is seen
    fn consume_line(
        &self,
        request_id: &RequestId,
        line: &str,
        content: &mut String,
    ) -> Result<Option<Value>, DispatchError> {
        let Some(chunk) = GenerateChunk::parse(line) else {
            tracing::debug!(request_id = %request_id, "Skipping malformed stream line");
            return Ok(None);
        };
        if let Some(error) = chunk.error() {
            return Err(DispatchError::Backend(error.to_string()));
        }

        if !chunk.text.is_empty() {
            content.push_str(&chunk.text);
            self.notify(|o| o.on_stream_chunk(request_id, &chunk.text, chunk.done));
        }
        Ok(chunk.done.then_some(chunk.raw))
    }

    // ========================================================================
    // Outcome bookkeeping
    // ========================================================================

    fn record_success(&self, completion: Completion, elapsed_ms: u64) -> LlmResponse {
        self.registry
            .write()
            .record_outcome(&completion.model, true, elapsed_ms);
        self.metrics.successful.inc();
        LlmResponse::success(completion.content, completion.model, elapsed_ms, completion.raw)
    }

    fn record_failure(&self, model: Option<&str>, elapsed_ms: u64) {
        if let Some(model) = model {
            self.registry.write().record_outcome(model, false, elapsed_ms);
        }
    }

    fn batch_member_finished(&self, config: &RequestConfig) {
        let Some(batch_id) = config.batch_id() else {
            return;
        };

        let progress = match self.batches.get_mut(batch_id) {
            Some(mut state) => {
                state.completed += 1;
                *state
            }
            None => return,
        };
        if progress.completed >= progress.total {
            self.batches.remove(batch_id);
            tracing::info!(batch_id, total = progress.total, "Batch finished");
        }

        let batch_id = BatchId(batch_id.to_string());
        self.notify(|o| o.on_batch_progress(&batch_id, progress.completed, progress.total));
    }

    fn notify(&self, hook: impl Fn(&dyn DispatchObserver)) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            hook(observer.as_ref());
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Holds one concurrency slot for a request
struct SlotGuard<T: Transport + 'static> {
    inner: Arc<Inner<T>>,
    request_id: RequestId,
}

impl<T: Transport + 'static> SlotGuard<T> {
    fn acquire(inner: &Arc<Inner<T>>, request_id: RequestId) -> Self {
        inner.metrics.in_flight.inc();
        inner.in_flight.insert(request_id.clone(), Instant::now());
        Self {
            inner: Arc::clone(inner),
            request_id,
        }
    }
}

impl<T: Transport + 'static> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.request_id);
        self.inner.metrics.in_flight.dec();
        self.inner.slot_freed.notify_one();
    }
}

/// Resolves once the shutdown flag is set
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn log_attempt_exit(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(error = %e, "Attempt task panicked");
        } else {
            tracing::warn!(error = %e, "Attempt task cancelled");
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// `/api/generate` body; request options win over global ones
fn build_payload(config: &RequestConfig, model: &str, global_options: &Map<String, Value>) -> Value {
    let mut payload = Map::new();
    payload.insert("model".to_string(), Value::from(model));
    payload.insert("prompt".to_string(), Value::from(config.full_prompt()));
    payload.insert("stream".to_string(), Value::from(config.stream));

    let mut options = global_options.clone();
    options.extend(config.options.clone());
    if !options.is_empty() {
        payload.insert("options".to_string(), Value::Object(options));
    }
    Value::Object(payload)
}

fn finish_stream(content: String, raw: Value) -> Result<(String, Value), DispatchError> {
    if content.is_empty() {
        return Err(DispatchError::EmptyResponse);
    }
    Ok((content, raw))
}

/// Read a whole-response reply
async fn read_whole(mut body: ByteStream) -> Result<(String, Value), DispatchError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }

    let raw: Value =
        serde_json::from_slice(&bytes).map_err(|e| DispatchError::Decode(e.to_string()))?;
    let content = raw
        .get("response")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if content.is_empty() {
        return Err(match raw.get("error").and_then(Value::as_str) {
            Some(error) => DispatchError::Backend(error.to_string()),
            None => DispatchError::EmptyResponse,
        });
    }
    Ok((content, raw))
}
