//! Relay Core - Scenario-Aware Request Dispatch for Local LLMs
//!
//! This crate routes generation requests to the models served by a local
//! Ollama instance. Each request declares a scenario (chat, code, summaries,
//! ...); the dispatcher picks a model that suits the scenario and is
//! currently healthy, runs a bounded number of requests at once, and retries
//! failures with exponential backoff.
//!
//! # Architecture
//!
//! ```text
//!   Callers                                   Observers
//!   submit / submit_batch / generate_blocking   ▲ completed, chunk, error,
//!      │                                        │ model switched, batch progress
//! ┌────┼────────────────────────────────────────┼────────────────────┐
//! │    ▼                 RequestDispatcher      │                    │
//! │ ┌──────────────┐   ┌───────────┐   ┌───────┴───────┐            │
//! │ │ RequestQueue │──►│ Scheduler │──►│ Attempt tasks │ (≤ max)    │
//! │ │ (priority)   │   └───────────┘   └───┬───────┬───┘            │
//! │ └──────▲───────┘                       │       │                │
//! │        │ backoff   ┌─────────────┐     │       │                │
//! │        └───────────│ RetryPolicy │◄────┘       │                │
//! │                    └─────────────┘             ▼                │
//! │  ┌───────────────┐   ┌───────────────┐   ┌───────────┐          │
//! │  │ ModelSelector │──►│ ModelRegistry │   │ Transport │          │
//! │  └───────────────┘   └───────────────┘   └─────┬─────┘          │
//! └────────────────────────────────────────────────┼────────────────┘
//!                                                  ▼
//!                                   /api/version  /api/tags  /api/generate
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{
//!     ChannelObserver, DispatcherConfig, OllamaTransport, RequestConfig, RequestDispatcher,
//!     Scenario,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatcherConfig::from_env();
//!     let transport = OllamaTransport::from_config(&config)?;
//!     let dispatcher = RequestDispatcher::new(config, transport);
//!
//!     let (observer, mut events) = ChannelObserver::channel();
//!     dispatcher.add_observer(Arc::new(observer));
//!     dispatcher.initialize().await?;
//!
//!     dispatcher.submit(
//!         RequestConfig::new("Explain borrowing").with_scenario(Scenario::TechnicalSupport),
//!         None,
//!     )?;
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`registry`]: Known models, rolling statistics, health predicate
//! - [`selector`]: Scenario preference table and fallback scoring
//! - [`retry`]: Retry budget and backoff delays
//! - [`queue`]: Priority queue with FIFO ordering inside a priority
//! - [`dispatcher`]: Scheduler, attempt state machine, batches
//! - [`transport`]: HTTP seam and the Ollama client
//! - [`events`]: Observer trait and channel adapter
//! - [`config`]: Dispatcher settings (defaults, env, TOML)
//!
//! The core never installs a tracing subscriber; that is the binary's job.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod assist;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod request;
pub mod retry;
pub mod selector;
pub mod status;
pub mod transport;

// Re-exports for convenience
pub use assist::DEFAULT_CHAT_SYSTEM_PROMPT;
pub use config::DispatcherConfig;
pub use dispatcher::RequestDispatcher;
pub use error::{ConfigError, DispatchError, TransportError};
pub use events::{ChannelObserver, DispatchEvent, DispatchObserver};
pub use registry::{ModelInfo, ModelRegistry};
pub use request::{BatchId, LlmResponse, RequestConfig, RequestId, Scenario};
pub use retry::RetryPolicy;
pub use selector::{ModelSelector, PreferenceTable};
pub use status::{ModelStats, QueueStatus};
pub use transport::{ByteStream, OllamaTransport, Transport};
