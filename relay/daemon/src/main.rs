//! Relay Daemon - Command-Line Front End for the Request Dispatcher
//!
//! Connects to a local Ollama server and drives the dispatcher from the
//! shell: list models, inspect the queue, ask one question, or run a batch.
//!
//! # Usage
//!
//! ```bash
//! # Installed models
//! relay-daemon models
//!
//! # Stream an answer, letting the selector pick the model
//! relay-daemon ask "How do lifetimes work?" --scenario technical_support
//!
//! # One prompt per line, run as a batch
//! relay-daemon batch prompts.txt --scenario summarization
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon status
//! ```
//!
//! # Configuration
//!
//! `--config FILE`, else `$XDG_CONFIG_HOME/relay/relay.toml`, else the
//! environment (`OLLAMA_HOST`, `OLLAMA_PORT`, `RELAY_MAX_CONCURRENT`, ...).
//! `--host` and `--port` override whichever source was used.

mod config;

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use relay_core::{
    ChannelObserver, DispatchEvent, OllamaTransport, RequestConfig, RequestDispatcher, RequestId,
    Scenario,
};

/// Relay Daemon - scenario-aware dispatch across local Ollama models
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Inference server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Inference server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent requests (overrides config)
    #[arg(short = 'j', long)]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed models
    Models,

    /// Print queue and model statistics as JSON
    Status,

    /// Send one prompt and print the answer
    Ask {
        /// Prompt text
        prompt: String,

        #[command(flatten)]
        request: RequestArgs,

        /// Queue priority (higher runs first)
        #[arg(long, default_value_t = 0)]
        priority: i64,

        /// Bypass the queue and wait for the first outcome
        #[arg(long)]
        blocking: bool,
    },

    /// Run every non-empty line of a file as one batch
    Batch {
        /// File with one prompt per line
        file: PathBuf,

        #[command(flatten)]
        request: RequestArgs,
    },
}

/// Request settings shared by `ask` and `batch`
#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// Scenario used for model selection
    #[arg(short = 's', long, default_value = "general_chat", value_parser = parse_scenario)]
    scenario: Scenario,

    /// Pin a model instead of selecting one
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    /// Request a whole response instead of a stream
    #[arg(long)]
    no_stream: bool,

    /// Retry budget
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Per-attempt timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,
}

impl RequestArgs {
    fn build(&self, prompt: impl Into<String>) -> RequestConfig {
        let mut config = RequestConfig::new(prompt)
            .with_scenario(self.scenario)
            .with_stream(!self.no_stream)
            .with_max_retries(self.max_retries)
            .with_timeout_ms(self.timeout_ms);
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        if let Some(system) = &self.system {
            config = config.with_system(system.clone());
        }
        config
    }
}

fn parse_scenario(raw: &str) -> Result<Scenario, String> {
    raw.parse()
}

/// Non-empty, trimmed lines of a prompt file
fn read_prompts(source: &str) -> Vec<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

type Dispatcher = RequestDispatcher<OllamaTransport>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_daemon=info".parse()?)
                .add_directive("relay_core=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut dispatcher_config = config::load_config(args.config.as_deref())?;
    if let Some(host) = args.host {
        dispatcher_config.host = host;
    }
    if let Some(port) = args.port {
        dispatcher_config.port = port;
    }
    if let Some(max) = args.max_concurrent {
        dispatcher_config.max_concurrent_requests = max;
    }

    let transport = OllamaTransport::from_config(&dispatcher_config)
        .context("Failed to create HTTP client")?;
    info!(url = %transport.base_url(), "Connecting to inference server");

    let dispatcher = RequestDispatcher::new(dispatcher_config, transport);
    let (observer, events) = ChannelObserver::channel();
    dispatcher.add_observer(Arc::new(observer));

    dispatcher
        .initialize()
        .await
        .context("Inference server is not reachable")?;

    let result = match args.command {
        Command::Models => {
            print_models(&dispatcher);
            Ok(())
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&dispatcher.queue_status())?);
            Ok(())
        }
        Command::Ask {
            prompt,
            request,
            priority,
            blocking,
        } => {
            let config = request.build(prompt).with_priority(priority);
            if blocking {
                run_blocking(&dispatcher, config).await
            } else {
                run_queued(&dispatcher, vec![config], events, tokio::signal::ctrl_c()).await
            }
        }
        Command::Batch { file, request } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read prompt file: {file:?}"))?;
            let configs: Vec<_> = read_prompts(&source)
                .into_iter()
                .map(|prompt| request.build(prompt))
                .collect();
            if configs.is_empty() {
                bail!("No prompts in {file:?}");
            }
            run_queued(&dispatcher, configs, events, tokio::signal::ctrl_c()).await
        }
    };

    dispatcher.shutdown().await;
    result
}

fn print_models(dispatcher: &Dispatcher) {
    let models = dispatcher.list_models();
    if models.is_empty() {
        println!("No models installed");
        return;
    }

    println!(
        "{:<32} {:<10} {:<8} {:<8} {:>10}",
        "NAME", "FAMILY", "PARAMS", "QUANT", "SIZE (MB)"
    );
    for model in models {
        println!(
            "{:<32} {:<10} {:<8} {:<8} {:>10}",
            model.name,
            model.family,
            model.parameter_size,
            model.quantization_level,
            model.size_bytes / (1024 * 1024)
        );
    }
}

async fn run_blocking(dispatcher: &Dispatcher, config: RequestConfig) -> Result<()> {
    let response = dispatcher.generate_blocking(config).await;
    if !response.success {
        bail!("{}", response.error_message);
    }
    println!("{}", response.content);
    info!(
        model = %response.model,
        elapsed_ms = response.response_time_ms,
        tokens = response.total_tokens,
        "Done"
    );
    Ok(())
}

/// Submit and print events until every request is terminal or `interrupt` fires
async fn run_queued(
    dispatcher: &Dispatcher,
    configs: Vec<RequestConfig>,
    mut events: UnboundedReceiver<DispatchEvent>,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> Result<()> {
    let total = configs.len();
    let ids: Vec<RequestId> = if total == 1 {
        configs
            .into_iter()
            .map(|config| dispatcher.submit(config, None))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        dispatcher.submit_batch(configs).1
    };

    let mut remaining = total;
    let mut failures = 0usize;
    let mut streamed = false;
    let mut stdout = std::io::stdout();

    tokio::pin!(interrupt);

    while remaining > 0 {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = &mut interrupt => {
                warn!("Interrupted");
                for id in &ids {
                    dispatcher.cancel_queued(id);
                }
                break;
            }
        };
        let Some(event) = event else { break };

        match event {
            DispatchEvent::StreamChunk { text, .. } if total == 1 => {
                streamed = true;
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            DispatchEvent::Completed {
                request_id,
                response,
            } => {
                remaining -= 1;
                if total == 1 {
                    // Streamed text is already on screen
                    if streamed {
                        println!();
                    } else {
                        println!("{}", response.content);
                    }
                } else {
                    println!("[{request_id}] ({}) {}", response.model, response.content);
                }
            }
            DispatchEvent::Failed {
                request_id,
                message,
                attempts,
            } => {
                remaining -= 1;
                failures += 1;
                eprintln!("[{request_id}] failed after {attempts} retries: {message}");
            }
            DispatchEvent::ModelSwitched { from, to, reason } => {
                info!(from = %from, to = %to, reason = %reason, "Model switched");
            }
            DispatchEvent::BatchProgress {
                completed, total, ..
            } => {
                info!(completed, total, "Batch progress");
            }
            DispatchEvent::StreamChunk { .. } => {}
        }
    }

    if failures > 0 {
        bail!("{failures} of {total} requests failed");
    }
    Ok(())
}
