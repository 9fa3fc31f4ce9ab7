//! Request and Response Types
//!
//! A [`RequestConfig`] is one logical generation request. It is immutable
//! once submitted; a retry re-enqueues the same config under the same
//! [`RequestId`]. The outcome is always delivered as an [`LlmResponse`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key holding the caller's integer priority
pub const PRIORITY_KEY: &str = "priority";

/// Metadata key holding the batch a request belongs to
pub const BATCH_KEY: &str = "batch_id";

// ============================================================================
// Identifiers
// ============================================================================

/// Request identifier, stable across retries
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create a request ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique request ID
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("req_{}", unique_suffix()))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Batch identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl BatchId {
    /// Generate a new unique batch ID
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("batch_{}", unique_suffix()))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn unique_suffix() -> String {
    let millis = Utc::now().timestamp_millis();
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{millis}_{}", &uuid[..8])
}

// ============================================================================
// Scenario
// ============================================================================

/// Caller-declared intent used to bias model choice
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Open-ended conversation
    #[default]
    GeneralChat,
    /// Writing code
    CodeGeneration,
    /// Troubleshooting and how-to answers
    TechnicalSupport,
    /// Story and dialogue for games
    GameNarrative,
    /// Interpreting data
    DataAnalysis,
    /// Translating between languages
    Translation,
    /// Condensing text
    Summarization,
    /// Factual Q&A
    QuestionAnswering,
    /// Fiction, poetry, brainstorming
    CreativeWriting,
    /// Finding and fixing bugs
    Debugging,
}

impl Scenario {
    /// Every scenario, in declaration order
    pub const ALL: [Scenario; 10] = [
        Self::GeneralChat,
        Self::CodeGeneration,
        Self::TechnicalSupport,
        Self::GameNarrative,
        Self::DataAnalysis,
        Self::Translation,
        Self::Summarization,
        Self::QuestionAnswering,
        Self::CreativeWriting,
        Self::Debugging,
    ];

    /// Stable tag used in logs and on the command line
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeneralChat => "general_chat",
            Self::CodeGeneration => "code_generation",
            Self::TechnicalSupport => "technical_support",
            Self::GameNarrative => "game_narrative",
            Self::DataAnalysis => "data_analysis",
            Self::Translation => "translation",
            Self::Summarization => "summarization",
            Self::QuestionAnswering => "question_answering",
            Self::CreativeWriting => "creative_writing",
            Self::Debugging => "debugging",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == normalized)
            .ok_or_else(|| format!("unknown scenario: {s}"))
    }
}

// ============================================================================
// Request Configuration
// ============================================================================

/// One logical generation request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    /// User prompt
    pub prompt: String,
    /// Pinned model; `None` or empty lets the selector choose
    pub model: Option<String>,
    /// Intent tag for model selection
    pub scenario: Scenario,
    /// Optional system prompt
    pub system_prompt: Option<String>,
    /// Generation options, overriding the global defaults key by key
    pub options: Map<String, Value>,
    /// Whether to request a streamed reply
    pub stream: bool,
    /// Retry budget (0 disables retries for this request)
    pub max_retries: u32,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Free-form metadata; `priority` orders the queue
    pub metadata: HashMap<String, Value>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: None,
            scenario: Scenario::GeneralChat,
            system_prompt: None,
            options: Map::new(),
            stream: true,
            max_retries: 3,
            timeout_ms: 30_000,
            metadata: HashMap::new(),
        }
    }
}

impl RequestConfig {
    /// Create a request for a prompt with default settings
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Pin a model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the scenario
    #[must_use]
    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = scenario;
        self
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Set one generation option
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set the retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the queue priority (higher runs first)
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.metadata
            .insert(PRIORITY_KEY.to_string(), Value::from(priority));
        self
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The pinned model, treating an empty string as unpinned
    #[must_use]
    pub fn pinned_model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.is_empty())
    }

    /// Caller-declared priority from metadata (0 when absent)
    #[must_use]
    pub fn priority(&self) -> i64 {
        self.metadata
            .get(PRIORITY_KEY)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// Batch this request belongs to, if any
    #[must_use]
    pub fn batch_id(&self) -> Option<&str> {
        self.metadata.get(BATCH_KEY).and_then(Value::as_str)
    }

    /// Per-attempt timeout as a duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Prompt text sent to the backend
    #[must_use]
    pub fn full_prompt(&self) -> String {
        match self.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            Some(system) => format!("System: {system}\n\nUser: {}", self.prompt),
            None => self.prompt.clone(),
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// Outcome of a generation request
///
/// Exactly one of `content` (with `success = true`) or `error_message`
/// (with `success = false`) is populated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Whether generation succeeded
    pub success: bool,
    /// Generated text
    pub content: String,
    /// Model that served the request (may be empty if none was resolved)
    pub model: String,
    /// Failure description
    pub error_message: String,
    /// Wall-clock time of the attempt
    pub response_time_ms: u64,
    /// Prompt plus completion tokens when the backend reports them
    pub total_tokens: u64,
    /// When the outcome was produced
    pub timestamp: DateTime<Utc>,
    /// Final backend object
    pub raw: Value,
    /// Metadata copied from the request
    pub metadata: HashMap<String, Value>,
}

impl LlmResponse {
    /// Build a successful response
    #[must_use]
    pub fn success(content: String, model: String, response_time_ms: u64, raw: Value) -> Self {
        let total_tokens = token_count(&raw);
        Self {
            success: true,
            content,
            model,
            error_message: String::new(),
            response_time_ms,
            total_tokens,
            timestamp: Utc::now(),
            raw,
            metadata: HashMap::new(),
        }
    }

    /// Build a failed response
    #[must_use]
    pub fn failure(error_message: impl Into<String>, model: String, response_time_ms: u64) -> Self {
        Self {
            success: false,
            content: String::new(),
            model,
            error_message: error_message.into(),
            response_time_ms,
            total_tokens: 0,
            timestamp: Utc::now(),
            raw: Value::Null,
            metadata: HashMap::new(),
        }
    }

    /// Attach request metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

fn token_count(raw: &Value) -> u64 {
    let prompt = raw.get("prompt_eval_count").and_then(Value::as_u64);
    let completion = raw.get("eval_count").and_then(Value::as_u64);
    prompt.unwrap_or(0) + completion.unwrap_or(0)
}
