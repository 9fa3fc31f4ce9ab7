//! Model Registry
//!
//! Known backend models plus rolling per-model statistics. Pure data and a
//! health predicate; the dispatcher owns the lock around it.
//!
//! # Refresh semantics
//!
//! [`ModelRegistry::refresh`] rebuilds every entry from the new catalog, so
//! success/error counts and latency averages are forgotten on each refresh.
//! Models missing from the new catalog are removed, not marked unavailable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Success rate a model must exceed to stay healthy
pub const HEALTHY_SUCCESS_RATE: f64 = 0.5;

/// Average latency a model must stay under to stay healthy
pub const HEALTHY_MAX_LATENCY_MS: f64 = 30_000.0;

/// One known backend model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Unique model name, e.g. `llama3:latest`
    pub name: String,
    /// Model family
    pub family: String,
    /// Parameter size label, e.g. `8B`
    pub parameter_size: String,
    /// Quantization label, e.g. `Q4_0`
    pub quantization_level: String,
    /// Size on disk
    pub size_bytes: u64,
    /// Content digest
    pub digest: String,
    /// Last modification time reported by the backend
    pub last_modified: Option<DateTime<Utc>>,
    /// Present in the latest catalog refresh
    pub is_available: bool,
    /// Successful attempts
    pub success_count: u64,
    /// Failed attempts
    pub error_count: u64,
    /// Running latency average over successes
    pub avg_response_time_ms: f64,
}

impl ModelInfo {
    /// Create an available model with no statistics
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_available: true,
            ..Default::default()
        }
    }

    /// Total recorded attempts
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.success_count + self.error_count
    }

    /// Fraction of successful attempts, 0 with no data
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.attempts();
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64
    }

    /// Record the outcome of one attempt
    pub fn record(&mut self, success: bool, latency_ms: u64) {
        if success {
            self.success_count += 1;
            let latest = latency_ms as f64;
            self.avg_response_time_ms = if self.avg_response_time_ms == 0.0 {
                latest
            } else {
                (self.avg_response_time_ms + latest) / 2.0
            };
        } else {
            self.error_count += 1;
        }
    }

    /// Health predicate for a registered model
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        if !self.is_available {
            return false;
        }
        // No data yet: optimistic
        if self.attempts() == 0 {
            return true;
        }
        self.success_rate() > HEALTHY_SUCCESS_RATE
            && self.avg_response_time_ms < HEALTHY_MAX_LATENCY_MS
    }
}

// ============================================================================
// Catalog parsing
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogDetails {
    family: String,
    parameter_size: String,
    quantization_level: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogEntry {
    name: String,
    size: u64,
    digest: String,
    modified_at: Option<String>,
    details: CatalogDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Catalog {
    models: Vec<CatalogEntry>,
}

/// Parse an `/api/tags` body into fresh, available model entries
pub fn parse_catalog(body: &Value) -> Result<Vec<ModelInfo>, serde_json::Error> {
    let catalog = Catalog::deserialize(body)?;

    Ok(catalog
        .models
        .into_iter()
        .filter(|entry| !entry.name.is_empty())
        .map(|entry| ModelInfo {
            name: entry.name,
            family: entry.details.family,
            parameter_size: entry.details.parameter_size,
            quantization_level: entry.details.quantization_level,
            size_bytes: entry.size,
            digest: entry.digest,
            last_modified: entry.modified_at.as_deref().and_then(parse_timestamp),
            is_available: true,
            ..Default::default()
        })
        .collect())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// Registry
// ============================================================================

/// Known models in catalog order
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: Vec<ModelInfo>,
}

impl ModelRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole model set with a fresh catalog
    pub fn refresh(&mut self, models: Vec<ModelInfo>) {
        self.models.clear();
        for model in models {
            // Later duplicates replace earlier ones, keeping the first position
            match self.models.iter_mut().find(|m| m.name == model.name) {
                Some(existing) => *existing = model,
                None => self.models.push(model),
            }
        }
    }

    /// Look up one model
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Whether a model is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All models in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &ModelInfo> {
        self.models.iter()
    }

    /// Number of registered models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no models are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Unknown models are never healthy
    #[must_use]
    pub fn is_healthy(&self, name: &str) -> bool {
        self.get(name).is_some_and(ModelInfo::is_healthy)
    }

    /// Record an attempt outcome; unknown models are ignored
    pub fn record_outcome(&mut self, name: &str, success: bool, latency_ms: u64) {
        if let Some(model) = self.models.iter_mut().find(|m| m.name == name) {
            model.record(success, latency_ms);
        }
    }

    /// Clone of every entry
    #[must_use]
    pub fn snapshot(&self) -> Vec<ModelInfo> {
        self.models.clone()
    }
}
