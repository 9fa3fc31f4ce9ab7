//! Queue status snapshot

use serde::Serialize;

use crate::registry::ModelInfo;

/// Per-model statistics as reported by `queue_status`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelStats {
    /// Model name
    pub name: String,
    /// Successful attempts
    pub success_count: u64,
    /// Failed attempts
    pub error_count: u64,
    /// Running latency average
    pub avg_response_time_ms: f64,
    /// Success fraction
    pub success_rate: f64,
    /// Present in the latest catalog
    pub is_available: bool,
    /// Passes the health predicate
    pub is_healthy: bool,
}

impl From<&ModelInfo> for ModelStats {
    fn from(model: &ModelInfo) -> Self {
        Self {
            name: model.name.clone(),
            success_count: model.success_count,
            error_count: model.error_count,
            avg_response_time_ms: model.avg_response_time_ms,
            success_rate: model.success_rate(),
            is_available: model.is_available,
            is_healthy: model.is_healthy(),
        }
    }
}

/// Point-in-time view of the dispatcher
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueueStatus {
    /// Entries waiting in the queue
    pub queue_depth: usize,
    /// Attempts executing now
    pub in_flight: usize,
    /// Concurrency cap
    pub max_concurrent: usize,
    /// Logical requests accepted
    pub total_requests: u64,
    /// Successful completions
    pub successful_requests: u64,
    /// Terminal failures
    pub failed_requests: u64,
    /// Retries scheduled
    pub retried_requests: u64,
    /// Model switches performed
    pub model_switches: u64,
    /// Whether the startup probe succeeded
    pub service_available: bool,
    /// Statistics for every registered model
    pub models: Vec<ModelStats>,
}
