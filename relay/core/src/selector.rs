//! Model Selection
//!
//! Picks a model for a scenario in four steps:
//!
//! ```text
//! 1. Walk the scenario's preference list, first registered + healthy wins
//! 2. Otherwise score every healthy model (success rate, latency), best wins
//! 3. Otherwise take the first available model, ignoring health
//! 4. Otherwise nothing (registry empty)
//! ```
//!
//! Step 3 keeps traffic flowing when every model looks unhealthy.

use std::collections::HashMap;

use crate::registry::{ModelInfo, ModelRegistry};
use crate::request::Scenario;

/// Weight of the success rate in the fallback score
const SUCCESS_WEIGHT: f64 = 0.7;
/// Weight of the latency term in the fallback score
const LATENCY_WEIGHT: f64 = 0.3;
/// Success-rate term for models that have no recorded attempts
const UNTRIED_SUCCESS_RATE: f64 = 0.5;

/// Ordered model preferences per scenario
#[derive(Clone, Debug)]
pub struct PreferenceTable {
    table: HashMap<Scenario, Vec<String>>,
}

impl Default for PreferenceTable {
    fn default() -> Self {
        let entries: [(Scenario, &[&str]); 10] = [
            (
                Scenario::GeneralChat,
                &[
                    "llama3:latest",
                    "mistral:latest",
                    "phi3:latest",
                    "gemma:latest",
                    "qwen2:latest",
                ],
            ),
            (
                Scenario::CodeGeneration,
                &["deepseek-coder:latest", "llama3:latest", "mistral:latest"],
            ),
            (
                Scenario::TechnicalSupport,
                &["llama3:latest", "mistral:latest", "qwen2:latest"],
            ),
            (
                Scenario::GameNarrative,
                &["gemma:latest", "llama3:latest", "mistral:latest"],
            ),
            (
                Scenario::DataAnalysis,
                &["qwen2:latest", "llama3:latest", "mistral:latest"],
            ),
            (
                Scenario::Translation,
                &["qwen2:latest", "gemma:latest", "llama3:latest"],
            ),
            (
                Scenario::Summarization,
                &["phi3:latest", "qwen2:latest", "gemma:latest"],
            ),
            (
                Scenario::QuestionAnswering,
                &["llama3:latest", "qwen2:latest", "mistral:latest"],
            ),
            (
                Scenario::CreativeWriting,
                &["gemma:latest", "llama3:latest", "mistral:latest"],
            ),
            (
                Scenario::Debugging,
                &["deepseek-coder:latest", "llama3:latest", "phi3:latest"],
            ),
        ];

        Self {
            table: entries
                .into_iter()
                .map(|(scenario, models)| {
                    (scenario, models.iter().map(|m| (*m).to_string()).collect())
                })
                .collect(),
        }
    }
}

impl PreferenceTable {
    /// Replace the preference list for one scenario
    #[must_use]
    pub fn with_preferences(mut self, scenario: Scenario, models: Vec<String>) -> Self {
        self.table.insert(scenario, models);
        self
    }

    /// Preference list for a scenario; unmatched scenarios use general chat's
    #[must_use]
    pub fn preferences(&self, scenario: Scenario) -> &[String] {
        self.table
            .get(&scenario)
            .or_else(|| self.table.get(&Scenario::GeneralChat))
            .map_or(&[], Vec::as_slice)
    }
}

/// Scenario-aware model selector
#[derive(Clone, Debug, Default)]
pub struct ModelSelector {
    preferences: PreferenceTable,
}

impl ModelSelector {
    /// Create a selector with the default preference table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a selector with a custom preference table
    #[must_use]
    pub fn with_table(preferences: PreferenceTable) -> Self {
        Self { preferences }
    }

    /// The preference table in use
    #[must_use]
    pub fn preferences(&self) -> &PreferenceTable {
        &self.preferences
    }

    /// Choose a model for a scenario; `None` only when the registry is empty
    #[must_use]
    pub fn select(&self, scenario: Scenario, registry: &ModelRegistry) -> Option<String> {
        if registry.is_empty() {
            return None;
        }

        let preferred = self
            .preferences
            .preferences(scenario)
            .iter()
            .find(|name| registry.is_healthy(name));
        if let Some(name) = preferred {
            tracing::debug!(scenario = %scenario, model = %name, "Selected preferred model");
            return Some(name.clone());
        }

        if let Some(name) = best_scored(registry) {
            tracing::debug!(scenario = %scenario, model = %name, "Selected best-scoring model");
            return Some(name);
        }

        let last_resort = registry.iter().find(|m| m.is_available).map(|m| m.name.clone());
        if let Some(ref name) = last_resort {
            tracing::warn!(
                scenario = %scenario,
                model = %name,
                "No healthy model, falling back to first available"
            );
        }
        last_resort
    }
}

/// Fallback score: success rate weighted against inverse latency
#[must_use]
pub fn score(model: &ModelInfo) -> f64 {
    let success_rate = if model.attempts() > 0 {
        model.success_rate()
    } else {
        UNTRIED_SUCCESS_RATE
    };
    let latency_score = if model.avg_response_time_ms > 0.0 {
        1000.0 / model.avg_response_time_ms
    } else {
        1.0
    };
    SUCCESS_WEIGHT * success_rate + LATENCY_WEIGHT * latency_score
}

/// Highest-scoring healthy model; the first seen wins ties
fn best_scored(registry: &ModelRegistry) -> Option<String> {
    let mut best: Option<(&ModelInfo, f64)> = None;
    for model in registry.iter().filter(|m| m.is_healthy()) {
        let candidate = score(model);
        match best {
            Some((_, current)) if candidate <= current => {}
            _ => best = Some((model, candidate)),
        }
    }
    best.map(|(model, _)| model.name.clone())
}
