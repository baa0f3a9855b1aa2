//! Model selection decision table.
//!
//! | Condition (first match wins)                        | Source     |
//! |-----------------------------------------------------|------------|
//! | request override on the allow-list                  | `Override` |
//! | tiered off, `LLM_MODEL` set and allowed             | `Legacy`   |
//! | tiered on, task env model set and allowed           | `Env`      |
//! | legacy/env model set but not on the allow-list      | `Fallback` |
//! | otherwise                                           | `Default`  |
//!
//! A rejected override is reported but does not stop the table.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ModelConfig;

/// What the model is needed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    /// Graph drafting.
    Draft,
    /// Model-backed repair.
    Repair,
}

/// Why a model was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    /// Built-in default for the task.
    Default,
    /// Per-request override.
    Override,
    /// Task-specific environment variable.
    Env,
    /// Configured fallback model.
    Fallback,
    /// Single pre-tiering model setting.
    Legacy,
}

/// Result of model selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSelection {
    /// Task the model was resolved for.
    pub task: ModelTask,
    /// Resolved model identifier.
    pub model: String,
    /// Where the choice came from.
    pub source: SelectionSource,
    /// A request override was supplied but not allowed.
    pub override_rejected: bool,
}

impl ModelSelection {
    /// Whether a per-request override is in effect.
    pub fn is_override(&self) -> bool {
        self.source == SelectionSource::Override
    }
}

fn allowed(config: &ModelConfig, model: &str) -> bool {
    config.allowed_models.iter().any(|m| m == model)
}

/// Pick the model for a task.
pub fn select_model(task: ModelTask, request_override: Option<&str>, config: &ModelConfig) -> ModelSelection {
    let select = |model: &str, source: SelectionSource, override_rejected: bool| ModelSelection {
        task,
        model: model.to_string(),
        source,
        override_rejected,
    };

    let mut override_rejected = false;
    if let Some(requested) = request_override.map(str::trim).filter(|m| !m.is_empty()) {
        if allowed(config, requested) {
            return select(requested, SelectionSource::Override, false);
        }
        warn!(model = %requested, task = ?task, "Model override not on allow-list");
        override_rejected = true;
    }

    let (configured, source) = if config.tiered {
        let env_model = match task {
            ModelTask::Draft => config.draft_model.as_deref(),
            ModelTask::Repair => config.repair_model.as_deref(),
        };
        (env_model, SelectionSource::Env)
    } else {
        (config.legacy_model.as_deref(), SelectionSource::Legacy)
    };

    if let Some(model) = configured {
        if allowed(config, model) {
            return select(model, source, override_rejected);
        }
        warn!(model = %model, source = ?source, "Configured model not on allow-list, using fallback");
        return select(config.fallback_model.as_str(), SelectionSource::Fallback, override_rejected);
    }

    let default = match task {
        ModelTask::Draft => config.default_draft_model.as_str(),
        ModelTask::Repair => config.default_repair_model.as_str(),
    };
    select(default, SelectionSource::Default, override_rejected)
}
