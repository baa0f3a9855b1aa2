//! Provenance assembly: where the prompts and models of a request came from.

use serde::Serialize;

use crate::adapter::ModelSelection;
use crate::config::PromptConfig;
use crate::prompts::PROMPT_VERSION;

/// Origin of the prompt text in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    /// Remote prompt store.
    Supabase,
    /// Built-in prompts.
    Defaults,
    /// `CEE_PROMPT_VERSION` is set.
    EnvOverride,
}

impl PromptSource {
    /// Derive the source from configuration; an env override wins.
    pub fn from_config(config: &PromptConfig) -> Self {
        if config.version_override.is_some() {
            PromptSource::EnvOverride
        } else if config.store_url.is_some() {
            PromptSource::Supabase
        } else {
            PromptSource::Defaults
        }
    }
}

/// Machine-readable record of what produced a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    /// Crate version.
    pub pipeline_version: &'static str,
    /// Where the draft prompt came from.
    pub prompt_source: PromptSource,
    /// Short content hash of the draft prompt.
    pub prompt_version: String,
    /// A non-default prompt was used.
    pub prompt_override_active: bool,
    /// Either model came from an override.
    pub model_override_active: bool,
    /// Model used for drafting.
    pub draft_model: ModelSelection,
    /// Model used for repair.
    pub repair_model: ModelSelection,
}

impl Provenance {
    /// Assemble provenance from prompt config and the model selections.
    pub fn assemble(prompts: &PromptConfig, draft: ModelSelection, repair: ModelSelection) -> Self {
        let prompt_source = PromptSource::from_config(prompts);
        Self {
            pipeline_version: env!("CARGO_PKG_VERSION"),
            prompt_source,
            prompt_version: prompts
                .version_override
                .clone()
                .unwrap_or_else(|| PROMPT_VERSION.to_string()),
            prompt_override_active: prompt_source == PromptSource::EnvOverride,
            model_override_active: draft.is_override() || repair.is_override(),
            draft_model: draft,
            repair_model: repair,
        }
    }
}
