//! LLM adapter contract.
//!
//! The pipeline only depends on [`LlmAdapter`]; concrete providers (see
//! [`crate::langbase`]) map their transport failures onto
//! [`AdapterError`](crate::error::AdapterError). Timeouts carry a
//! [`TimeoutPhase`] so a caller that vanished before the call is never
//! mistaken for a slow provider.
//!
//! - [`retry`]: exponential backoff with jitter
//! - [`selection`]: which model serves which task
//! - [`registry`]: adapter instances cached by `(provider, model)`

pub mod registry;
pub mod retry;
pub mod selection;

pub use crate::error::TimeoutPhase;
pub use registry::{AdapterFactory, AdapterRegistry};
pub use retry::{backoff_delay, RetryPolicy};
pub use selection::{select_model, ModelSelection, ModelTask, SelectionSource};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::detect::Violation;
use crate::error::AdapterResult;
use crate::graph::Graph;

/// Flags shaping what the draft call asks for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftFlags {
    /// Ask the model for per-edge rationales.
    #[serde(default)]
    pub include_rationales: bool,
    /// Ask for the strict edge schema (flat numeric fields only).
    #[serde(default)]
    pub strict_schema: bool,
}

/// Input to a draft call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftInput {
    /// Free-text decision brief.
    pub brief: String,
    /// Previous graph when refining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_graph: Option<Value>,
    /// Clarification rounds already spent.
    #[serde(default)]
    pub clarifier_rounds: u32,
    /// Schema flags.
    #[serde(default)]
    pub flags: DraftFlags,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

/// Output of a draft call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftResponse {
    /// Raw graph JSON; shape is asserted by the draft stage.
    pub graph: Value,
    /// Model rationales, if requested.
    #[serde(default)]
    pub rationales: Vec<Value>,
    /// Token usage.
    #[serde(default)]
    pub usage: Usage,
    /// Confidence the model reported for its own draft.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Questions the model would ask to sharpen the brief.
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
}

/// Input to a model-assisted repair call.
#[derive(Debug, Clone, Serialize)]
pub struct RepairInput {
    /// Brief the graph was drafted from.
    pub brief: String,
    /// Graph after the deterministic sweep.
    pub graph: Graph,
    /// Violations the deterministic engine could not fix.
    pub violations: Vec<Violation>,
}

/// Output of a model-assisted repair call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairResponse {
    /// Raw repaired graph JSON.
    pub graph: Value,
    /// Token usage reported by the provider.
    #[serde(default)]
    pub usage: Usage,
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Correlation ID for logs.
    pub request_id: String,
    /// Hard timeout for this call.
    pub timeout: Duration,
    /// Fires when the client disconnects.
    pub cancel: CancellationToken,
}

impl CallOptions {
    /// Create call options.
    pub fn new(request_id: impl Into<String>, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            request_id: request_id.into(),
            timeout,
            cancel,
        }
    }
}

/// Contract every LLM provider adapter implements.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Provider name (e.g. `langbase`).
    fn provider(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Draft a graph from a brief.
    async fn draft_graph(&self, input: &DraftInput, opts: &CallOptions)
        -> AdapterResult<DraftResponse>;

    /// Repair a graph the deterministic engine could not fix.
    async fn repair_graph(
        &self,
        input: &RepairInput,
        opts: &CallOptions,
    ) -> AdapterResult<RepairResponse>;
}
