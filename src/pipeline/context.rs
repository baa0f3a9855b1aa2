//! Typed state carried through the stage sequence.
//!
//! The orchestrator owns one [`PipelineContext`] per request and lends it
//! mutably to one stage at a time. Once `early_return` is set no further
//! stage runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::budget::{RepairTimeout, RequestBudget};
use crate::adapter::{DraftFlags, DraftInput, Usage};
use crate::checkpoint::{CheckpointRecorder, CheckpointSet, Provenance};
use crate::draft::ClarifierStatus;
use crate::enrichment::EnrichmentOutput;
use crate::error::PipelineError;
use crate::graph::{EdgeFieldStash, Graph};
use crate::repair::{GoalHints, RepairRecord, SweepTrace};
use crate::threshold::ThresholdSweepTrace;
use crate::validate::ValidationIssue;

/// Model-assisted repair was needed but never attempted because of the budget.
pub const LLM_REPAIR_SKIPPED_BUDGET: &str = "LLM_REPAIR_SKIPPED_BUDGET";
/// Model-assisted repair failed; the deterministic result stands.
pub const LLM_REPAIR_FAILED: &str = "LLM_REPAIR_FAILED";
/// Model-assisted repair was needed but is switched off.
pub const LLM_REPAIR_DISABLED: &str = "LLM_REPAIR_DISABLED";
/// Bucket C violations are left in the graph.
pub const STRUCTURAL_WARNING: &str = "STRUCTURAL_VIOLATIONS_REMAIN";
/// The enrichment collaborator failed.
pub const ENRICHMENT_FAILED: &str = "ENRICHMENT_FAILED";
/// Enrichment never ran because the request budget was spent.
pub const ENRICHMENT_SKIPPED_BUDGET: &str = "ENRICHMENT_SKIPPED_BUDGET";

/// A caller's draft request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftRequest {
    /// Decision brief in free text.
    pub brief: String,
    /// Graph from a previous clarifier round.
    #[serde(default)]
    pub prior_graph: Option<Value>,
    /// Clarifier rounds already completed.
    #[serde(default)]
    pub clarifier_rounds: u32,
    /// Per-request toggles.
    #[serde(default)]
    pub flags: DraftFlags,
    /// Per-request model override (must be on the allow-list).
    #[serde(default)]
    pub model: Option<String>,
    /// Goal label supplied by the caller's context.
    #[serde(default)]
    pub goal_label: Option<String>,
    /// Caller-supplied request id.
    #[serde(default)]
    pub request_id: Option<String>,
}

impl DraftRequest {
    /// Create a request from a brief.
    pub fn new(brief: impl Into<String>) -> Self {
        Self {
            brief: brief.into(),
            ..Default::default()
        }
    }

    /// Adapter input for the draft call.
    pub fn draft_input(&self) -> DraftInput {
        DraftInput {
            brief: self.brief.clone(),
            prior_graph: self.prior_graph.clone(),
            clarifier_rounds: self.clarifier_rounds,
            flags: self.flags.clone(),
        }
    }

    /// Goal inference hints.
    pub fn goal_hints(&self) -> GoalHints {
        let hints = GoalHints::from_brief(self.brief.clone());
        match self.goal_label.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
            Some(label) => hints.with_explicit(label),
            None => hints,
        }
    }
}

/// Degraded-path notice carried in the response trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineWarning {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl PipelineWarning {
    /// Create a warning.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Provider and model that served the draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    /// Provider name.
    pub provider: String,
    /// Draft model.
    pub model: String,
}

/// Draft stage summary.
#[derive(Debug, Clone, Serialize)]
pub struct DraftTrace {
    /// Draft attempts made.
    pub attempts: u32,
    /// Computed confidence.
    pub confidence: f64,
    /// Whether clarification continues.
    pub clarifier_status: ClarifierStatus,
    /// Questions passed through to the caller.
    pub clarifying_questions: Vec<String>,
    /// Edges whose strength was normalised.
    pub normalised_edges: usize,
    /// Token usage.
    pub usage: Usage,
    /// Draft call wall time.
    pub duration_ms: u64,
}

/// Model-assisted repair summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmRepairTrace {
    /// Violations remained after the sweep.
    pub needed: bool,
    /// The repair call was made.
    pub attempted: bool,
    /// The repaired graph was adopted.
    pub succeeded: bool,
    /// No time was left for the repair call.
    pub skipped_due_to_budget: bool,
    /// Budget decision taken on entry to the repair stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<RepairTimeout>,
    /// Why the repair call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Per-stage wall time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    /// Stage name.
    pub stage: &'static str,
    /// Stage wall time.
    pub duration_ms: u64,
}

/// Request state passed through the stages.
///
/// | Stage        | Reads                         | Writes                                  |
/// |--------------|-------------------------------|-----------------------------------------|
/// | draft        | `request`, `budget`, `cancel` | `graph`, `stash`, `draft`, `checkpoints` |
/// | repair       | `graph`, `budget`, `cancel`   | `graph`, `sweeps`, `llm_repair`, `warnings` |
/// | threshold    | `graph`                       | `graph`, `threshold`                    |
/// | enrichment   | `graph`                       | `graph`, `enrichment`, `warnings`       |
/// | validation   | `graph`, `stash`              | `graph`, `validation_issues`, `restored` |
pub struct PipelineContext {
    /// Resolved request id.
    pub request_id: String,
    /// Caller input.
    pub request: DraftRequest,
    /// Wall-clock budget for the request.
    pub budget: RequestBudget,
    /// Cancelled when the caller disconnects.
    pub cancel: CancellationToken,
    /// Provider and draft model.
    pub engine: EngineInfo,
    /// Set once the adapter is resolved.
    pub provenance: Option<Provenance>,
    /// Working graph.
    pub graph: Graph,
    /// Edge fields set aside during repair.
    pub stash: Option<Arc<EdgeFieldStash>>,
    /// Set after the draft stage.
    pub draft: Option<DraftTrace>,
    /// Rationales from the draft.
    pub rationales: Vec<Value>,
    /// One trace per deterministic sweep.
    pub sweeps: Vec<SweepTrace>,
    /// Model-backed repair outcome.
    pub llm_repair: LlmRepairTrace,
    /// Goal-threshold sweep outcome.
    pub threshold: ThresholdSweepTrace,
    /// Enrichment lists.
    pub enrichment: EnrichmentOutput,
    /// Validator findings on the working graph.
    pub validation_issues: Vec<ValidationIssue>,
    /// Stash restorations and other post-validation repairs.
    pub restored: Vec<RepairRecord>,
    /// Non-fatal degradations, in order.
    pub warnings: Vec<PipelineWarning>,
    /// Stage snapshots.
    pub checkpoints: CheckpointRecorder,
    /// Per-stage wall times.
    pub timings: Vec<StageTiming>,
    /// Fatal error that stopped the stage sequence.
    pub early_return: Option<PipelineError>,
}

impl PipelineContext {
    /// Fresh context for a request.
    pub fn new(
        request_id: impl Into<String>,
        request: DraftRequest,
        budget: RequestBudget,
        cancel: CancellationToken,
        checkpoints: CheckpointRecorder,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            request,
            budget,
            cancel,
            engine: EngineInfo::default(),
            provenance: None,
            graph: Graph::default(),
            stash: None,
            draft: None,
            rationales: Vec::new(),
            sweeps: Vec::new(),
            llm_repair: LlmRepairTrace::default(),
            threshold: ThresholdSweepTrace::default(),
            enrichment: EnrichmentOutput::default(),
            validation_issues: Vec::new(),
            restored: Vec::new(),
            warnings: Vec::new(),
            checkpoints,
            timings: Vec::new(),
            early_return: None,
        }
    }

    /// Whether a fatal error has stopped the pipeline.
    pub fn is_terminated(&self) -> bool {
        self.early_return.is_some()
    }

    /// Record a degraded-path warning.
    pub fn warn(&mut self, code: &str, message: impl Into<String>) {
        self.warnings.push(PipelineWarning::new(code, message));
    }

    /// Close the context into the trace carried by the response.
    pub fn into_parts(self) -> (Graph, PipelineTrace, ResponseExtras, Option<PipelineError>) {
        let trace = PipelineTrace {
            request_id: self.request_id,
            engine: self.engine,
            provenance: self.provenance,
            draft: self.draft,
            repair: self.sweeps,
            llm_repair: self.llm_repair,
            threshold_sweep: self.threshold,
            restored: self.restored,
            warnings: self.warnings,
            checkpoints: self.checkpoints.finish(),
            timings: self.timings,
            elapsed_ms: self.budget.elapsed_ms(),
        };
        let extras = ResponseExtras {
            rationales: self.rationales,
            enrichment: self.enrichment,
            validation_issues: self.validation_issues,
        };
        (self.graph, trace, extras, self.early_return)
    }
}

/// Trace metadata attached to every response.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineTrace {
    /// Resolved request id.
    pub request_id: String,
    /// Provider and draft model.
    pub engine: EngineInfo,
    /// Prompt and model provenance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Draft stage outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<DraftTrace>,
    /// Deterministic repair sweeps.
    pub repair: Vec<SweepTrace>,
    /// Model-backed repair outcome.
    pub llm_repair: LlmRepairTrace,
    /// Goal-threshold sweep outcome.
    pub threshold_sweep: ThresholdSweepTrace,
    /// Edge fields restored from the stash.
    pub restored: Vec<RepairRecord>,
    /// Non-fatal degradations.
    pub warnings: Vec<PipelineWarning>,
    /// Stage snapshots after the size guard.
    pub checkpoints: CheckpointSet,
    /// Per-stage wall times.
    pub timings: Vec<StageTiming>,
    /// Total wall time.
    pub elapsed_ms: u64,
}

/// Non-graph content that flows into a success envelope.
#[derive(Debug, Clone, Default)]
pub struct ResponseExtras {
    /// Rationales from the draft.
    pub rationales: Vec<Value>,
    /// Enrichment lists after capping.
    pub enrichment: EnrichmentOutput,
    /// Validator findings on the final graph.
    pub validation_issues: Vec<ValidationIssue>,
}

impl PipelineTrace {
    /// Confidence reported by the draft stage, if it ran.
    pub fn confidence(&self) -> Option<f64> {
        self.draft.as_ref().map(|d| d.confidence)
    }
}
