//! Pipeline orchestrator.
//!
//! Stages run in a fixed order over one [`PipelineContext`]:
//!
//! 1. draft (model call, retry, normalisation)
//! 2. repair (deterministic sweep, optional model-assisted repair)
//! 3. threshold sweep
//! 4. enrichment
//! 5. validation (stash restoration, strict mode)
//! 6. finalize (acceptance gate, envelopes)
//!
//! A stage error sets `early_return` and nothing after it runs.

pub mod budget;
pub mod context;

pub use budget::{compute_repair_timeout, RepairTimeout, RequestBudget};
pub use context::{DraftRequest, PipelineContext, PipelineTrace, PipelineWarning};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{
    select_model, AdapterRegistry, CallOptions, LlmAdapter, ModelTask, RepairInput, TimeoutPhase,
};
use crate::checkpoint::{CheckpointRecorder, CheckpointStage, Provenance};
use crate::config::{Config, ModelConfig, PipelineConfig, PromptConfig, ResponseLimits};
use crate::draft::DraftStage;
use crate::enrichment::{Enricher, NoopEnricher};
use crate::error::{AdapterError, AppError, PipelineError, PipelineResult};
use crate::graph::{assert_graph_shape, EdgeOrigin, Graph, ProvenanceSource};
use crate::repair::{self, caps, edges, RepairCode, RepairEngine, RepairRecord};
use crate::response::{finalize, FinalResponse};
use crate::threshold::sweep_thresholds;
use crate::validate::{StructuralValidator, Validator};
use context::{
    DraftTrace, EngineInfo, StageTiming, ENRICHMENT_FAILED, ENRICHMENT_SKIPPED_BUDGET, LLM_REPAIR_DISABLED,
    LLM_REPAIR_FAILED, LLM_REPAIR_SKIPPED_BUDGET, STRUCTURAL_WARNING,
};

/// Provenance string stamped on enrichment edges.
pub const ENRICHMENT_PROVENANCE: &str = "enrichment";

/// The draft pipeline with its injected collaborators.
pub struct Pipeline {
    config: PipelineConfig,
    models: ModelConfig,
    prompts: PromptConfig,
    limits: ResponseLimits,
    registry: Arc<AdapterRegistry>,
    validator: Arc<dyn Validator>,
    enricher: Arc<dyn Enricher>,
}

impl Pipeline {
    /// Create a pipeline with the structural validator and no enrichment.
    pub fn new(config: PipelineConfig, registry: Arc<AdapterRegistry>) -> Self {
        Self {
            config,
            models: ModelConfig::default(),
            prompts: PromptConfig::default(),
            limits: ResponseLimits::default(),
            registry,
            validator: Arc::new(StructuralValidator::new()),
            enricher: Arc::new(NoopEnricher),
        }
    }

    /// Create a pipeline from application configuration.
    pub fn from_config(config: &Config, registry: Arc<AdapterRegistry>) -> Self {
        Self::new(config.pipeline.clone(), registry)
            .with_models(config.models.clone())
            .with_prompts(config.prompts.clone())
            .with_limits(config.limits)
    }

    /// Set model selection inputs.
    pub fn with_models(mut self, models: ModelConfig) -> Self {
        self.models = models;
        self
    }

    /// Set prompt provenance inputs.
    pub fn with_prompts(mut self, prompts: PromptConfig) -> Self {
        self.prompts = prompts;
        self
    }

    /// Set response list limits.
    pub fn with_limits(mut self, limits: ResponseLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Replace the validator.
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replace the enrichment collaborator.
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = enricher;
        self
    }

    /// Run a request end to end. Never fails: errors become envelopes.
    pub async fn run(&self, request: DraftRequest, cancel: CancellationToken) -> FinalResponse {
        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let budget = RequestBudget::start(Duration::from_millis(self.config.request_budget_ms));
        let recorder = CheckpointRecorder::new(
            self.config.checkpoints_enabled,
            self.config.checkpoint_byte_budget,
        );
        let mut ctx = PipelineContext::new(request_id, request, budget, cancel, recorder);

        info!(request_id = %ctx.request_id, brief_len = ctx.request.brief.len(), "Draft request received");
        if let Err(err) = self.execute(&mut ctx).await {
            ctx.early_return = Some(err);
        }

        let (graph, trace, extras, error) = ctx.into_parts();
        finalize(graph, trace, extras, error, &self.limits)
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let (draft_adapter, repair_adapter) = self.resolve_adapters(ctx)?;

        let start = Instant::now();
        self.draft_stage(ctx, draft_adapter.as_ref()).await?;
        self.timed(ctx, "draft", start);

        ensure_connected(&ctx.cancel, "repair")?;
        let start = Instant::now();
        self.repair_stage(ctx, repair_adapter.as_ref()).await?;
        self.timed(ctx, "repair", start);

        let start = Instant::now();
        ctx.threshold = sweep_thresholds(Some(&mut ctx.graph));
        self.timed(ctx, "threshold", start);

        ensure_connected(&ctx.cancel, "enrichment")?;
        let start = Instant::now();
        self.enrichment_stage(ctx).await;
        self.timed(ctx, "enrichment", start);

        let start = Instant::now();
        self.validation_stage(ctx)?;
        self.timed(ctx, "validation", start);

        ctx.checkpoints.record(CheckpointStage::PreBoundary, &ctx.graph);
        Ok(())
    }

    fn timed(&self, ctx: &mut PipelineContext, stage: &'static str, start: Instant) {
        ctx.timings.push(StageTiming {
            stage,
            duration_ms: start.elapsed().as_millis() as u64,
        });
    }

    /// Reads: `request`. Writes: `engine`, `provenance`.
    fn resolve_adapters(
        &self,
        ctx: &mut PipelineContext,
    ) -> PipelineResult<(Arc<dyn LlmAdapter>, Arc<dyn LlmAdapter>)> {
        let draft = select_model(ModelTask::Draft, ctx.request.model.as_deref(), &self.models);
        let repair = select_model(ModelTask::Repair, None, &self.models);

        let to_internal = |e: AppError| PipelineError::Internal {
            message: e.to_string(),
        };
        let draft_adapter = self
            .registry
            .get(&self.models.provider, &draft.model)
            .map_err(to_internal)?;
        let repair_adapter = self
            .registry
            .get(&self.models.provider, &repair.model)
            .map_err(to_internal)?;

        ctx.engine = EngineInfo {
            provider: draft_adapter.provider().to_string(),
            model: draft_adapter.model().to_string(),
        };
        ctx.llm_repair.model = Some(repair.model.clone());
        ctx.provenance = Some(Provenance::assemble(&self.prompts, draft, repair));
        Ok((draft_adapter, repair_adapter))
    }

    /// Reads: `request`, `budget`, `cancel`. Writes: `graph`, `stash`, `draft`, `checkpoints`.
    async fn draft_stage(&self, ctx: &mut PipelineContext, adapter: &dyn LlmAdapter) -> PipelineResult<()> {
        let input = ctx.request.draft_input();
        let outcome = DraftStage::new(adapter, &self.config)
            .run(&input, &ctx.budget, &ctx.request_id, &ctx.cancel)
            .await?;

        for checkpoint in outcome.checkpoints {
            ctx.checkpoints.push(checkpoint);
        }
        ctx.draft = Some(DraftTrace {
            attempts: outcome.attempts,
            confidence: outcome.confidence,
            clarifier_status: outcome.clarifier_status,
            clarifying_questions: outcome.clarifying_questions,
            normalised_edges: outcome.normalised_edges,
            usage: outcome.usage,
            duration_ms: outcome.duration_ms,
        });
        ctx.rationales = outcome.rationales;
        ctx.stash = Some(outcome.stash);
        ctx.graph = outcome.graph;
        Ok(())
    }

    /// Reads: `graph`, `budget`, `cancel`. Writes: `graph`, `sweeps`, `llm_repair`, `warnings`.
    async fn repair_stage(&self, ctx: &mut PipelineContext, adapter: &dyn LlmAdapter) -> PipelineResult<()> {
        let hints = ctx.request.goal_hints();
        let engine = RepairEngine::new(self.config.repair_config()).with_validator(self.validator.as_ref());

        // Decided once on entry; deterministic repair runs either way.
        let timeout = ctx.budget.repair_timeout(&self.config);
        ctx.llm_repair.timeout = Some(timeout);
        ctx.llm_repair.skipped_due_to_budget = timeout.skip_due_to_budget;

        let trace = engine.sweep("deterministic", &mut ctx.graph, &hints);
        ctx.checkpoints.record(CheckpointStage::PostRepair, &ctx.graph);
        let needs_model = trace.llm_repair_needed();
        let unresolved: Vec<_> = trace.unresolved().into_iter().cloned().collect();
        ctx.sweeps.push(trace);

        if needs_model {
            ctx.llm_repair.needed = true;
            if self.llm_repair(ctx, adapter, unresolved, timeout).await? {
                let trace = engine.sweep("post_llm_repair", &mut ctx.graph, &hints);
                ctx.sweeps.push(trace);
            }
            if ctx.sweeps.last().map(|t| t.llm_repair_needed()).unwrap_or(false) {
                let codes: Vec<&str> = ctx
                    .sweeps
                    .last()
                    .map(|t| t.unresolved().iter().map(|v| v.code.as_str()).collect())
                    .unwrap_or_default();
                let message = format!("unresolved structural violations: {}", codes.join(", "));
                ctx.warn(STRUCTURAL_WARNING, message);
            }
        }

        ctx.checkpoints.record(CheckpointStage::PostStabilisation, &ctx.graph);
        Ok(())
    }

    /// Model-assisted repair. Returns true when the graph was replaced.
    /// Only a client disconnect is fatal; a spent budget skips the call.
    async fn llm_repair(
        &self,
        ctx: &mut PipelineContext,
        adapter: &dyn LlmAdapter,
        violations: Vec<crate::detect::Violation>,
        timeout: RepairTimeout,
    ) -> PipelineResult<bool> {
        if !self.config.llm_repair_enabled {
            ctx.warn(LLM_REPAIR_DISABLED, "model-assisted repair is disabled");
            return Ok(false);
        }
        ensure_connected(&ctx.cancel, "repair")?;

        if timeout.skip_due_to_budget {
            warn!(
                request_id = %ctx.request_id,
                remaining_ms = timeout.remaining_ms,
                "Skipping model-assisted repair, budget too low"
            );
            ctx.warn(
                LLM_REPAIR_SKIPPED_BUDGET,
                format!("{}ms left after headroom", timeout.remaining_ms),
            );
            return Ok(false);
        }

        ctx.llm_repair.attempted = true;
        let input = RepairInput {
            brief: ctx.request.brief.clone(),
            graph: ctx.graph.clone(),
            violations,
        };
        let opts = CallOptions::new(ctx.request_id.clone(), timeout.duration(), ctx.cancel.clone());
        let call_start = Instant::now();
        let result = match tokio::time::timeout(timeout.duration(), adapter.repair_graph(&input, &opts)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::UpstreamTimeout {
                phase: TimeoutPhase::Body,
                elapsed_ms: call_start.elapsed().as_millis() as u64,
            }),
        };

        let repaired = match result {
            Ok(response) => parse_repaired_graph(response.graph),
            Err(AdapterError::UpstreamTimeout {
                phase: TimeoutPhase::PreAborted,
                ..
            }) => {
                return Err(PipelineError::ClientDisconnected {
                    stage: "repair".to_string(),
                });
            }
            Err(e) => Err(e.to_string()),
        };

        match repaired {
            Ok(mut graph) => {
                edges::normalize_edge_strengths(&mut graph);
                ctx.graph = graph;
                ctx.llm_repair.succeeded = true;
                info!(
                    request_id = %ctx.request_id,
                    latency_ms = call_start.elapsed().as_millis() as u64,
                    "Model-assisted repair applied"
                );
                Ok(true)
            }
            Err(message) => {
                warn!(request_id = %ctx.request_id, error = %message, "Model-assisted repair failed");
                ctx.llm_repair.error = Some(message.clone());
                ctx.warn(LLM_REPAIR_FAILED, message);
                Ok(false)
            }
        }
    }

    /// Reads: `graph`, `request`, `budget`. Writes: `graph`, `enrichment`, `warnings`.
    async fn enrichment_stage(&self, ctx: &mut PipelineContext) {
        let remaining = ctx.budget.remaining();
        if remaining.is_zero() {
            warn!(
                request_id = %ctx.request_id,
                elapsed_ms = ctx.budget.elapsed_ms(),
                budget_ms = ctx.budget.budget_ms(),
                "Skipping enrichment, request budget spent"
            );
            let message = format!("{}ms elapsed of {}ms", ctx.budget.elapsed_ms(), ctx.budget.budget_ms());
            ctx.warn(ENRICHMENT_SKIPPED_BUDGET, message);
            return;
        }

        let result = match tokio::time::timeout(remaining, self.enricher.enrich(&ctx.graph, &ctx.request.brief)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(request_id = %ctx.request_id, "Enrichment ran past the request budget");
                ctx.warn(
                    ENRICHMENT_FAILED,
                    format!("enrichment exceeded the remaining {}ms", remaining.as_millis()),
                );
                return;
            }
        };
        let mut output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(request_id = %ctx.request_id, error = %e, "Enrichment failed");
                ctx.warn(ENRICHMENT_FAILED, e.to_string());
                return;
            }
        };

        let added = std::mem::take(&mut output.added_edges);
        let mut merged = 0;
        for mut edge in added {
            if ctx.graph.node(&edge.from).is_none()
                || ctx.graph.node(&edge.to).is_none()
                || ctx.graph.has_edge(&edge.from, &edge.to)
            {
                continue;
            }
            edge.origin = Some(EdgeOrigin::Enrichment);
            edge.provenance_source = Some(ProvenanceSource::Synthetic);
            edge.provenance = Some(ENRICHMENT_PROVENANCE.to_string());
            ctx.graph.edges.push(edge);
            merged += 1;
        }
        if merged > 0 {
            ctx.restored.extend(caps::enforce_caps(&mut ctx.graph, &self.config.detector_config()));
            ctx.restored.extend(repair::canonicalise_edges(&mut ctx.graph));
            self.restore_from_stash(ctx, "enrichment");
        }
        info!(request_id = %ctx.request_id, edges_merged = merged, "Enrichment completed");
        ctx.enrichment = output;
    }

    /// Reads: `graph`, `stash`. Writes: `graph`, `validation_issues`, `restored`.
    fn validation_stage(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let result = self.validator.validate(&ctx.graph);
        if let Some(normalized) = result.normalized.clone() {
            ctx.graph = normalized;
        }
        self.restore_from_stash(ctx, "validation");

        ctx.validation_issues = result
            .errors
            .iter()
            .chain(result.warnings.iter())
            .cloned()
            .collect();

        if !result.valid && self.config.strict_validation {
            let codes: Vec<String> = result.errors.iter().map(|i| i.code.clone()).collect();
            return Err(PipelineError::ValidationFailed {
                message: format!("{} validation error(s)", codes.len()),
                codes,
            });
        }
        info!(
            request_id = %ctx.request_id,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Validation completed"
        );
        Ok(())
    }

    fn restore_from_stash(&self, ctx: &mut PipelineContext, after: &str) {
        let Some(stash) = ctx.stash.clone() else { return };
        let restored = stash.restore_missing(&mut ctx.graph);
        if restored > 0 {
            warn!(request_id = %ctx.request_id, restored, after = %after, "Restored edge fields from stash");
            ctx.restored.push(RepairRecord::new(
                RepairCode::EdgeFieldsRestored,
                format!("{} edge(s) after {}", restored, after),
            ));
        }
    }
}

fn ensure_connected(cancel: &CancellationToken, stage: &str) -> PipelineResult<()> {
    if cancel.is_cancelled() {
        return Err(PipelineError::ClientDisconnected {
            stage: stage.to_string(),
        });
    }
    Ok(())
}

fn parse_repaired_graph(raw: serde_json::Value) -> Result<Graph, String> {
    assert_graph_shape(&raw).map_err(|v| format!("repaired graph malformed: {}", v))?;
    serde_json::from_value(raw).map_err(|e| format!("repaired graph malformed: {}", e))
}
