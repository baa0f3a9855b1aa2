//! Draft stage.
//!
//! Calls [`LlmAdapter::draft_graph`] under a per-attempt timeout. A body
//! timeout is retried with backoff until `draft_max_attempts` is reached;
//! a pre-aborted timeout is never retried and surfaces as a client
//! disconnect. A successful response is shape-checked before anything else
//! happens to it, then stashed, normalised and scored.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::{backoff_delay, CallOptions, DraftInput, LlmAdapter, TimeoutPhase, Usage};
use crate::checkpoint::{Checkpoint, CheckpointStage};
use crate::config::PipelineConfig;
use crate::error::{AdapterError, PipelineError, PipelineResult};
use crate::graph::{assert_graph_shape, EdgeFieldStash, Graph, NodeKind};
use crate::pipeline::budget::RequestBudget;
use crate::repair::edges::{has_nested_strength, normalize_edge_strengths};

/// Confidence when the model does not report one.
const BASE_CONFIDENCE: f64 = 0.7;

/// Whether the caller should be asked to clarify the brief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarifierStatus {
    /// Confidence reached the threshold.
    Confident,
    /// Low confidence, but no clarification rounds are left.
    MaxRounds,
    /// Low confidence; clarification is still possible.
    Complete,
}

/// Pick the clarifier status. Never blocks the pipeline.
pub fn clarifier_status(
    confidence: f64,
    rounds_used: u32,
    threshold: f64,
    max_rounds: u32,
) -> ClarifierStatus {
    if confidence >= threshold {
        ClarifierStatus::Confident
    } else if rounds_used >= max_rounds {
        ClarifierStatus::MaxRounds
    } else {
        ClarifierStatus::Complete
    }
}

/// Heuristic confidence in `[0,1]`.
///
/// Starts from the model's own figure and deducts for missing structure
/// and for open questions.
pub fn compute_confidence(reported: Option<f64>, graph: &Graph, questions: usize) -> f64 {
    let mut confidence = reported
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(BASE_CONFIDENCE);
    if !graph.has_kind(NodeKind::Goal) {
        confidence -= 0.1;
    }
    if !graph.has_kind(NodeKind::Decision) {
        confidence -= 0.1;
    }
    match graph.nodes_of_kind(NodeKind::Option).count() {
        0 => confidence -= 0.15,
        1 => confidence -= 0.05,
        _ => {}
    }
    if graph.edges.is_empty() {
        confidence -= 0.2;
    }
    confidence -= (questions as f64 * 0.05).min(0.15);
    confidence.clamp(0.0, 1.0)
}

/// Everything the draft stage hands to the rest of the pipeline.
#[derive(Debug, Clone)]
pub struct DraftOutcome {
    /// Normalised graph.
    pub graph: Graph,
    /// Frozen post-draft edge fields.
    pub stash: Arc<EdgeFieldStash>,
    /// Rationales returned by the model.
    pub rationales: Vec<serde_json::Value>,
    /// Token usage of the successful attempt.
    pub usage: Usage,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    /// Whether clarification continues.
    pub clarifier_status: ClarifierStatus,
    /// Questions for the caller, if any.
    pub clarifying_questions: Vec<String>,
    /// Adapter calls made, successful one included.
    pub attempts: u32,
    /// Edges whose nested strength object was lifted.
    pub normalised_edges: usize,
    /// `post_adapter_normalisation` and `post_normalisation`.
    pub checkpoints: Vec<Checkpoint>,
    /// Wall time of the call including retries.
    pub duration_ms: u64,
}

/// Stage wrapper around the adapter's draft call.
pub struct DraftStage<'a> {
    adapter: &'a dyn LlmAdapter,
    config: &'a PipelineConfig,
}

impl<'a> DraftStage<'a> {
    /// Create the stage.
    pub fn new(adapter: &'a dyn LlmAdapter, config: &'a PipelineConfig) -> Self {
        Self { adapter, config }
    }

    /// Draft, retry on body timeouts, then shape-check and normalise.
    pub async fn run(
        &self,
        input: &DraftInput,
        budget: &RequestBudget,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<DraftOutcome> {
        let start = Instant::now();
        let max_attempts = self.config.draft_max_attempts.max(1);
        let mut attempt = 0;

        let response = loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(PipelineError::ClientDisconnected {
                    stage: "draft".to_string(),
                });
            }
            budget.ensure_within("draft")?;

            let timeout = self.config.draft_timeout().min(budget.remaining());
            let opts = CallOptions::new(request_id, timeout, cancel.clone());
            let call_start = Instant::now();
            let result = match tokio::time::timeout(timeout, self.adapter.draft_graph(input, &opts)).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::UpstreamTimeout {
                    phase: TimeoutPhase::Body,
                    elapsed_ms: call_start.elapsed().as_millis() as u64,
                }),
            };

            match result {
                Ok(response) => break response,
                Err(AdapterError::UpstreamTimeout {
                    phase: TimeoutPhase::PreAborted,
                    ..
                }) => {
                    warn!(request_id = %request_id, attempt, "Client disconnected before draft call");
                    return Err(PipelineError::ClientDisconnected {
                        stage: "draft".to_string(),
                    });
                }
                Err(AdapterError::UpstreamTimeout {
                    phase: TimeoutPhase::Body,
                    elapsed_ms,
                }) => {
                    if attempt >= max_attempts {
                        return Err(PipelineError::Timeout {
                            attempts: attempt,
                            message: format!("draft timed out after {}ms", elapsed_ms),
                        });
                    }
                    let delay = backoff_delay(attempt, &self.config.retry);
                    warn!(
                        request_id = %request_id,
                        attempt,
                        elapsed_ms,
                        delay_ms = delay.as_millis() as u64,
                        "Draft call timed out, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(PipelineError::ClientDisconnected {
                                stage: "draft".to_string(),
                            });
                        }
                        _ = tokio::time::sleep(delay.min(budget.remaining())) => {}
                    }
                }
                Err(other) => return Err(other.into()),
            }
        };

        // Shape first: no stash is created for a malformed payload.
        assert_graph_shape(&response.graph).map_err(|violation| PipelineError::StructuralInvalid {
            reason: "malformed_graph".to_string(),
            message: violation.to_string(),
            missing_kinds: Vec::new(),
        })?;
        let mut graph: Graph =
            serde_json::from_value(response.graph).map_err(|e| PipelineError::StructuralInvalid {
                reason: "malformed_graph".to_string(),
                message: format!("graph does not match the node/edge schema: {}", e),
                missing_kinds: Vec::new(),
            })?;

        let mut checkpoints = Vec::with_capacity(2);
        checkpoints.push(
            Checkpoint::capture(CheckpointStage::PostAdapterNormalisation, &graph)
                .with_nested_strength(has_nested_strength(&graph)),
        );
        let stash = Arc::new(EdgeFieldStash::capture(&graph));
        let normalised_edges = normalize_edge_strengths(&mut graph);
        checkpoints.push(Checkpoint::capture(CheckpointStage::PostNormalisation, &graph));

        let confidence = compute_confidence(
            response.confidence,
            &graph,
            response.clarifying_questions.len(),
        );
        let status = clarifier_status(
            confidence,
            input.clarifier_rounds,
            self.config.confidence_threshold,
            self.config.max_clarifier_rounds,
        );

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            request_id = %request_id,
            attempts = attempt,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            normalised_edges,
            confidence,
            clarifier = ?status,
            duration_ms,
            "Draft stage completed"
        );

        Ok(DraftOutcome {
            graph,
            stash,
            rationales: response.rationales,
            usage: response.usage,
            confidence,
            clarifier_status: status,
            clarifying_questions: response.clarifying_questions,
            attempts: attempt,
            normalised_edges,
            checkpoints,
            duration_ms,
        })
    }
}

/// Keeps tests from sleeping on real backoff.
#[cfg(test)]
pub(crate) fn fast_retry_config() -> PipelineConfig {
    PipelineConfig {
        retry: crate::adapter::RetryPolicy {
            base_ms: 1,
            factor: 1.0,
            max_ms: 1,
            jitter_pct: 0,
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{DraftResponse, MockLlmAdapter};
    use serde_json::json;
    use std::time::Duration;

    fn draft_graph_json() -> serde_json::Value {
        json!({
            "nodes": [
                {"id": "goal_1", "kind": "goal", "label": "Grow revenue"},
                {"id": "dec_1", "kind": "decision", "label": "Pricing"},
                {"id": "opt_a", "kind": "option", "label": "Raise"},
                {"id": "opt_b", "kind": "option", "label": "Hold"},
                {"id": "fac_price", "kind": "factor", "label": "Price"},
                {"id": "out_rev", "kind": "outcome", "label": "Revenue"}
            ],
            "edges": [
                {"id": "struct_a", "from": "dec_1", "to": "opt_a"},
                {"id": "causal_1", "from": "fac_price", "to": "out_rev", "strength": {"mean": 0.6, "std": 0.1}, "belief_exists": 0.8}
            ]
        })
    }

    fn ok_response() -> DraftResponse {
        DraftResponse {
            graph: draft_graph_json(),
            confidence: Some(0.95),
            ..Default::default()
        }
    }

    fn body_timeout() -> AdapterError {
        AdapterError::UpstreamTimeout {
            phase: TimeoutPhase::Body,
            elapsed_ms: 30_000,
        }
    }

    async fn run(adapter: &MockLlmAdapter, config: &PipelineConfig) -> PipelineResult<DraftOutcome> {
        let budget = RequestBudget::start(Duration::from_secs(90));
        DraftStage::new(adapter, config)
            .run(&DraftInput::default(), &budget, "req-test", &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_success_normalises_and_stashes() {
        let mut adapter = MockLlmAdapter::new();
        adapter.expect_draft_graph().times(1).returning(|_, _| Ok(ok_response()));

        let outcome = run(&adapter, &fast_retry_config()).await.unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.normalised_edges, 1);
        let causal = outcome.graph.edges.iter().find(|e| e.from == "fac_price").unwrap();
        assert_eq!(causal.strength_mean, Some(0.6));
        assert_eq!(outcome.stash.by_id("causal_1").unwrap().strength_mean, Some(0.6));
        assert_eq!(outcome.checkpoints.len(), 2);
        assert_eq!(outcome.checkpoints[0].nested_strength_detected, Some(true));
        assert_eq!(outcome.checkpoints[1].stage, CheckpointStage::PostNormalisation);
        assert_eq!(outcome.clarifier_status, ClarifierStatus::Confident);
    }

    #[tokio::test]
    async fn test_pre_aborted_never_retried() {
        let mut adapter = MockLlmAdapter::new();
        adapter.expect_draft_graph().times(1).returning(|_, _| {
            Err(AdapterError::UpstreamTimeout {
                phase: TimeoutPhase::PreAborted,
                elapsed_ms: 0,
            })
        });

        let err = run(&adapter, &fast_retry_config()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ClientDisconnected { .. }));
    }

    #[tokio::test]
    async fn test_body_timeout_retried_once_then_fatal() {
        let mut adapter = MockLlmAdapter::new();
        adapter.expect_draft_graph().times(2).returning(|_, _| Err(body_timeout()));

        let err = run(&adapter, &fast_retry_config()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { attempts: 2, .. }));
        assert_eq!(err.code().http_status(), 504);
    }

    #[tokio::test]
    async fn test_body_timeout_then_success() {
        let mut adapter = MockLlmAdapter::new();
        let mut seq = mockall::Sequence::new();
        adapter
            .expect_draft_graph()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(body_timeout()));
        adapter
            .expect_draft_graph()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ok_response()));

        let outcome = run(&adapter, &fast_retry_config()).await.unwrap();
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_http_error_not_retried() {
        let mut adapter = MockLlmAdapter::new();
        adapter.expect_draft_graph().times(1).returning(|_, _| {
            Err(AdapterError::UpstreamHttp {
                status: 429,
                message: "slow down".to_string(),
            })
        });

        let err = run(&adapter, &fast_retry_config()).await.unwrap_err();
        assert_eq!(err.code().as_str(), "CEE_LLM_UPSTREAM_ERROR");
        assert_eq!(err.code().http_status(), 502);
    }

    #[tokio::test]
    async fn test_malformed_graph_fails_fast() {
        let mut adapter = MockLlmAdapter::new();
        adapter.expect_draft_graph().times(1).returning(|_, _| {
            Ok(DraftResponse {
                graph: json!({"nodes": {}, "edges": []}),
                ..Default::default()
            })
        });

        let err = run(&adapter, &fast_retry_config()).await.unwrap_err();
        match err {
            PipelineError::StructuralInvalid { reason, .. } => assert_eq!(reason, "malformed_graph"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spent_budget_stops_before_call() {
        let mut adapter = MockLlmAdapter::new();
        adapter.expect_draft_graph().times(0);
        let config = fast_retry_config();
        let budget = RequestBudget::start(Duration::ZERO);
        let err = DraftStage::new(&adapter, &config)
            .run(&DraftInput::default(), &budget, "req", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::BudgetExceeded { .. }));
    }

    #[test]
    fn test_clarifier_status_bands() {
        assert_eq!(clarifier_status(0.9, 0, 0.9, 3), ClarifierStatus::Confident);
        assert_eq!(clarifier_status(0.5, 3, 0.9, 3), ClarifierStatus::MaxRounds);
        assert_eq!(clarifier_status(0.5, 1, 0.9, 3), ClarifierStatus::Complete);
    }

    #[test]
    fn test_confidence_penalties_and_clamp() {
        let empty = Graph::default();
        assert_eq!(compute_confidence(Some(0.3), &empty, 5), 0.0);
        let graph: Graph = serde_json::from_value(draft_graph_json()).unwrap();
        assert!((compute_confidence(None, &graph, 0) - 0.7).abs() < 1e-9);
        assert!((compute_confidence(Some(2.0), &graph, 1) - 0.95).abs() < 1e-9);
    }
}
