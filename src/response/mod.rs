//! Response finalizer.
//!
//! The acceptance gate runs on the final graph regardless of what the
//! stages reported: an empty graph and a graph where no decision links a
//! goal to an option are both rejected as `CEE_GRAPH_INVALID`. Every
//! pipeline error becomes a `cee.error.v1` envelope; upstream failures are
//! never passed through raw.

pub mod quality;

pub use quality::{score, QualityComponents, QualityScore};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::ResponseLimits;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::{Graph, NodeKind};
use crate::pipeline::context::{PipelineTrace, ResponseExtras};

/// Error envelope schema tag.
pub const ERROR_SCHEMA: &str = "cee.error.v1";

/// What the caller receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// JSON body.
    pub body: Value,
}

impl FinalResponse {
    /// Whether this is a success envelope.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Fixed-shape error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    /// Always `cee.error.v1`.
    pub schema: &'static str,
    /// Always `cee`.
    pub source: &'static str,
    /// Error code.
    pub code: crate::error::CeeErrorCode,
    /// Human-readable detail.
    pub message: String,
    /// Whether the caller may retry.
    pub retryable: bool,
    /// Code-specific detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorEnvelope {
    /// Envelope for a pipeline error.
    pub fn from_error(err: &PipelineError) -> Self {
        let code = err.code();
        Self {
            schema: ERROR_SCHEMA,
            source: "cee",
            code,
            message: err.to_string(),
            retryable: code.is_retryable(),
            details: err.details(),
        }
    }
}

/// Map a pipeline error onto the caller-facing response.
pub fn error_response(err: &PipelineError, request_id: &str) -> FinalResponse {
    let envelope = ErrorEnvelope::from_error(err);
    let mut body = serde_json::to_value(&envelope).unwrap_or_else(|_| json!({}));
    body["request_id"] = json!(request_id);
    FinalResponse {
        status_code: envelope.code.http_status(),
        body,
    }
}

/// Post-repair acceptance gate.
pub fn acceptance_gate(graph: &Graph) -> PipelineResult<()> {
    if graph.is_empty() {
        return Err(PipelineError::StructuralInvalid {
            reason: "empty_graph".to_string(),
            message: "the graph has no nodes".to_string(),
            missing_kinds: Vec::new(),
        });
    }

    let goals: Vec<&str> = graph.nodes_of_kind(NodeKind::Goal).map(|n| n.id.as_str()).collect();
    let connected = graph.nodes_of_kind(NodeKind::Decision).any(|decision| {
        let downstream = graph.reachable_from(&decision.id);
        let reaches_option = downstream
            .iter()
            .any(|id| graph.kind_of(id) == Some(NodeKind::Option));
        let linked_to_goal = goals.iter().any(|goal| {
            downstream.contains(*goal) || graph.reachable_from(goal).contains(&decision.id)
        });
        reaches_option && linked_to_goal
    });
    if connected {
        return Ok(());
    }

    let missing_kinds: Vec<String> = [NodeKind::Goal, NodeKind::Decision, NodeKind::Option]
        .into_iter()
        .filter(|kind| !graph.has_kind(*kind))
        .map(|kind| kind.as_str().to_string())
        .collect();
    Err(PipelineError::StructuralInvalid {
        reason: "incomplete_structure".to_string(),
        message: "no decision links a goal to an option".to_string(),
        missing_kinds,
    })
}

/// Max and truncation flag for one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListLimit {
    /// Configured cap.
    pub max: usize,
    /// Whether the list was cut.
    pub truncated: bool,
}

/// Truncate `items` to `max`.
pub fn truncate_list<T>(mut items: Vec<T>, max: usize) -> (Vec<T>, ListLimit) {
    let truncated = items.len() > max;
    items.truncate(max);
    (items, ListLimit { max, truncated })
}

/// `{name}_max` / `{name}_truncated` pairs for the response.
fn limits_json(pairs: &[(&str, ListLimit)]) -> Value {
    let mut out = serde_json::Map::new();
    for (name, limit) in pairs {
        out.insert(format!("{}_max", name), json!(limit.max));
        out.insert(format!("{}_truncated", name), json!(limit.truncated));
    }
    Value::Object(out)
}

/// Build the final response from a graph, its trace and an optional fatal error.
pub fn finalize(
    graph: Graph,
    trace: PipelineTrace,
    extras: ResponseExtras,
    error: Option<PipelineError>,
    limits: &ResponseLimits,
) -> FinalResponse {
    if let Some(err) = error {
        warn!(request_id = %trace.request_id, code = %err.code(), error = %err, "Request failed");
        return error_response(&err, &trace.request_id);
    }
    if let Err(err) = acceptance_gate(&graph) {
        warn!(request_id = %trace.request_id, error = %err, "Graph rejected by acceptance gate");
        return error_response(&err, &trace.request_id);
    }

    let request_id = trace.request_id.clone();
    let quality = score(&graph, trace.confidence());

    let options: Vec<Value> = graph
        .nodes_of_kind(NodeKind::Option)
        .map(|n| json!({ "id": n.id, "label": n.label }))
        .collect();
    let (options, options_limit) = truncate_list(options, limits.options_max);
    let (bias, bias_limit) = truncate_list(extras.enrichment.bias_findings, limits.bias_findings_max);
    let (evidence, evidence_limit) = truncate_list(
        extras.enrichment.evidence_suggestions,
        limits.evidence_suggestions_max,
    );
    let (sensitivity, sensitivity_limit) = truncate_list(
        extras.enrichment.sensitivity_suggestions,
        limits.sensitivity_suggestions_max,
    );

    let mut body = json!({
        "graph": graph,
        "trace": trace,
        "quality": quality,
        "options": options,
        "bias_findings": bias,
        "evidence_suggestions": evidence,
        "sensitivity_suggestions": sensitivity,
        "response_limits": limits_json(&[
            ("bias_findings", bias_limit),
            ("options", options_limit),
            ("evidence_suggestions", evidence_limit),
            ("sensitivity_suggestions", sensitivity_limit),
        ]),
    });
    if !extras.rationales.is_empty() {
        body["rationales"] = json!(extras.rationales);
    }
    if !extras.validation_issues.is_empty() {
        body["validation_issues"] = json!(extras.validation_issues);
    }

    info!(
        request_id = %request_id,
        quality = quality.overall,
        "Response finalized"
    );
    FinalResponse {
        status_code: 200,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointRecorder;
    use crate::enrichment::EnrichmentOutput;
    use crate::error::AdapterError;
    use crate::graph::{Edge, Node};
    use crate::pipeline::budget::RequestBudget;
    use crate::pipeline::context::{DraftRequest, PipelineContext};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn context_with(graph: Graph) -> PipelineContext {
        let mut ctx = PipelineContext::new(
            "req-1",
            DraftRequest::new("brief"),
            RequestBudget::start(Duration::from_secs(90)),
            CancellationToken::new(),
            CheckpointRecorder::new(true, 3072),
        );
        ctx.graph = graph;
        ctx
    }

    fn finalize_ctx(ctx: PipelineContext, limits: &ResponseLimits) -> FinalResponse {
        let (graph, trace, extras, error) = ctx.into_parts();
        finalize(graph, trace, extras, error, limits)
    }

    fn connected() -> Graph {
        Graph::new(
            vec![
                Node::new("goal", NodeKind::Goal, "G"),
                Node::new("dec", NodeKind::Decision, "D"),
                Node::new("opt_a", NodeKind::Option, "A"),
                Node::new("opt_b", NodeKind::Option, "B"),
                Node::new("fac", NodeKind::Factor, "F"),
                Node::new("out", NodeKind::Outcome, "O"),
            ],
            vec![
                Edge::new("dec", "opt_a"),
                Edge::new("dec", "opt_b"),
                Edge::new("opt_a", "fac"),
                Edge::new("fac", "out"),
                Edge::new("out", "goal"),
            ],
        )
    }

    #[test]
    fn test_empty_graph_rejected() {
        let response = finalize_ctx(context_with(Graph::default()), &ResponseLimits::default());
        assert_eq!(response.status_code, 400);
        assert_eq!(response.body["schema"], "cee.error.v1");
        assert_eq!(response.body["source"], "cee");
        assert_eq!(response.body["code"], "CEE_GRAPH_INVALID");
        assert_eq!(response.body["retryable"], false);
        assert_eq!(response.body["details"]["reason"], "empty_graph");
    }

    #[test]
    fn test_disconnected_graph_lists_missing_kinds() {
        let graph = Graph::new(
            vec![
                Node::new("dec", NodeKind::Decision, "D"),
                Node::new("opt", NodeKind::Option, "O"),
            ],
            vec![Edge::new("dec", "opt")],
        );
        let err = acceptance_gate(&graph).unwrap_err();
        let details = err.details().unwrap();
        assert_eq!(details["reason"], "incomplete_structure");
        assert_eq!(details["missing_kinds"], json!(["goal"]));
    }

    #[test]
    fn test_decision_not_reaching_option_rejected() {
        let mut graph = connected();
        graph.edges.retain(|e| e.from != "dec");
        let err = acceptance_gate(&graph).unwrap_err();
        assert_eq!(err.details().unwrap()["reason"], "incomplete_structure");
        assert!(acceptance_gate(&connected()).is_ok());
    }

    #[test]
    fn test_upstream_error_mapped_to_502() {
        let mut ctx = context_with(connected());
        ctx.early_return = Some(
            AdapterError::UpstreamHttp {
                status: 401,
                message: "bad key".to_string(),
            }
            .into(),
        );
        let response = finalize_ctx(ctx, &ResponseLimits::default());
        assert_eq!(response.status_code, 502);
        assert_eq!(response.body["code"], "CEE_LLM_UPSTREAM_ERROR");
        assert_eq!(response.body["retryable"], true);
        assert_eq!(response.body["request_id"], "req-1");
    }

    #[test]
    fn test_success_envelope_truncates_lists() {
        let mut ctx = context_with(connected());
        ctx.enrichment = EnrichmentOutput {
            bias_findings: (0..4).map(|i| json!({ "id": i })).collect(),
            evidence_suggestions: vec![json!("a")],
            ..Default::default()
        };
        let limits = ResponseLimits {
            bias_findings_max: 2,
            options_max: 1,
            ..Default::default()
        };

        let response = finalize_ctx(ctx, &limits);
        assert!(response.is_success());
        let body = &response.body;
        assert_eq!(body["bias_findings"].as_array().unwrap().len(), 2);
        assert_eq!(body["options"].as_array().unwrap().len(), 1);
        assert_eq!(
            body["response_limits"],
            json!({
                "bias_findings_max": 2,
                "bias_findings_truncated": true,
                "options_max": 1,
                "options_truncated": true,
                "evidence_suggestions_max": 20,
                "evidence_suggestions_truncated": false,
                "sensitivity_suggestions_max": 10,
                "sensitivity_suggestions_truncated": false,
            })
        );
        assert_eq!(body["graph"]["nodes"].as_array().unwrap().len(), 6);
        assert_eq!(body["trace"]["request_id"], "req-1");
        let overall = body["quality"]["overall"].as_u64().unwrap();
        assert!((1..=10).contains(&overall));
        assert!(body.get("validation_issues").is_none());
    }
}
