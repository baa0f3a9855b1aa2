//! Structural detectors.
//!
//! Pure functions that inspect a [`Graph`] and report classified
//! [`Violation`]s without mutating it. Every violation lands in a severity
//! [`Bucket`]:
//!
//! - **A**: informational, nothing downstream is invalidated
//! - **B**: the deterministic repair engine can fix it
//! - **C**: only a model-assisted repair can fix it

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::graph::{is_allowed_for, EdgeFilterMode, Graph, NodeKind};
use crate::validate::ValidationResult;

/// Validator code: an outcome/risk cannot reach a goal.
pub const NO_PATH_TO_GOAL: &str = "NO_PATH_TO_GOAL";
/// Validator code: an option has no effect path to any outcome/risk.
pub const NO_EFFECT_PATH: &str = "NO_EFFECT_PATH";

/// Severity bucket of a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bucket {
    /// Informational.
    A,
    /// Deterministically repairable.
    B,
    /// Needs model assistance.
    C,
}

/// Kind of structural problem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViolationCode {
    /// No goal node.
    MissingGoal,
    /// No decision node.
    MissingDecision,
    /// No option nodes.
    MissingOptions,
    /// Outcome/risk without an edge into a goal.
    OrphanNode,
    /// Factor without an inbound edge from an option or factor.
    OrphanFactor,
    /// Option without an inbound edge from a decision.
    UnlinkedOption,
    /// Option with no outgoing edges.
    OptionDisconnected,
    /// Edge outside the closed-world allow-list.
    InvalidEdgePattern,
    /// Edge referencing a missing node.
    DanglingEdge,
    /// Directed cycle.
    CycleDetected,
    /// `belief_exists` outside `[0,1]` or negative `strength_std`.
    NumericOutOfRange,
    /// More nodes than the configured cap.
    NodeCapExceeded,
    /// More edges than the configured cap.
    EdgeCapExceeded,
    /// Causal edges all carry the same strength.
    UniformEdgeWeights,
    /// Error reported by the external validator.
    ValidatorError(String),
    /// Warning reported by the external validator.
    ValidatorWarning(String),
}

impl ViolationCode {
    /// Wire code for the violation.
    pub fn as_str(&self) -> &str {
        match self {
            ViolationCode::MissingGoal => "MISSING_GOAL",
            ViolationCode::MissingDecision => "MISSING_DECISION",
            ViolationCode::MissingOptions => "MISSING_OPTIONS",
            ViolationCode::OrphanNode => "ORPHAN_NODE",
            ViolationCode::OrphanFactor => "ORPHAN_FACTOR",
            ViolationCode::UnlinkedOption => "UNLINKED_OPTION",
            ViolationCode::OptionDisconnected => "OPTION_DISCONNECTED",
            ViolationCode::InvalidEdgePattern => "INVALID_EDGE_PATTERN",
            ViolationCode::DanglingEdge => "DANGLING_EDGE",
            ViolationCode::CycleDetected => "CYCLE_DETECTED",
            ViolationCode::NumericOutOfRange => "NUMERIC_OUT_OF_RANGE",
            ViolationCode::NodeCapExceeded => "NODE_CAP_EXCEEDED",
            ViolationCode::EdgeCapExceeded => "EDGE_CAP_EXCEEDED",
            ViolationCode::UniformEdgeWeights => "UNIFORM_EDGE_WEIGHTS",
            ViolationCode::ValidatorError(code) | ViolationCode::ValidatorWarning(code) => code,
        }
    }
}

impl Serialize for ViolationCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified structural problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// What is wrong.
    pub code: ViolationCode,
    /// How severe it is.
    pub bucket: Bucket,
    /// Node or edge the violation concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Human-readable detail.
    pub message: String,
}

impl Violation {
    fn new(code: ViolationCode, bucket: Bucket, message: impl Into<String>) -> Self {
        Self {
            code,
            bucket,
            subject: None,
            message: message.into(),
        }
    }

    fn about(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Limits and modes the detectors check against.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Node cap.
    pub max_nodes: usize,
    /// Edge cap.
    pub max_edges: usize,
    /// Strict strips invalid edges (bucket B); lenient keeps and flags them (bucket A).
    pub filter_mode: EdgeFilterMode,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_nodes: 50,
            max_edges: 200,
            filter_mode: EdgeFilterMode::Strict,
        }
    }
}

/// Run every structural detector.
pub fn detect_all(graph: &Graph, config: &DetectorConfig) -> Vec<Violation> {
    let mut violations = Vec::new();
    violations.extend(detect_missing_kinds(graph));
    violations.extend(detect_dangling_edges(graph));
    violations.extend(detect_invalid_edges(graph, config.filter_mode));
    violations.extend(detect_orphans(graph));
    violations.extend(detect_disconnected_options(graph));
    violations.extend(detect_cycles(graph));
    violations.extend(detect_numeric_ranges(graph));
    violations.extend(detect_caps(graph, config));
    violations.extend(detect_uniform_weights(graph));
    violations
}

/// Missing goal (B, goal inference fixes it), decision or options (C).
pub fn detect_missing_kinds(graph: &Graph) -> Vec<Violation> {
    let mut out = Vec::new();
    if graph.is_empty() {
        return out;
    }
    if !graph.has_kind(NodeKind::Goal) {
        out.push(Violation::new(
            ViolationCode::MissingGoal,
            Bucket::B,
            "graph has no goal node",
        ));
    }
    if !graph.has_kind(NodeKind::Decision) {
        out.push(Violation::new(
            ViolationCode::MissingDecision,
            Bucket::C,
            "graph has no decision node",
        ));
    }
    if !graph.has_kind(NodeKind::Option) {
        out.push(Violation::new(
            ViolationCode::MissingOptions,
            Bucket::C,
            "graph has no option nodes",
        ));
    }
    out
}

/// Edges whose endpoints do not both exist.
pub fn detect_dangling_edges(graph: &Graph) -> Vec<Violation> {
    graph
        .dangling_edges()
        .into_iter()
        .map(|e| {
            Violation::new(
                ViolationCode::DanglingEdge,
                Bucket::B,
                format!("edge {} references a missing node", e.pair_key()),
            )
            .about(e.pair_key())
        })
        .collect()
}

/// Edges outside the allow-list, including self-loops.
pub fn detect_invalid_edges(graph: &Graph, mode: EdgeFilterMode) -> Vec<Violation> {
    let kinds = graph.kind_index();
    let bucket = match mode {
        EdgeFilterMode::Strict => Bucket::B,
        EdgeFilterMode::Lenient => Bucket::A,
    };
    graph
        .edges
        .iter()
        .filter_map(|e| {
            let from = *kinds.get(e.from.as_str())?;
            let to = *kinds.get(e.to.as_str())?;
            if e.from != e.to && is_allowed_for(e, from, to) {
                return None;
            }
            Some(
                Violation::new(
                    ViolationCode::InvalidEdgePattern,
                    bucket,
                    format!("{} → {} is not an allowed edge pattern", from, to),
                )
                .about(e.pair_key()),
            )
        })
        .collect()
}

/// Orphaned outcomes/risks, factors and options.
pub fn detect_orphans(graph: &Graph) -> Vec<Violation> {
    let kinds = graph.kind_index();
    let has_option = graph.has_kind(NodeKind::Option);
    let has_decision = graph.has_kind(NodeKind::Decision);
    let mut out = Vec::new();

    for node in &graph.nodes {
        match node.kind {
            NodeKind::Outcome | NodeKind::Risk => {
                let reaches_goal = graph
                    .outgoing(&node.id)
                    .any(|e| kinds.get(e.to.as_str()) == Some(&NodeKind::Goal));
                if !reaches_goal {
                    out.push(
                        Violation::new(
                            ViolationCode::OrphanNode,
                            Bucket::B,
                            format!("{} '{}' has no edge to a goal", node.kind, node.id),
                        )
                        .about(&node.id),
                    );
                }
            }
            NodeKind::Factor => {
                let fed = graph.incoming(&node.id).any(|e| {
                    matches!(
                        kinds.get(e.from.as_str()),
                        Some(NodeKind::Option | NodeKind::Factor)
                    )
                });
                if !fed {
                    let bucket = if has_option { Bucket::B } else { Bucket::C };
                    out.push(
                        Violation::new(
                            ViolationCode::OrphanFactor,
                            bucket,
                            format!("factor '{}' has no inbound causal edge", node.id),
                        )
                        .about(&node.id),
                    );
                }
            }
            NodeKind::Option => {
                let linked = graph
                    .incoming(&node.id)
                    .any(|e| kinds.get(e.from.as_str()) == Some(&NodeKind::Decision));
                if !linked && has_decision {
                    out.push(
                        Violation::new(
                            ViolationCode::UnlinkedOption,
                            Bucket::B,
                            format!("option '{}' is not linked from a decision", node.id),
                        )
                        .about(&node.id),
                    );
                }
            }
            _ => {}
        }
    }
    out
}

/// Options with no outgoing edges.
///
/// Repairable (B) when a sibling option carries interventions that can be
/// copied; otherwise informational (A) since the option is merely droppable.
pub fn detect_disconnected_options(graph: &Graph) -> Vec<Violation> {
    graph
        .nodes_of_kind(NodeKind::Option)
        .filter(|n| graph.outgoing(&n.id).next().is_none())
        .map(|n| {
            let bucket = if intervention_template(graph, &n.id).is_empty() {
                Bucket::A
            } else {
                Bucket::B
            };
            Violation::new(
                ViolationCode::OptionDisconnected,
                bucket,
                format!("option '{}' has no outgoing edges", n.id),
            )
            .about(&n.id)
        })
        .collect()
}

/// Factor IDs targeted by the interventions of options other than `option_id`.
///
/// Only IDs that exist as factor nodes are returned, sorted and de-duplicated.
pub fn intervention_template(graph: &Graph, option_id: &str) -> Vec<String> {
    let factors: HashSet<&str> = graph
        .nodes_of_kind(NodeKind::Factor)
        .map(|n| n.id.as_str())
        .collect();
    let mut targets: Vec<String> = graph
        .nodes_of_kind(NodeKind::Option)
        .filter(|n| n.id != option_id)
        .flat_map(|n| n.interventions().map(|(k, _)| k.clone()))
        .filter(|k| factors.contains(k.as_str()))
        .collect();
    targets.sort();
    targets.dedup();
    targets
}

/// Directed cycles.
pub fn detect_cycles(graph: &Graph) -> Vec<Violation> {
    let cycle = graph.cycle_nodes();
    if cycle.is_empty() {
        return Vec::new();
    }
    vec![Violation::new(
        ViolationCode::CycleDetected,
        Bucket::C,
        format!("graph contains a cycle through {}", cycle.join(", ")),
    )]
}

/// Belief outside `[0,1]`, negative std, or non-finite numbers.
pub fn detect_numeric_ranges(graph: &Graph) -> Vec<Violation> {
    graph
        .edges
        .iter()
        .filter(|e| {
            let belief_bad = e
                .belief_exists
                .map(|b| !b.is_finite() || !(0.0..=1.0).contains(&b))
                .unwrap_or(false);
            let std_bad = e
                .strength_std
                .map(|s| !s.is_finite() || s < 0.0)
                .unwrap_or(false);
            let mean_bad = e.strength_mean.map(|m| !m.is_finite()).unwrap_or(false);
            belief_bad || std_bad || mean_bad
        })
        .map(|e| {
            Violation::new(
                ViolationCode::NumericOutOfRange,
                Bucket::B,
                format!("edge {} has out-of-range numeric fields", e.pair_key()),
            )
            .about(e.pair_key())
        })
        .collect()
}

/// Node and edge caps. Protected kinds alone may exceed the node cap; that is not reported.
pub fn detect_caps(graph: &Graph, config: &DetectorConfig) -> Vec<Violation> {
    let mut out = Vec::new();
    let trimmable = graph.nodes.iter().filter(|n| !n.kind.is_protected()).count();
    let protected = graph.nodes.len() - trimmable;
    if graph.nodes.len() > config.max_nodes && trimmable > 0 && protected < config.max_nodes {
        out.push(Violation::new(
            ViolationCode::NodeCapExceeded,
            Bucket::B,
            format!(
                "{} nodes exceed the cap of {}",
                graph.nodes.len(),
                config.max_nodes
            ),
        ));
    }
    if graph.edges.len() > config.max_edges {
        out.push(Violation::new(
            ViolationCode::EdgeCapExceeded,
            Bucket::B,
            format!(
                "{} edges exceed the cap of {}",
                graph.edges.len(),
                config.max_edges
            ),
        ));
    }
    out
}

/// Three or more causal edges that all share one strength value.
pub fn detect_uniform_weights(graph: &Graph) -> Vec<Violation> {
    let kinds = graph.kind_index();
    let strengths: Vec<f64> = graph
        .edges
        .iter()
        .filter(|e| !e.is_synthetic())
        .filter(|e| kinds.get(e.from.as_str()) == Some(&NodeKind::Factor))
        .filter_map(|e| e.strength_mean)
        .collect();
    if strengths.len() < 3 {
        return Vec::new();
    }
    let first = strengths[0];
    if strengths.iter().all(|s| (s - first).abs() < 1e-9) {
        return vec![Violation::new(
            ViolationCode::UniformEdgeWeights,
            Bucket::A,
            format!(
                "all {} causal edges share strength {}",
                strengths.len(),
                first
            ),
        )];
    }
    Vec::new()
}

/// Classify validator findings.
///
/// `NO_PATH_TO_GOAL` is fixed by orphan wiring (B); `NO_EFFECT_PATH` and
/// unknown error codes need the model (C); warnings are informational (A).
pub fn from_validation(result: &ValidationResult) -> Vec<Violation> {
    let errors = result.errors.iter().map(|issue| {
        let bucket = if issue.code == NO_PATH_TO_GOAL {
            Bucket::B
        } else {
            Bucket::C
        };
        let violation = Violation::new(
            ViolationCode::ValidatorError(issue.code.clone()),
            bucket,
            issue.message.clone(),
        );
        match &issue.subject {
            Some(s) => violation.about(s),
            None => violation,
        }
    });
    let warnings = result.warnings.iter().map(|issue| {
        Violation::new(
            ViolationCode::ValidatorWarning(issue.code.clone()),
            Bucket::A,
            issue.message.clone(),
        )
    });
    errors.chain(warnings).collect()
}

/// Violations in one bucket.
pub fn in_bucket(violations: &[Violation], bucket: Bucket) -> Vec<&Violation> {
    violations.iter().filter(|v| v.bucket == bucket).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};

    fn base() -> Graph {
        Graph::new(
            vec![
                Node::new("dec_1", NodeKind::Decision, "Choose"),
                Node::new("opt_a", NodeKind::Option, "A").with_interventions([("fac_1", 1.0)]),
                Node::new("opt_b", NodeKind::Option, "B"),
                Node::new("fac_1", NodeKind::Factor, "Cost"),
                Node::new("out_1", NodeKind::Outcome, "Profit"),
                Node::new("risk_1", NodeKind::Risk, "Churn"),
                Node::new("goal_1", NodeKind::Goal, "Grow"),
            ],
            vec![
                Edge::new("dec_1", "opt_a"),
                Edge::new("dec_1", "opt_b"),
                Edge::new("opt_a", "fac_1"),
                Edge::new("fac_1", "out_1"),
                Edge::new("fac_1", "risk_1"),
                Edge::new("out_1", "goal_1"),
            ],
        )
    }

    fn codes(v: &[Violation]) -> Vec<&str> {
        v.iter().map(|v| v.code.as_str()).collect()
    }

    #[test]
    fn test_detects_orphan_risk_and_disconnected_option() {
        let violations = detect_all(&base(), &DetectorConfig::default());
        let c = codes(&violations);
        assert!(c.contains(&"ORPHAN_NODE"));
        assert!(c.contains(&"OPTION_DISCONNECTED"));

        let disconnected = violations
            .iter()
            .find(|v| v.code == ViolationCode::OptionDisconnected)
            .unwrap();
        assert_eq!(disconnected.subject.as_deref(), Some("opt_b"));
        assert_eq!(disconnected.bucket, Bucket::B);
    }

    #[test]
    fn test_disconnected_option_without_template_is_informational() {
        let mut graph = base();
        graph.nodes[1].data = None;
        let v = detect_disconnected_options(&graph);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].bucket, Bucket::A);
    }

    #[test]
    fn test_missing_goal_is_repairable_missing_decision_is_not() {
        let mut graph = base();
        graph.nodes.retain(|n| n.kind != NodeKind::Goal && n.kind != NodeKind::Decision);
        let v = detect_missing_kinds(&graph);
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].code, ViolationCode::MissingGoal);
        assert_eq!(v[0].bucket, Bucket::B);
        assert_eq!(v[1].code, ViolationCode::MissingDecision);
        assert_eq!(v[1].bucket, Bucket::C);
    }

    #[test]
    fn test_empty_graph_reports_nothing_missing() {
        assert!(detect_missing_kinds(&Graph::default()).is_empty());
    }

    #[test]
    fn test_invalid_edge_bucket_depends_on_mode() {
        let mut graph = base();
        graph.edges.push(Edge::new("opt_a", "goal_1"));
        let strict = detect_invalid_edges(&graph, EdgeFilterMode::Strict);
        let lenient = detect_invalid_edges(&graph, EdgeFilterMode::Lenient);
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].bucket, Bucket::B);
        assert_eq!(lenient[0].bucket, Bucket::A);
    }

    #[test]
    fn test_self_loop_is_invalid() {
        let mut graph = base();
        graph.edges.push(Edge::new("fac_1", "fac_1"));
        let v = detect_invalid_edges(&graph, EdgeFilterMode::Strict);
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn test_dangling_edges_are_not_pattern_violations() {
        let mut graph = base();
        graph.edges.push(Edge::new("opt_a", "fac_ghost"));
        assert!(detect_invalid_edges(&graph, EdgeFilterMode::Strict).is_empty());
        assert_eq!(detect_dangling_edges(&graph).len(), 1);
    }

    #[test]
    fn test_cycle_is_bucket_c() {
        let mut graph = base();
        graph.edges.push(Edge::new("goal_1", "dec_1"));
        let v = detect_cycles(&graph);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].bucket, Bucket::C);
    }

    #[test]
    fn test_numeric_range() {
        let mut graph = base();
        graph.edges[2].belief_exists = Some(1.4);
        graph.edges[3].strength_std = Some(-0.1);
        assert_eq!(detect_numeric_ranges(&graph).len(), 2);
    }

    #[test]
    fn test_caps_ignore_protected_overflow() {
        let nodes: Vec<Node> = (0..5)
            .map(|i| Node::new(format!("out_{}", i), NodeKind::Outcome, "o"))
            .collect();
        let graph = Graph::new(nodes, vec![]);
        let config = DetectorConfig {
            max_nodes: 3,
            ..Default::default()
        };
        assert!(detect_caps(&graph, &config).is_empty());
    }

    #[test]
    fn test_uniform_weights() {
        let mut graph = base();
        graph.nodes.push(Node::new("out_2", NodeKind::Outcome, "x"));
        graph.edges.push(Edge::new("fac_1", "out_2"));
        for e in graph.edges.iter_mut().filter(|e| e.from == "fac_1") {
            e.strength_mean = Some(0.5);
        }
        let v = detect_uniform_weights(&graph);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].bucket, Bucket::A);
    }

    #[test]
    fn test_intervention_template_filters_unknown_factors() {
        let mut graph = base();
        graph.nodes[1] = Node::new("opt_a", NodeKind::Option, "A")
            .with_interventions([("fac_1", 1.0), ("fac_unknown", 2.0)]);
        assert_eq!(intervention_template(&graph, "opt_b"), vec!["fac_1"]);
        assert!(intervention_template(&graph, "opt_a").is_empty());
    }

    #[test]
    fn test_validator_codes_bucketed() {
        use crate::validate::{ValidationIssue, ValidationResult};
        let result = ValidationResult {
            valid: false,
            errors: vec![
                ValidationIssue::new(NO_PATH_TO_GOAL, "x"),
                ValidationIssue::new(NO_EFFECT_PATH, "y"),
            ],
            warnings: vec![ValidationIssue::new("SPARSE_GRAPH", "z")],
            normalized: None,
        };
        let v = from_validation(&result);
        assert_eq!(v[0].bucket, Bucket::B);
        assert_eq!(v[1].bucket, Bucket::C);
        assert_eq!(v[2].bucket, Bucket::A);
        assert_eq!(v[1].code.as_str(), "NO_EFFECT_PATH");
    }
}
