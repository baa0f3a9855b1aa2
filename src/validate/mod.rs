//! Graph validation contract.
//!
//! The pipeline consumes a [`Validator`] that reports coded errors and
//! warnings. [`StructuralValidator`] is the built-in implementation; the
//! [`CachedValidator`] wrapper memoises results by content hash of the graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{content_hash, TtlLruCache};
use crate::detect::{NO_EFFECT_PATH, NO_PATH_TO_GOAL};
use crate::graph::{Graph, NodeKind};

/// Validator code: the graph has a directed cycle.
pub const CYCLE: &str = "CYCLE_DETECTED";
/// Validator warning: causal edges all carry the same strength.
pub const UNIFORM_EDGE_WEIGHTS: &str = "UNIFORM_EDGE_WEIGHTS";
/// Validator warning: a model-authored causal edge has no strength.
pub const MISSING_EDGE_STRENGTH: &str = "MISSING_EDGE_STRENGTH";

/// One coded finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
    /// Node or edge the finding concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl ValidationIssue {
    /// Create an issue without a subject.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            subject: None,
        }
    }

    /// Attach the node or edge the issue concerns.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Outcome of validating one graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when there are no errors.
    pub valid: bool,
    /// Blocking findings.
    pub errors: Vec<ValidationIssue>,
    /// Informational findings.
    pub warnings: Vec<ValidationIssue>,
    /// Normalised graph, when the validator produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<Graph>,
}

impl ValidationResult {
    /// Build a result, deriving `valid` from the error list.
    pub fn from_issues(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            normalized: None,
        }
    }

    /// Every error and warning code, errors first.
    pub fn codes(&self) -> Vec<String> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .map(|i| i.code.clone())
            .collect()
    }
}

/// Graph validator contract.
#[cfg_attr(test, mockall::automock)]
pub trait Validator: Send + Sync {
    /// Validate a graph.
    fn validate(&self, graph: &Graph) -> ValidationResult;
}

// ============================================================================
// Structural validator
// ============================================================================

/// Built-in validator checking reachability, acyclicity and edge weights.
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self
    }

    fn goal_paths(graph: &Graph, errors: &mut Vec<ValidationIssue>) {
        let goals: HashSet<&str> = graph
            .nodes_of_kind(NodeKind::Goal)
            .map(|n| n.id.as_str())
            .collect();
        if goals.is_empty() {
            return;
        }
        for node in graph
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Outcome | NodeKind::Risk))
        {
            let reach = graph.reachable_from(&node.id);
            if !reach.iter().any(|id| goals.contains(id.as_str())) {
                errors.push(
                    ValidationIssue::new(
                        NO_PATH_TO_GOAL,
                        format!("{} '{}' has no path to a goal", node.kind, node.id),
                    )
                    .with_subject(&node.id),
                );
            }
        }
    }

    fn effect_paths(graph: &Graph, errors: &mut Vec<ValidationIssue>) {
        let effects: HashSet<&str> = graph
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Outcome | NodeKind::Risk))
            .map(|n| n.id.as_str())
            .collect();
        if effects.is_empty() {
            return;
        }
        // Options with no outgoing edges at all are status-quo candidates, handled by repair.
        for option in graph
            .nodes_of_kind(NodeKind::Option)
            .filter(|n| graph.outgoing(&n.id).next().is_some())
        {
            let reach = graph.reachable_from(&option.id);
            if !reach.iter().any(|id| effects.contains(id.as_str())) {
                errors.push(
                    ValidationIssue::new(
                        NO_EFFECT_PATH,
                        format!("option '{}' has no effect path to an outcome or risk", option.id),
                    )
                    .with_subject(&option.id),
                );
            }
        }
    }

    fn edge_weights(graph: &Graph, warnings: &mut Vec<ValidationIssue>) {
        let kinds = graph.kind_index();
        let causal: Vec<_> = graph
            .edges
            .iter()
            .filter(|e| !e.is_synthetic())
            .filter(|e| kinds.get(e.from.as_str()) == Some(&NodeKind::Factor))
            .collect();

        for edge in causal.iter().filter(|e| e.strength_mean.is_none()) {
            warnings.push(
                ValidationIssue::new(
                    MISSING_EDGE_STRENGTH,
                    format!("edge {} has no strength_mean", edge.pair_key()),
                )
                .with_subject(edge.pair_key()),
            );
        }

        let distinct: BTreeSet<u64> = causal
            .iter()
            .filter_map(|e| e.strength_mean)
            .map(f64::to_bits)
            .collect();
        let weighted = causal.iter().filter(|e| e.strength_mean.is_some()).count();
        if weighted >= 3 && distinct.len() == 1 {
            warnings.push(ValidationIssue::new(
                UNIFORM_EDGE_WEIGHTS,
                format!("all {} causal edges share one strength value", weighted),
            ));
        }
    }

    fn normalize(graph: &Graph) -> Graph {
        let mut normalized = graph.clone();
        let mut roots: Vec<String> = graph
            .nodes
            .iter()
            .filter(|n| graph.incoming(&n.id).next().is_none())
            .map(|n| n.id.clone())
            .collect();
        let mut leaves: Vec<String> = graph
            .nodes
            .iter()
            .filter(|n| graph.outgoing(&n.id).next().is_none())
            .map(|n| n.id.clone())
            .collect();
        roots.sort();
        leaves.sort();
        normalized.meta.roots = roots;
        normalized.meta.leaves = leaves;
        normalized
    }
}

impl Validator for StructuralValidator {
    fn validate(&self, graph: &Graph) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let cycle = graph.cycle_nodes();
        if !cycle.is_empty() {
            errors.push(ValidationIssue::new(
                CYCLE,
                format!("cycle through {}", cycle.join(", ")),
            ));
        }
        Self::goal_paths(graph, &mut errors);
        Self::effect_paths(graph, &mut errors);
        Self::edge_weights(graph, &mut warnings);

        let mut result = ValidationResult::from_issues(errors, warnings);
        result.normalized = Some(Self::normalize(graph));
        result
    }
}

// ============================================================================
// Cached validator
// ============================================================================

/// Validator wrapper that memoises results by graph content hash.
pub struct CachedValidator<V> {
    inner: V,
    cache: Arc<TtlLruCache<String, ValidationResult>>,
}

impl<V: Validator> CachedValidator<V> {
    /// Wrap a validator with an injected cache.
    pub fn new(inner: V, cache: Arc<TtlLruCache<String, ValidationResult>>) -> Self {
        Self { inner, cache }
    }

    /// Wrap a validator with a fresh cache.
    pub fn with_capacity(inner: V, capacity: usize, ttl: Duration) -> Self {
        Self::new(inner, Arc::new(TtlLruCache::new(capacity, ttl)))
    }

    /// The underlying cache, for inspection and `reset()` in tests.
    pub fn cache(&self) -> &Arc<TtlLruCache<String, ValidationResult>> {
        &self.cache
    }
}

impl<V: Validator> Validator for CachedValidator<V> {
    fn validate(&self, graph: &Graph) -> ValidationResult {
        let Some(key) = content_hash(graph) else {
            return self.inner.validate(graph);
        };
        if let Some(hit) = self.cache.get(&key) {
            debug!(key = %key, "Validation cache hit");
            return hit;
        }
        let result = self.inner.validate(graph);
        self.cache.insert(key, result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};

    fn graph() -> Graph {
        Graph::new(
            vec![
                Node::new("dec_1", NodeKind::Decision, "Choose"),
                Node::new("opt_a", NodeKind::Option, "A"),
                Node::new("fac_1", NodeKind::Factor, "Cost"),
                Node::new("out_1", NodeKind::Outcome, "Profit"),
                Node::new("goal_1", NodeKind::Goal, "Grow"),
            ],
            vec![
                Edge::new("dec_1", "opt_a"),
                Edge::new("opt_a", "fac_1"),
                Edge::new("fac_1", "out_1").with_strength(0.6, 0.1, 0.9),
                Edge::new("out_1", "goal_1"),
            ],
        )
    }

    #[test]
    fn test_valid_chain() {
        let result = StructuralValidator::new().validate(&graph());
        assert!(result.valid, "{:?}", result.errors);
        let normalized = result.normalized.unwrap();
        assert_eq!(normalized.meta.roots, vec!["dec_1"]);
        assert_eq!(normalized.meta.leaves, vec!["goal_1"]);
    }

    #[test]
    fn test_no_path_to_goal() {
        let mut g = graph();
        g.edges.retain(|e| e.to != "goal_1");
        let result = StructuralValidator::new().validate(&g);
        assert!(!result.valid);
        assert_eq!(result.errors[0].code, NO_PATH_TO_GOAL);
        assert_eq!(result.errors[0].subject.as_deref(), Some("out_1"));
    }

    #[test]
    fn test_no_effect_path() {
        let mut g = graph();
        g.edges.retain(|e| e.from != "fac_1");
        let result = StructuralValidator::new().validate(&g);
        assert!(result.codes().contains(&NO_EFFECT_PATH.to_string()));
    }

    #[test]
    fn test_option_without_edges_is_left_to_repair() {
        let mut g = graph();
        g.nodes.push(Node::new("opt_status_quo", NodeKind::Option, "Do nothing"));
        let result = StructuralValidator::new().validate(&g);
        assert!(result.valid);
    }

    #[test]
    fn test_cycle_is_error() {
        let mut g = graph();
        g.edges.push(Edge::new("goal_1", "dec_1"));
        let result = StructuralValidator::new().validate(&g);
        assert!(result.codes().contains(&CYCLE.to_string()));
    }

    #[test]
    fn test_missing_strength_warning() {
        let mut g = graph();
        g.edges[2].strength_mean = None;
        let result = StructuralValidator::new().validate(&g);
        assert!(result.valid);
        assert_eq!(result.warnings[0].code, MISSING_EDGE_STRENGTH);
    }

    #[test]
    fn test_cached_validator_calls_inner_once() {
        let mut inner = MockValidator::new();
        inner
            .expect_validate()
            .times(1)
            .returning(|_| ValidationResult::from_issues(vec![], vec![]));
        let cached = CachedValidator::with_capacity(inner, 4, Duration::from_secs(60));

        let g = graph();
        assert!(cached.validate(&g).valid);
        assert!(cached.validate(&g).valid);
        assert_eq!(cached.cache().len(), 1);
    }

    #[test]
    fn test_cache_reset_forces_revalidation() {
        let mut inner = MockValidator::new();
        inner
            .expect_validate()
            .times(2)
            .returning(|_| ValidationResult::from_issues(vec![], vec![]));
        let cached = CachedValidator::with_capacity(inner, 4, Duration::from_secs(60));

        let g = graph();
        cached.validate(&g);
        cached.cache().reset();
        cached.validate(&g);
    }
}
