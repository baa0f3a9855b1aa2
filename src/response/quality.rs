//! Quality score for a finalized graph.
//!
//! Five components, each an integer in `[1,10]`; the overall score is their
//! rounded mean.

use serde::Serialize;

use crate::graph::{Graph, NodeKind};

/// Causal edges per node at or above which density scores full marks.
const TARGET_DENSITY: f64 = 1.2;

/// Component scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityComponents {
    /// Required kinds present, acyclic, no dangling edges.
    pub structure: u8,
    /// Share of nodes touched by at least one edge.
    pub coverage: u8,
    /// Edges per node.
    pub causal_density: u8,
    /// Share of edges the model authored itself.
    pub provenance: u8,
    /// Draft confidence.
    pub confidence: u8,
}

/// Overall score with its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityScore {
    /// Overall score, 1 to 10.
    pub overall: u8,
    /// Per-component scores.
    pub components: QualityComponents,
}

fn scale(fraction: f64) -> u8 {
    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
    (1.0 + 9.0 * fraction).round() as u8
}

/// Score a graph. `confidence` defaults to 0.5 when unknown.
pub fn score(graph: &Graph, confidence: Option<f64>) -> QualityScore {
    let node_count = graph.nodes.len().max(1) as f64;

    let mut structure: i32 = 10;
    for kind in [NodeKind::Goal, NodeKind::Decision, NodeKind::Option] {
        if !graph.has_kind(kind) {
            structure -= 3;
        }
    }
    if !graph.is_acyclic() {
        structure -= 3;
    }
    if !graph.dangling_edges().is_empty() {
        structure -= 2;
    }
    let structure = structure.clamp(1, 10) as u8;

    let touched = graph
        .nodes
        .iter()
        .filter(|n| graph.edges.iter().any(|e| e.from == n.id || e.to == n.id))
        .count();
    let coverage = scale(touched as f64 / node_count);

    let density = graph.edges.len() as f64 / node_count;
    let causal_density = scale(density / TARGET_DENSITY);

    let provenance = if graph.edges.is_empty() {
        1
    } else {
        let authored = graph.edges.iter().filter(|e| !e.is_synthetic()).count();
        scale(authored as f64 / graph.edges.len() as f64)
    };

    let confidence = scale(confidence.unwrap_or(0.5));

    let components = QualityComponents {
        structure,
        coverage,
        causal_density,
        provenance,
        confidence,
    };
    let sum: u32 = [structure, coverage, causal_density, provenance, confidence]
        .iter()
        .map(|&c| c as u32)
        .sum();
    let overall = ((sum as f64 / 5.0).round() as u8).clamp(1, 10);

    QualityScore {
        overall,
        components,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, EdgeOrigin, Node};

    fn chain() -> Graph {
        Graph::new(
            vec![
                Node::new("goal", NodeKind::Goal, "G"),
                Node::new("dec", NodeKind::Decision, "D"),
                Node::new("opt", NodeKind::Option, "O"),
                Node::new("fac", NodeKind::Factor, "F"),
                Node::new("out", NodeKind::Outcome, "Out"),
            ],
            vec![
                Edge::new("dec", "opt").with_strength(1.0, 0.01, 1.0),
                Edge::new("opt", "fac").with_strength(1.0, 0.01, 1.0),
                Edge::new("fac", "out").with_strength(0.6, 0.1, 0.8),
                Edge::new("out", "goal").with_strength(0.9, 0.1, 0.9),
                Edge::new("fac", "goal").with_strength(0.2, 0.1, 0.5),
                Edge::new("opt", "out").with_strength(0.3, 0.1, 0.5),
            ],
        )
    }

    #[test]
    fn test_complete_graph_scores_high() {
        let q = score(&chain(), Some(0.9));
        assert_eq!(q.components.structure, 10);
        assert_eq!(q.components.coverage, 10);
        assert_eq!(q.components.causal_density, 10);
        assert_eq!(q.components.provenance, 10);
        assert_eq!(q.components.confidence, 9);
        assert_eq!(q.overall, 10);
    }

    #[test]
    fn test_synthetic_edges_lower_provenance() {
        let mut graph = chain();
        for edge in graph.edges.iter_mut().take(3) {
            edge.origin = Some(EdgeOrigin::Repair);
        }
        let q = score(&graph, Some(0.9));
        assert_eq!(q.components.provenance, 6);
    }

    #[test]
    fn test_score_always_in_range() {
        let lonely = Graph::new(vec![Node::new("f", NodeKind::Factor, "F")], vec![]);
        let q = score(&lonely, Some(-3.0));
        assert_eq!(q.components.structure, 1);
        assert_eq!(q.components.coverage, 1);
        assert_eq!(q.components.confidence, 1);
        assert!((1..=10).contains(&q.overall));

        let q = score(&Graph::default(), None);
        assert!((1..=10).contains(&q.overall));
    }
}
