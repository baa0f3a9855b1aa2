//! Node and edge cap enforcement.
//!
//! Protected kinds are always kept, even above the cap; only factors are
//! trimmed, lowest degree first. Edges are trimmed weakest first, and wiring
//! edges between two protected nodes go only after every other edge.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::{RepairCode, RepairRecord};
use crate::detect::DetectorConfig;
use crate::graph::{Edge, Graph};

/// Enforce both caps.
pub fn enforce_caps(graph: &mut Graph, config: &DetectorConfig) -> Vec<RepairRecord> {
    let mut records = enforce_node_cap(graph, config.max_nodes);
    records.extend(enforce_edge_cap(graph, config.max_edges));
    records
}

/// Trim factors until the node count fits, then drop edges left dangling.
pub fn enforce_node_cap(graph: &mut Graph, max_nodes: usize) -> Vec<RepairRecord> {
    if graph.nodes.len() <= max_nodes {
        return Vec::new();
    }
    let protected = graph.nodes.iter().filter(|n| n.kind.is_protected()).count();
    let factor_budget = max_nodes.saturating_sub(protected);

    let mut degree: HashMap<&str, usize> = HashMap::new();
    for e in &graph.edges {
        *degree.entry(e.from.as_str()).or_default() += 1;
        *degree.entry(e.to.as_str()).or_default() += 1;
    }
    let mut factors: Vec<(&str, usize)> = graph
        .nodes
        .iter()
        .filter(|n| !n.kind.is_protected())
        .map(|n| (n.id.as_str(), degree.get(n.id.as_str()).copied().unwrap_or(0)))
        .collect();
    factors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut removed: Vec<String> = factors
        .iter()
        .skip(factor_budget)
        .map(|(id, _)| (*id).to_string())
        .collect();
    if removed.is_empty() {
        return Vec::new();
    }
    removed.sort();
    let removed_set: HashSet<&str> = removed.iter().map(String::as_str).collect();

    graph.nodes.retain(|n| !removed_set.contains(n.id.as_str()));
    let mut records: Vec<RepairRecord> = removed
        .iter()
        .map(|id| RepairRecord::new(RepairCode::NodeCapEnforced, id.clone()))
        .collect();

    graph.edges.retain(|e| {
        let dangling = removed_set.contains(e.from.as_str()) || removed_set.contains(e.to.as_str());
        if dangling {
            records.push(RepairRecord::new(
                RepairCode::DanglingEdgeStripped,
                e.pair_key(),
            ));
        }
        !dangling
    });

    debug!(
        removed = removed.len(),
        protected,
        max_nodes,
        "Node cap enforced"
    );
    records
}

/// Weight used to rank edges for trimming.
fn edge_weight(edge: &Edge) -> f64 {
    let mean = edge.effective_strength_mean().unwrap_or(0.5).abs();
    let belief = edge.belief_exists.unwrap_or(1.0);
    mean * belief
}

/// Drop the weakest edges until the edge count fits.
pub fn enforce_edge_cap(graph: &mut Graph, max_edges: usize) -> Vec<RepairRecord> {
    if graph.edges.len() <= max_edges {
        return Vec::new();
    }
    let kinds = graph.kind_index();
    let is_wiring = |e: &Edge| {
        let protected = |id: &str| kinds.get(id).is_some_and(|k| k.is_protected());
        protected(&e.from) && protected(&e.to)
    };
    let mut ranked: Vec<(usize, bool, f64, String)> = graph
        .edges
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let key = e.id.clone().unwrap_or_else(|| e.pair_key());
            (i, is_wiring(e), edge_weight(e), key)
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.1.cmp(&b.1)
            .then_with(|| a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal))
            .then_with(|| a.3.cmp(&b.3))
    });

    let excess = graph.edges.len() - max_edges;
    let drop: HashSet<usize> = ranked.iter().take(excess).map(|(i, ..)| *i).collect();

    let mut records = Vec::new();
    let mut index = 0;
    graph.edges.retain(|e| {
        let keep = !drop.contains(&index);
        index += 1;
        if !keep {
            records.push(RepairRecord::new(RepairCode::EdgeCapEnforced, e.pair_key()));
        }
        keep
    });
    debug!(dropped = records.len(), max_edges, "Edge cap enforced");
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, NodeKind};

    #[test]
    fn test_node_cap_trims_lowest_degree_factors() {
        let mut nodes = vec![
            Node::new("opt_a", NodeKind::Option, "A"),
            Node::new("out_1", NodeKind::Outcome, "O"),
        ];
        for i in 0..4 {
            nodes.push(Node::new(format!("fac_{}", i), NodeKind::Factor, "f"));
        }
        let edges = vec![
            Edge::new("opt_a", "fac_2"),
            Edge::new("fac_2", "out_1"),
            Edge::new("opt_a", "fac_3"),
        ];
        let mut g = Graph::new(nodes, edges);
        let records = enforce_node_cap(&mut g, 4);

        let ids: Vec<_> = g.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["opt_a", "out_1", "fac_2", "fac_3"]);
        assert_eq!(records.len(), 2);
        assert!(g.dangling_edges().is_empty());
    }

    #[test]
    fn test_protected_nodes_survive_over_cap() {
        let mut nodes: Vec<Node> = (0..4)
            .map(|i| Node::new(format!("out_{}", i), NodeKind::Outcome, "o"))
            .collect();
        nodes.push(Node::new("fac_1", NodeKind::Factor, "f"));
        let mut g = Graph::new(nodes, vec![]);
        enforce_node_cap(&mut g, 2);
        assert_eq!(g.nodes.len(), 4);
        assert!(g.nodes.iter().all(|n| n.kind == NodeKind::Outcome));
    }

    #[test]
    fn test_edge_cap_drops_weakest() {
        let nodes = vec![
            Node::new("fac_1", NodeKind::Factor, "f"),
            Node::new("out_1", NodeKind::Outcome, "a"),
            Node::new("out_2", NodeKind::Outcome, "b"),
            Node::new("out_3", NodeKind::Outcome, "c"),
        ];
        let edges = vec![
            Edge::new("fac_1", "out_1").with_strength(0.9, 0.1, 0.9),
            Edge::new("fac_1", "out_2").with_strength(0.1, 0.1, 0.5),
            Edge::new("fac_1", "out_3").with_strength(-0.8, 0.1, 0.9),
        ];
        let mut g = Graph::new(nodes, edges);
        let records = enforce_edge_cap(&mut g, 2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject.as_deref(), Some("fac_1::out_2"));
        assert_eq!(g.edges.len(), 2);
    }

    #[test]
    fn test_edge_cap_keeps_protected_wiring_edges() {
        let nodes = vec![
            Node::new("dec_1", NodeKind::Decision, "d"),
            Node::new("opt_a", NodeKind::Option, "a"),
            Node::new("fac_1", NodeKind::Factor, "f"),
            Node::new("out_1", NodeKind::Outcome, "o"),
            Node::new("goal_1", NodeKind::Goal, "g"),
        ];
        let edges = vec![
            Edge::new("dec_1", "opt_a").with_strength(0.1, 0.01, 0.1),
            Edge::new("out_1", "goal_1").with_strength(0.1, 0.01, 0.1),
            Edge::new("opt_a", "fac_1").with_strength(0.9, 0.1, 1.0),
            Edge::new("fac_1", "out_1").with_strength(0.9, 0.1, 1.0),
        ];
        let mut g = Graph::new(nodes, edges);
        let records = enforce_edge_cap(&mut g, 2);

        assert_eq!(records.len(), 2);
        let pairs: Vec<String> = g.edges.iter().map(|e| e.pair_key()).collect();
        assert_eq!(pairs, vec!["dec_1::opt_a", "out_1::goal_1"]);
    }
}
