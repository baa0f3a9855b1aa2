//! Orphan wiring.
//!
//! - outcome/risk with no edge to a goal → wired to the first goal
//! - factor with no inbound option/factor edge → wired from the nearest upstream
//!   option or factor
//! - option with no inbound decision edge → wired from the first decision

use tracing::debug;

use super::{RepairCode, RepairRecord, STRUCTURAL_BELIEF, STRUCTURAL_MEAN, STRUCTURAL_STD};
use crate::graph::{Edge, EdgeOrigin, Graph, NodeKind};

const PROVENANCE: &str = "orphan_wiring";
const DEFAULT_PLAUSIBILITY: f64 = 0.5;

/// Plausibility-scaled values for a synthetic causal edge: `(mean, std, belief)`.
///
/// Belief is the plausibility clamped to `[0.3, 0.9]`; the mean is half of it.
pub fn causal_values(plausibility: f64) -> (f64, f64, f64) {
    let belief = if plausibility.is_finite() {
        plausibility.clamp(0.3, 0.9)
    } else {
        DEFAULT_PLAUSIBILITY
    };
    (0.5 * belief, 0.2, belief)
}

fn first_id_of(graph: &Graph, kind: NodeKind) -> Option<String> {
    graph.nodes_of_kind(kind).map(|n| n.id.clone()).min()
}

fn structural(from: &str, to: &str, mean: f64) -> Edge {
    Edge::synthetic(
        from,
        to,
        EdgeOrigin::Repair,
        PROVENANCE,
        mean,
        STRUCTURAL_STD,
        STRUCTURAL_BELIEF,
    )
}

/// Wire every orphan the graph can support.
pub fn wire_orphans(graph: &mut Graph) -> Vec<RepairRecord> {
    let mut records = Vec::new();
    records.extend(wire_effects_to_goal(graph));
    records.extend(wire_factors(graph));
    records.extend(link_options(graph));
    records
}

fn wire_effects_to_goal(graph: &mut Graph) -> Vec<RepairRecord> {
    let Some(goal) = first_id_of(graph, NodeKind::Goal) else {
        return Vec::new();
    };
    let kinds = graph.kind_index();
    let mut orphans: Vec<(String, NodeKind)> = graph
        .nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Outcome | NodeKind::Risk))
        .filter(|n| {
            !graph
                .outgoing(&n.id)
                .any(|e| kinds.get(e.to.as_str()) == Some(&NodeKind::Goal))
        })
        .map(|n| (n.id.clone(), n.kind))
        .collect();
    orphans.sort();
    drop(kinds);

    let mut records = Vec::new();
    for (id, kind) in orphans {
        let mean = if kind == NodeKind::Risk {
            -STRUCTURAL_MEAN
        } else {
            STRUCTURAL_MEAN
        };
        graph.edges.push(structural(&id, &goal, mean));
        records.push(RepairRecord::new(RepairCode::OrphanWired, id));
    }
    records
}

fn is_fed(graph: &Graph, factor: &str) -> bool {
    graph.incoming(factor).any(|e| {
        matches!(
            graph.kind_of(&e.from),
            Some(NodeKind::Option | NodeKind::Factor)
        )
    })
}

/// Upstream source for an orphaned factor, with plausibility for causal links.
enum Upstream {
    Option(String),
    Factor(String, f64),
}

fn choose_upstream(graph: &Graph, factor: &str) -> Option<Upstream> {
    // An option that already intervenes on this factor.
    let mut intervening: Vec<&str> = graph
        .nodes_of_kind(NodeKind::Option)
        .filter(|n| n.interventions().any(|(k, _)| k == factor))
        .map(|n| n.id.as_str())
        .collect();
    intervening.sort();
    if let Some(option) = intervening.first() {
        return Some(Upstream::Option((*option).to_string()));
    }

    // A fed sibling factor sharing a downstream target, not downstream of this factor.
    let targets: Vec<&str> = graph.outgoing(factor).map(|e| e.to.as_str()).collect();
    let downstream = graph.reachable_from(factor);
    let mut siblings: Vec<(String, f64)> = graph
        .nodes_of_kind(NodeKind::Factor)
        .filter(|n| n.id != factor && !downstream.contains(&n.id) && is_fed(graph, &n.id))
        .filter_map(|n| {
            graph
                .outgoing(&n.id)
                .find(|e| targets.contains(&e.to.as_str()))
                .map(|e| {
                    (
                        n.id.clone(),
                        e.belief_exists.unwrap_or(DEFAULT_PLAUSIBILITY),
                    )
                })
        })
        .collect();
    siblings.sort_by(|a, b| a.0.cmp(&b.0));
    if let Some((sibling, plausibility)) = siblings.into_iter().next() {
        return Some(Upstream::Factor(sibling, plausibility));
    }

    first_id_of(graph, NodeKind::Option).map(Upstream::Option)
}

fn wire_factors(graph: &mut Graph) -> Vec<RepairRecord> {
    let mut orphans: Vec<String> = graph
        .nodes_of_kind(NodeKind::Factor)
        .filter(|n| !is_fed(graph, &n.id))
        .map(|n| n.id.clone())
        .collect();
    orphans.sort();

    let mut records = Vec::new();
    for factor in orphans {
        let Some(upstream) = choose_upstream(graph, &factor) else {
            continue;
        };
        let edge = match upstream {
            Upstream::Option(option) => structural(&option, &factor, STRUCTURAL_MEAN),
            Upstream::Factor(sibling, plausibility) => {
                let (mean, std, belief) = causal_values(plausibility);
                Edge::synthetic(
                    sibling,
                    factor.clone(),
                    EdgeOrigin::Repair,
                    PROVENANCE,
                    mean,
                    std,
                    belief,
                )
            }
        };
        debug!(factor = %factor, from = %edge.from, "Wired orphan factor");
        graph.edges.push(edge);
        records.push(RepairRecord::new(RepairCode::OrphanWired, factor));
    }
    records
}

fn link_options(graph: &mut Graph) -> Vec<RepairRecord> {
    let Some(decision) = first_id_of(graph, NodeKind::Decision) else {
        return Vec::new();
    };
    let mut unlinked: Vec<String> = graph
        .nodes_of_kind(NodeKind::Option)
        .filter(|n| {
            !graph
                .incoming(&n.id)
                .any(|e| graph.kind_of(&e.from) == Some(NodeKind::Decision))
        })
        .map(|n| n.id.clone())
        .collect();
    unlinked.sort();

    let mut records = Vec::new();
    for option in unlinked {
        graph
            .edges
            .push(structural(&decision, &option, STRUCTURAL_MEAN));
        records.push(RepairRecord::new(RepairCode::OptionLinked, option));
    }
    records
}
