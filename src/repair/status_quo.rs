//! Status-quo handling.
//!
//! An option with zero outgoing edges (typically "do nothing") is wired to
//! the factors its siblings intervene on. With no sibling template it is
//! only marked droppable; the graph is left untouched so the sweep stays
//! idempotent.

use serde::Serialize;

use super::{RepairCode, RepairRecord, STRUCTURAL_BELIEF, STRUCTURAL_MEAN, STRUCTURAL_STD};
use crate::detect::intervention_template;
use crate::graph::{Edge, EdgeOrigin, Graph, NodeKind};

const PROVENANCE: &str = "status_quo_wiring";

/// Telemetry for status-quo handling across a sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusQuoTrace {
    /// A disconnected option was found.
    pub detected: bool,
    /// At least one was wired from a sibling template.
    pub fixed: bool,
    /// At least one had no template and was marked droppable.
    pub marked_droppable: bool,
    /// Options that were handled.
    pub option_ids: Vec<String>,
    /// Synthetic edges added.
    pub edges_added: usize,
}

impl StatusQuoTrace {
    /// Fold another pass's trace into this one.
    pub fn merge(&mut self, other: &StatusQuoTrace) {
        self.detected |= other.detected;
        self.fixed |= other.fixed;
        self.marked_droppable |= other.marked_droppable;
        for id in &other.option_ids {
            if !self.option_ids.contains(id) {
                self.option_ids.push(id.clone());
            }
        }
        self.edges_added += other.edges_added;
    }
}

/// Wire or mark every option without outgoing edges.
pub fn handle_status_quo(graph: &mut Graph) -> (StatusQuoTrace, Vec<RepairRecord>) {
    let mut trace = StatusQuoTrace::default();
    let mut records = Vec::new();

    let mut disconnected: Vec<String> = graph
        .nodes_of_kind(NodeKind::Option)
        .filter(|n| graph.outgoing(&n.id).next().is_none())
        .map(|n| n.id.clone())
        .collect();
    disconnected.sort();

    for option in disconnected {
        trace.detected = true;
        trace.option_ids.push(option.clone());

        let template = intervention_template(graph, &option);
        if template.is_empty() {
            trace.marked_droppable = true;
            continue;
        }
        for factor in template {
            graph.edges.push(Edge::synthetic(
                option.clone(),
                factor.clone(),
                EdgeOrigin::Repair,
                PROVENANCE,
                STRUCTURAL_MEAN,
                STRUCTURAL_STD,
                STRUCTURAL_BELIEF,
            ));
            trace.edges_added += 1;
            records.push(RepairRecord::new(
                RepairCode::StatusQuoWired,
                format!("{}::{}", option, factor),
            ));
        }
        trace.fixed = true;
    }
    (trace, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    fn graph(with_template: bool) -> Graph {
        let opt_a = Node::new("opt_a", NodeKind::Option, "Expand");
        let opt_a = if with_template {
            opt_a.with_interventions([("fac_cost", 1.0), ("fac_demand", 0.5)])
        } else {
            opt_a
        };
        Graph::new(
            vec![
                opt_a,
                Node::new("opt_status_quo", NodeKind::Option, "Do nothing"),
                Node::new("fac_cost", NodeKind::Factor, "Cost"),
                Node::new("fac_demand", NodeKind::Factor, "Demand"),
            ],
            vec![
                Edge::new("opt_a", "fac_cost"),
                Edge::new("opt_a", "fac_demand"),
            ],
        )
    }

    #[test]
    fn test_wired_from_sibling_interventions() {
        let mut g = graph(true);
        let (trace, records) = handle_status_quo(&mut g);
        assert!(trace.detected && trace.fixed && !trace.marked_droppable);
        assert_eq!(trace.edges_added, 2);
        assert_eq!(records.len(), 2);
        assert!(g.has_edge("opt_status_quo", "fac_cost"));
        assert!(g.has_edge("opt_status_quo", "fac_demand"));

        let (again, _) = handle_status_quo(&mut g);
        assert!(!again.detected);
    }

    #[test]
    fn test_marked_droppable_without_template() {
        let mut g = graph(false);
        let before = g.clone();
        let (trace, records) = handle_status_quo(&mut g);
        assert!(trace.detected && trace.marked_droppable && !trace.fixed);
        assert_eq!(trace.option_ids, vec!["opt_status_quo"]);
        assert!(records.is_empty());
        assert_eq!(g, before);
    }

    #[test]
    fn test_merge_keeps_ids_unique() {
        let mut total = StatusQuoTrace::default();
        let pass = StatusQuoTrace {
            detected: true,
            marked_droppable: true,
            option_ids: vec!["opt_x".to_string()],
            ..Default::default()
        };
        total.merge(&pass);
        total.merge(&pass);
        assert_eq!(total.option_ids.len(), 1);
        assert!(total.marked_droppable);
    }
}
