//! Frozen snapshot of edge numeric fields taken right after drafting.
//!
//! The stash is built once from the draft graph and exposes only `&self`
//! accessors; the draft stage hands it out behind an `Arc`, so nothing
//! downstream can mutate it.

use serde::Serialize;
use std::collections::BTreeMap;

use super::{EffectDirection, Graph};

/// Numeric fields of one edge as the model authored them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StashedEdgeFields {
    /// Mean strength.
    pub strength_mean: Option<f64>,
    /// Strength standard deviation.
    pub strength_std: Option<f64>,
    /// Existence probability.
    pub belief_exists: Option<f64>,
    /// Effect sign.
    pub effect_direction: Option<EffectDirection>,
}

/// Immutable post-draft snapshot keyed by edge ID and by `from::to`.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeFieldStash {
    by_id: BTreeMap<String, StashedEdgeFields>,
    by_pair: BTreeMap<String, StashedEdgeFields>,
}

impl EdgeFieldStash {
    /// Snapshot every edge of the graph.
    ///
    /// Nested `strength` objects are read through, so the stash holds the
    /// values the model meant even before normalisation lifts them.
    pub fn capture(graph: &Graph) -> Self {
        let mut by_id = BTreeMap::new();
        let mut by_pair = BTreeMap::new();
        for edge in &graph.edges {
            let fields = StashedEdgeFields {
                strength_mean: edge.effective_strength_mean(),
                strength_std: edge.effective_strength_std(),
                belief_exists: edge.belief_exists,
                effect_direction: edge.effect_direction,
            };
            if let Some(id) = &edge.id {
                by_id.entry(id.clone()).or_insert_with(|| fields.clone());
            }
            by_pair.entry(edge.pair_key()).or_insert(fields);
        }
        Self { by_id, by_pair }
    }

    /// Fields stashed under an edge ID.
    pub fn by_id(&self, id: &str) -> Option<&StashedEdgeFields> {
        self.by_id.get(id)
    }

    /// Fields stashed under a `from::to` key.
    pub fn by_pair(&self, from: &str, to: &str) -> Option<&StashedEdgeFields> {
        self.by_pair.get(&format!("{}::{}", from, to))
    }

    /// Number of distinct `from::to` entries.
    pub fn len(&self) -> usize {
        self.by_pair.len()
    }

    /// True when the draft graph had no edges.
    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }

    /// Refill numeric fields that went missing on model-authored edges.
    ///
    /// Only absent fields are filled; values present on the graph always win.
    /// Returns the number of edges touched.
    pub fn restore_missing(&self, graph: &mut Graph) -> usize {
        let mut restored = 0;
        for edge in graph.edges.iter_mut().filter(|e| !e.is_synthetic()) {
            let stashed = edge
                .id
                .as_deref()
                .and_then(|id| self.by_id.get(id))
                .or_else(|| self.by_pair.get(&edge.pair_key()));
            let Some(stashed) = stashed else { continue };

            let mut touched = false;
            if edge.strength_mean.is_none() && stashed.strength_mean.is_some() {
                edge.strength_mean = stashed.strength_mean;
                touched = true;
            }
            if edge.strength_std.is_none() && stashed.strength_std.is_some() {
                edge.strength_std = stashed.strength_std;
                touched = true;
            }
            if edge.belief_exists.is_none() && stashed.belief_exists.is_some() {
                edge.belief_exists = stashed.belief_exists;
                touched = true;
            }
            if edge.effect_direction.is_none() && stashed.effect_direction.is_some() {
                edge.effect_direction = stashed.effect_direction;
                touched = true;
            }
            if touched {
                restored += 1;
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node, NodeKind};
    use serde_json::json;

    fn graph() -> Graph {
        let mut nested = Edge::new("fac_1", "out_1");
        nested
            .extra
            .insert("strength".to_string(), json!({"mean": 0.7, "std": 0.2}));
        Graph::new(
            vec![
                Node::new("opt_1", NodeKind::Option, "A"),
                Node::new("fac_1", NodeKind::Factor, "F"),
                Node::new("out_1", NodeKind::Outcome, "O"),
            ],
            vec![
                Edge::new("opt_1", "fac_1")
                    .with_id("e1")
                    .with_strength(0.5, 0.1, 0.9),
                nested,
            ],
        )
    }

    #[test]
    fn test_capture_keys_by_id_and_pair() {
        let stash = EdgeFieldStash::capture(&graph());
        assert_eq!(stash.len(), 2);
        assert_eq!(stash.by_id("e1").unwrap().strength_mean, Some(0.5));
        assert_eq!(
            stash.by_pair("opt_1", "fac_1").unwrap().belief_exists,
            Some(0.9)
        );
        // Nested strength is read through.
        assert_eq!(
            stash.by_pair("fac_1", "out_1").unwrap().strength_mean,
            Some(0.7)
        );
    }

    #[test]
    fn test_restore_fills_only_missing_fields() {
        let original = graph();
        let stash = EdgeFieldStash::capture(&original);

        let mut mutated = original.clone();
        mutated.edges[0].strength_mean = None;
        mutated.edges[0].belief_exists = Some(0.1);

        let restored = stash.restore_missing(&mut mutated);
        // Edge 0 lost its mean; edge 1 only ever had the nested form.
        assert_eq!(restored, 2);
        assert_eq!(mutated.edges[0].strength_mean, Some(0.5));
        assert_eq!(mutated.edges[0].belief_exists, Some(0.1));
        assert_eq!(mutated.edges[1].strength_mean, Some(0.7));

        assert_eq!(stash.restore_missing(&mut mutated), 0);
    }

    #[test]
    fn test_restore_skips_synthetic_edges() {
        let stash = EdgeFieldStash::capture(&graph());
        let mut g = graph();
        g.edges[0].origin = Some(crate::graph::EdgeOrigin::Repair);
        g.edges[0].strength_mean = None;
        g.edges.truncate(1);
        assert_eq!(stash.restore_missing(&mut g), 0);
        assert!(g.edges[0].strength_mean.is_none());
    }
}
