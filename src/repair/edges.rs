//! Closed-world edge filtering, numeric clamping and strength normalisation.

use serde_json::{json, Value};
use std::collections::HashSet;

use super::{RepairCode, RepairRecord};
use crate::graph::{is_allowed_for, EdgeFilterMode, Graph};

/// Key set on edges kept in lenient mode despite an invalid pattern.
pub const PATTERN_FLAG: &str = "pattern_flag";

/// Strip dangling edges always; strip or flag disallowed patterns by mode.
pub fn filter_edges(graph: &mut Graph, mode: EdgeFilterMode) -> Vec<RepairRecord> {
    let mut records = Vec::new();
    let ids: HashSet<String> = graph.nodes.iter().map(|n| n.id.clone()).collect();

    graph.edges.retain(|e| {
        let keep = ids.contains(&e.from) && ids.contains(&e.to);
        if !keep {
            records.push(RepairRecord::new(
                RepairCode::DanglingEdgeStripped,
                e.pair_key(),
            ));
        }
        keep
    });

    let kinds: std::collections::HashMap<String, _> =
        graph.nodes.iter().map(|n| (n.id.clone(), n.kind)).collect();
    let is_invalid = |e: &crate::graph::Edge| match (kinds.get(&e.from), kinds.get(&e.to)) {
        (Some(from), Some(to)) => e.from == e.to || !is_allowed_for(e, *from, *to),
        _ => false,
    };

    match mode {
        EdgeFilterMode::Strict => {
            graph.edges.retain(|e| {
                if is_invalid(e) {
                    records.push(RepairRecord::new(
                        RepairCode::InvalidEdgeStripped,
                        e.pair_key(),
                    ));
                    false
                } else {
                    true
                }
            });
        }
        EdgeFilterMode::Lenient => {
            let flagged: Vec<usize> = graph
                .edges
                .iter()
                .enumerate()
                .filter(|(_, e)| is_invalid(e) && !e.extra.contains_key(PATTERN_FLAG))
                .map(|(i, _)| i)
                .collect();
            for i in flagged {
                let edge = &mut graph.edges[i];
                edge.extra
                    .insert(PATTERN_FLAG.to_string(), json!("invalid_edge_pattern"));
                records.push(RepairRecord::new(
                    RepairCode::InvalidEdgeFlagged,
                    edge.pair_key(),
                ));
            }
        }
    }
    records
}

/// Clamp belief into `[0,1]`, make std non-negative, drop non-finite values.
pub fn clamp_numeric_fields(graph: &mut Graph) -> Vec<RepairRecord> {
    let mut records = Vec::new();
    for edge in &mut graph.edges {
        let mut touched = false;
        if let Some(b) = edge.belief_exists {
            let fixed = if b.is_finite() { Some(b.clamp(0.0, 1.0)) } else { None };
            if fixed != Some(b) {
                edge.belief_exists = fixed;
                touched = true;
            }
        }
        if let Some(s) = edge.strength_std {
            let fixed = if s.is_finite() { Some(s.abs()) } else { None };
            if fixed != Some(s) {
                edge.strength_std = fixed;
                touched = true;
            }
        }
        if let Some(m) = edge.strength_mean {
            if !m.is_finite() {
                edge.strength_mean = None;
                touched = true;
            }
        }
        if touched {
            records.push(RepairRecord::new(
                RepairCode::EdgeNumericClamped,
                edge.pair_key(),
            ));
        }
    }
    records
}

/// Lift nested `strength: {mean, std}` objects into the flat fields.
///
/// Flat values already present win over nested ones. Returns how many
/// edges carried a nested object.
pub fn normalize_edge_strengths(graph: &mut Graph) -> usize {
    let mut lifted = 0;
    for edge in &mut graph.edges {
        let nested = match edge.extra.remove("strength") {
            Some(Value::Object(nested)) => nested,
            Some(other) => {
                edge.extra.insert("strength".to_string(), other);
                continue;
            }
            None => continue,
        };
        lifted += 1;
        if edge.strength_mean.is_none() {
            edge.strength_mean = nested.get("mean").and_then(Value::as_f64);
        }
        if edge.strength_std.is_none() {
            edge.strength_std = nested.get("std").and_then(Value::as_f64);
        }
    }
    lifted
}

/// Whether any edge still carries a nested strength object.
pub fn has_nested_strength(graph: &Graph) -> bool {
    graph.edges.iter().any(|e| e.nested_strength().is_some())
}
