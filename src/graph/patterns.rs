//! Closed-world edge patterns.
//!
//! Model-authored edges must follow one of the allow-listed
//! `(from_kind, to_kind)` pairs. Synthetic edges may additionally link
//! factor to factor, which is how orphan wiring attaches a factor to its
//! nearest upstream factor.

use serde::{Deserialize, Serialize};

use super::{Edge, NodeKind};

/// Allowed adjacency pairs for model-authored edges.
pub const ALLOWED_EDGE_PATTERNS: [(NodeKind, NodeKind); 6] = [
    (NodeKind::Decision, NodeKind::Option),
    (NodeKind::Option, NodeKind::Factor),
    (NodeKind::Factor, NodeKind::Outcome),
    (NodeKind::Factor, NodeKind::Risk),
    (NodeKind::Outcome, NodeKind::Goal),
    (NodeKind::Risk, NodeKind::Goal),
];

/// Extra pairs permitted only on synthetic edges.
pub const SYNTHETIC_ONLY_PATTERNS: [(NodeKind, NodeKind); 1] =
    [(NodeKind::Factor, NodeKind::Factor)];

/// Whether a model-authored edge between these kinds is legal.
pub fn is_allowed_pattern(from: NodeKind, to: NodeKind) -> bool {
    ALLOWED_EDGE_PATTERNS.contains(&(from, to))
}

/// Whether an edge between these kinds is legal given its provenance.
pub fn is_allowed_for(edge: &Edge, from: NodeKind, to: NodeKind) -> bool {
    is_allowed_pattern(from, to)
        || (edge.is_synthetic() && SYNTHETIC_ONLY_PATTERNS.contains(&(from, to)))
}

/// How the repair engine treats edges outside the allow-list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeFilterMode {
    /// Strip disallowed edges.
    #[default]
    Strict,
    /// Keep disallowed edges but flag them.
    Lenient,
}

impl std::str::FromStr for EdgeFilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(EdgeFilterMode::Strict),
            "lenient" => Ok(EdgeFilterMode::Lenient),
            _ => Err(format!("Unknown edge filter mode: {}", s)),
        }
    }
}

/// Structural category of an edge, recognised by ID prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCategory {
    /// `decision → option` and `option → factor` wiring.
    Structural,
    /// Factor-level causal effects.
    Causal,
    /// Outcome/risk links into the goal.
    Bridge,
}

impl EdgeCategory {
    /// All categories, in sampling order.
    pub const ALL: [EdgeCategory; 3] = [
        EdgeCategory::Structural,
        EdgeCategory::Causal,
        EdgeCategory::Bridge,
    ];

    /// ID prefix that marks this category.
    pub fn prefix(&self) -> &'static str {
        match self {
            EdgeCategory::Structural => "struct_",
            EdgeCategory::Causal => "causal_",
            EdgeCategory::Bridge => "bridge_",
        }
    }

    /// Category encoded in an edge ID, if any.
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| id.starts_with(c.prefix()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeOrigin;

    #[test]
    fn test_chain_pairs_allowed() {
        assert!(is_allowed_pattern(NodeKind::Decision, NodeKind::Option));
        assert!(is_allowed_pattern(NodeKind::Risk, NodeKind::Goal));
        assert!(!is_allowed_pattern(NodeKind::Option, NodeKind::Goal));
        assert!(!is_allowed_pattern(NodeKind::Goal, NodeKind::Decision));
        assert!(!is_allowed_pattern(NodeKind::Factor, NodeKind::Factor));
    }

    #[test]
    fn test_factor_to_factor_only_for_synthetic() {
        let model = Edge::new("fac_a", "fac_b");
        assert!(!is_allowed_for(&model, NodeKind::Factor, NodeKind::Factor));

        let synthetic = Edge::synthetic(
            "fac_a",
            "fac_b",
            EdgeOrigin::Repair,
            "orphan_wiring",
            0.3,
            0.2,
            0.6,
        );
        assert!(is_allowed_for(&synthetic, NodeKind::Factor, NodeKind::Factor));
    }

    #[test]
    fn test_edge_category_from_id() {
        assert_eq!(
            EdgeCategory::from_id("struct_dec_opt"),
            Some(EdgeCategory::Structural)
        );
        assert_eq!(EdgeCategory::from_id("causal_1"), Some(EdgeCategory::Causal));
        assert_eq!(EdgeCategory::from_id("bridge_x"), Some(EdgeCategory::Bridge));
        assert_eq!(EdgeCategory::from_id("e1"), None);
    }

    #[test]
    fn test_filter_mode_parse() {
        assert_eq!("LENIENT".parse::<EdgeFilterMode>(), Ok(EdgeFilterMode::Lenient));
        assert!("loose".parse::<EdgeFilterMode>().is_err());
    }
}
