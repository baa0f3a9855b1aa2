//! Goal inference.
//!
//! When a non-empty graph has no goal, one is synthesised. The label comes
//! from an explicit caller-supplied goal, then from a phrase in the brief,
//! then from a placeholder. Every outcome is wired to it with positive
//! strength and every risk with negative strength.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use super::{RepairCode, RepairRecord, STRUCTURAL_BELIEF, STRUCTURAL_MEAN, STRUCTURAL_STD};
use crate::graph::{Edge, EdgeOrigin, Graph, Node, NodeKind};

/// Base ID of a synthesised goal.
pub const INFERRED_GOAL_ID: &str = "goal_inferred";
/// Label used when nothing better is available.
pub const PLACEHOLDER_GOAL_LABEL: &str = "Achieve the best overall outcome";

const MAX_LABEL_WORDS: usize = 8;

/// Where the inferred goal label came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSource {
    /// Supplied by the caller.
    Explicit,
    /// Extracted from the brief.
    Brief,
    /// Default label.
    Placeholder,
}

/// Inputs for goal inference.
#[derive(Debug, Clone, Default)]
pub struct GoalHints {
    /// Caller-supplied goal label.
    pub explicit_label: Option<String>,
    /// The brief text.
    pub brief: String,
}

impl GoalHints {
    /// Hints from a brief alone.
    pub fn from_brief(brief: impl Into<String>) -> Self {
        Self {
            explicit_label: None,
            brief: brief.into(),
        }
    }

    /// Set an explicit goal label.
    pub fn with_explicit(mut self, label: impl Into<String>) -> Self {
        self.explicit_label = Some(label.into());
        self
    }

    /// Resolve the label and its source.
    pub fn resolve(&self) -> (String, GoalSource) {
        if let Some(label) = self
            .explicit_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
        {
            return (label.to_string(), GoalSource::Explicit);
        }
        if let Some(label) = extract_goal_from_brief(&self.brief) {
            return (label, GoalSource::Brief);
        }
        (PLACEHOLDER_GOAL_LABEL.to_string(), GoalSource::Placeholder)
    }
}

/// Record of a synthesised goal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalInference {
    /// ID of the new goal node.
    pub goal_id: String,
    /// Its label.
    pub label: String,
    /// Where the label came from.
    pub source: GoalSource,
    /// Outcomes wired to it.
    pub outcomes_wired: usize,
    /// Risks wired to it.
    pub risks_wired: usize,
}

static GOAL_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(reduce|lower|cut|decrease|minimi[sz]e|grow|increase|improve|maximi[sz]e|boost|expand|raise|achieve)\s+([a-z0-9][^.,;:!?\n]{1,80})",
    )
    .expect("goal phrase pattern is valid")
});

/// Extract a goal phrase such as "reduce churn" from a brief.
pub fn extract_goal_from_brief(brief: &str) -> Option<String> {
    let caps = GOAL_PHRASE.captures(brief)?;
    let verb = caps.get(1)?.as_str().to_lowercase();
    let object: Vec<&str> = caps
        .get(2)?
        .as_str()
        .split_whitespace()
        .take(MAX_LABEL_WORDS - 1)
        .collect();
    if object.is_empty() {
        return None;
    }
    let phrase = format!("{} {}", verb, object.join(" "));
    let mut chars = phrase.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

fn unique_goal_id(graph: &Graph) -> String {
    if graph.node(INFERRED_GOAL_ID).is_none() {
        return INFERRED_GOAL_ID.to_string();
    }
    (1..)
        .map(|i| format!("{}_{}", INFERRED_GOAL_ID, i))
        .find(|id| graph.node(id).is_none())
        .unwrap_or_else(|| INFERRED_GOAL_ID.to_string())
}

/// Synthesise a goal if the graph has none. No-op on empty graphs.
pub fn infer_goal(graph: &mut Graph, hints: &GoalHints) -> Option<(GoalInference, Vec<RepairRecord>)> {
    if graph.is_empty() || graph.has_kind(NodeKind::Goal) {
        return None;
    }

    let (label, source) = hints.resolve();
    let goal_id = unique_goal_id(graph);

    let mut outcomes: Vec<String> = graph
        .nodes_of_kind(NodeKind::Outcome)
        .map(|n| n.id.clone())
        .collect();
    let mut risks: Vec<String> = graph
        .nodes_of_kind(NodeKind::Risk)
        .map(|n| n.id.clone())
        .collect();
    outcomes.sort();
    risks.sort();

    graph
        .nodes
        .push(Node::new(goal_id.clone(), NodeKind::Goal, label.clone()));

    for outcome in &outcomes {
        graph.edges.push(Edge::synthetic(
            outcome.clone(),
            goal_id.clone(),
            EdgeOrigin::Repair,
            "goal_inference",
            STRUCTURAL_MEAN,
            STRUCTURAL_STD,
            STRUCTURAL_BELIEF,
        ));
    }
    for risk in &risks {
        graph.edges.push(Edge::synthetic(
            risk.clone(),
            goal_id.clone(),
            EdgeOrigin::Repair,
            "goal_inference",
            -STRUCTURAL_MEAN,
            STRUCTURAL_STD,
            STRUCTURAL_BELIEF,
        ));
    }

    debug!(
        goal_id = %goal_id,
        source = ?source,
        outcomes = outcomes.len(),
        risks = risks.len(),
        "Inferred goal"
    );

    let records = vec![RepairRecord::new(RepairCode::GoalInferred, goal_id.clone())];
    Some((
        GoalInference {
            goal_id,
            label,
            source,
            outcomes_wired: outcomes.len(),
            risks_wired: risks.len(),
        },
        records,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EffectDirection;

    fn goalless() -> Graph {
        Graph::new(
            vec![
                Node::new("out_1", NodeKind::Outcome, "Revenue"),
                Node::new("risk_1", NodeKind::Risk, "Churn"),
            ],
            vec![],
        )
    }

    #[test]
    fn test_brief_extraction() {
        assert_eq!(
            extract_goal_from_brief("We need to reduce costs in the warehouse. Options are..."),
            Some("Reduce costs in the warehouse".to_string())
        );
        assert_eq!(
            extract_goal_from_brief("How do we GROW revenue, quickly?"),
            Some("Grow revenue".to_string())
        );
        assert_eq!(extract_goal_from_brief("Which vendor?"), None);
    }

    #[test]
    fn test_source_priority() {
        let hints = GoalHints::from_brief("improve retention");
        assert_eq!(hints.resolve().1, GoalSource::Brief);
        assert_eq!(
            hints.clone().with_explicit("Hit Q3 target").resolve(),
            ("Hit Q3 target".to_string(), GoalSource::Explicit)
        );
        assert_eq!(
            GoalHints::from_brief("Which vendor?").resolve().1,
            GoalSource::Placeholder
        );
        assert_eq!(
            GoalHints::from_brief("x").with_explicit("  ").resolve().1,
            GoalSource::Placeholder
        );
    }

    #[test]
    fn test_infer_wires_outcomes_positive_risks_negative() {
        let mut g = goalless();
        let (inference, records) = infer_goal(&mut g, &GoalHints::from_brief("grow revenue")).unwrap();
        assert_eq!(inference.goal_id, INFERRED_GOAL_ID);
        assert_eq!(inference.outcomes_wired, 1);
        assert_eq!(inference.risks_wired, 1);
        assert_eq!(records[0].code, RepairCode::GoalInferred);

        let to_goal: Vec<_> = g.incoming(INFERRED_GOAL_ID).collect();
        assert_eq!(to_goal.len(), 2);
        let risk_edge = to_goal.iter().find(|e| e.from == "risk_1").unwrap();
        assert_eq!(risk_edge.effect_direction, Some(EffectDirection::Negative));
        assert_eq!(risk_edge.strength_mean, Some(-1.0));
        assert_eq!(risk_edge.provenance.as_deref(), Some("goal_inference"));
    }

    #[test]
    fn test_existing_goal_never_duplicated() {
        let mut g = goalless();
        infer_goal(&mut g, &GoalHints::default());
        assert!(infer_goal(&mut g, &GoalHints::default()).is_none());
        assert_eq!(g.nodes_of_kind(NodeKind::Goal).count(), 1);
    }

    #[test]
    fn test_empty_graph_untouched() {
        let mut g = Graph::default();
        assert!(infer_goal(&mut g, &GoalHints::default()).is_none());
        assert!(g.is_empty());
    }

    #[test]
    fn test_id_collision_gets_suffix() {
        let mut g = goalless();
        g.nodes.push(Node::new(INFERRED_GOAL_ID, NodeKind::Factor, "odd"));
        let (inference, _) = infer_goal(&mut g, &GoalHints::default()).unwrap();
        assert_eq!(inference.goal_id, "goal_inferred_1");
    }
}
