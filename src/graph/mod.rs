//! Decision graph data model.
//!
//! A graph is a DAG over a closed node vocabulary
//! (`goal | decision | option | factor | outcome | risk`). Model-authored
//! structure must follow `decision → option → factor → {outcome|risk} → goal`;
//! edges created by the repair engine or enrichment carry synthetic
//! provenance so they can always be told apart from model output.
//!
//! - [`Graph`], [`Node`], [`Edge`]: the wire shapes (serde)
//! - [`patterns`]: the closed-world adjacency allow-list
//! - [`stash`]: the frozen post-draft snapshot of edge numeric fields

pub mod patterns;
pub mod stash;

pub use patterns::*;
pub use stash::*;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Node kinds in the closed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The objective the decision serves.
    Goal,
    /// The decision being made.
    Decision,
    /// A candidate choice for the decision.
    Option,
    /// A causal driver influenced by options.
    Factor,
    /// A desirable consequence feeding the goal.
    Outcome,
    /// An undesirable consequence feeding the goal.
    Risk,
}

impl NodeKind {
    /// All kinds, in canonical order.
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Goal,
        NodeKind::Decision,
        NodeKind::Option,
        NodeKind::Factor,
        NodeKind::Outcome,
        NodeKind::Risk,
    ];

    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Goal => "goal",
            NodeKind::Decision => "decision",
            NodeKind::Option => "option",
            NodeKind::Factor => "factor",
            NodeKind::Outcome => "outcome",
            NodeKind::Risk => "risk",
        }
    }

    /// Kinds that cap enforcement never trims.
    pub fn is_protected(&self) -> bool {
        !matches!(self, NodeKind::Factor)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "goal" => Ok(NodeKind::Goal),
            "decision" => Ok(NodeKind::Decision),
            "option" => Ok(NodeKind::Option),
            "factor" => Ok(NodeKind::Factor),
            "outcome" => Ok(NodeKind::Outcome),
            "risk" => Ok(NodeKind::Risk),
            _ => Err(format!("Unknown node kind: {}", s)),
        }
    }
}

/// Optional payload attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Factor ID → override value (only meaningful on `option` nodes).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub interventions: BTreeMap<String, f64>,
    /// Any other model-supplied fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A node in the decision graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node ID.
    pub id: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Human-readable label.
    #[serde(default)]
    pub label: String,
    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NodeData>,
    /// Numeric target for `goal` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_threshold: Option<f64>,
    /// The brief text the threshold was read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_threshold_raw: Option<Value>,
    /// Unit of the threshold, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_threshold_unit: Option<String>,
}

impl Node {
    /// Create a node with no payload.
    pub fn new(id: impl Into<String>, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            data: None,
            goal_threshold: None,
            goal_threshold_raw: None,
            goal_threshold_unit: None,
        }
    }

    /// Set interventions (option nodes).
    pub fn with_interventions<I, K>(mut self, interventions: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let data = self.data.get_or_insert_with(NodeData::default);
        data.interventions = interventions
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect();
        self
    }

    /// Set the goal threshold and its raw text.
    pub fn with_threshold(mut self, threshold: f64, raw: Option<Value>) -> Self {
        self.goal_threshold = Some(threshold);
        self.goal_threshold_raw = raw;
        self
    }

    /// Intervention map, empty when the node carries none.
    pub fn interventions(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.data.iter().flat_map(|d| d.interventions.iter())
    }
}

/// Sign of an edge's causal effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectDirection {
    /// Increasing the source increases the target.
    Positive,
    /// Increasing the source decreases the target.
    Negative,
}

impl EffectDirection {
    /// Get the direction name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectDirection::Positive => "positive",
            EffectDirection::Negative => "negative",
        }
    }
}

/// Which routine produced an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeOrigin {
    /// Authored by the model.
    Model,
    /// Created by the deterministic repair engine.
    Repair,
    /// Created by the enrichment collaborator.
    Enrichment,
}

/// Whether an edge's values came from the model or a machine routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvenanceSource {
    /// Values were authored by the model.
    Model,
    /// Values were filled by a deterministic routine.
    Synthetic,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge ID; assigned deterministically when the model omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Source node ID.
    pub from: String,
    /// Target node ID.
    pub to: String,
    /// Mean effect strength.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength_mean: Option<f64>,
    /// Standard deviation of the effect strength.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength_std: Option<f64>,
    /// Probability that the edge exists, in `[0,1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub belief_exists: Option<f64>,
    /// Sign of the effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_direction: Option<EffectDirection>,
    /// Producing subsystem (absent means model-authored).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<EdgeOrigin>,
    /// Name of the routine that produced the edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
    /// Model vs. synthetic values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance_source: Option<ProvenanceSource>,
    /// Unrecognised fields (e.g. a nested `strength` object) kept for normalisation.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Edge {
    /// Create a bare model-style edge with no numeric fields.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: None,
            from: from.into(),
            to: to.into(),
            strength_mean: None,
            strength_std: None,
            belief_exists: None,
            effect_direction: None,
            origin: None,
            provenance: None,
            provenance_source: None,
            extra: Map::new(),
        }
    }

    /// Create a synthetic edge stamped with the producing routine.
    pub fn synthetic(
        from: impl Into<String>,
        to: impl Into<String>,
        origin: EdgeOrigin,
        provenance: impl Into<String>,
        strength_mean: f64,
        strength_std: f64,
        belief_exists: f64,
    ) -> Self {
        let direction = if strength_mean < 0.0 {
            EffectDirection::Negative
        } else {
            EffectDirection::Positive
        };
        Self {
            strength_mean: Some(strength_mean),
            strength_std: Some(strength_std),
            belief_exists: Some(belief_exists),
            effect_direction: Some(direction),
            origin: Some(origin),
            provenance: Some(provenance.into()),
            provenance_source: Some(ProvenanceSource::Synthetic),
            ..Self::new(from, to)
        }
    }

    /// Set the edge ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the numeric fields.
    pub fn with_strength(mut self, mean: f64, std: f64, belief: f64) -> Self {
        self.strength_mean = Some(mean);
        self.strength_std = Some(std);
        self.belief_exists = Some(belief);
        self.effect_direction = Some(if mean < 0.0 {
            EffectDirection::Negative
        } else {
            EffectDirection::Positive
        });
        self
    }

    /// `from::to` key used by the stash and deterministic sorting.
    pub fn pair_key(&self) -> String {
        format!("{}::{}", self.from, self.to)
    }

    /// True when the edge was produced by a machine routine.
    pub fn is_synthetic(&self) -> bool {
        matches!(self.origin, Some(EdgeOrigin::Repair | EdgeOrigin::Enrichment))
            || self.provenance_source == Some(ProvenanceSource::Synthetic)
    }

    /// Nested `strength: {mean, std}` object, if the model emitted one.
    pub fn nested_strength(&self) -> Option<&Map<String, Value>> {
        self.extra.get("strength").and_then(Value::as_object)
    }

    /// Mean strength, falling back to the nested form.
    pub fn effective_strength_mean(&self) -> Option<f64> {
        self.strength_mean.or_else(|| {
            self.nested_strength()
                .and_then(|s| s.get("mean"))
                .and_then(Value::as_f64)
        })
    }

    /// Strength std, falling back to the nested form.
    pub fn effective_strength_std(&self) -> Option<f64> {
        self.strength_std.or_else(|| {
            self.nested_strength()
                .and_then(|s| s.get("std"))
                .and_then(Value::as_f64)
        })
    }
}

/// Graph-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMeta {
    /// Root node IDs, if the model reported them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roots: Vec<String>,
    /// Leaf node IDs, if the model reported them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leaves: Vec<String>,
    /// Who produced the graph (`assistant`, `user`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Other metadata preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decision graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Schema version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Nodes.
    pub nodes: Vec<Node>,
    /// Edges.
    pub edges: Vec<Edge>,
    /// Metadata.
    #[serde(default)]
    pub meta: GraphMeta,
}

/// Reasons a raw model payload fails the minimal shape assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeViolation {
    /// The payload is not a JSON object.
    NotAnObject,
    /// `nodes` is missing or not an array.
    NodesNotArray,
    /// `edges` is missing or not an array.
    EdgesNotArray,
}

impl std::fmt::Display for ShapeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShapeViolation::NotAnObject => write!(f, "graph is not an object"),
            ShapeViolation::NodesNotArray => write!(f, "graph.nodes is not an array"),
            ShapeViolation::EdgesNotArray => write!(f, "graph.edges is not an array"),
        }
    }
}

/// Assert that a raw payload has array-typed `nodes` and `edges`.
pub fn assert_graph_shape(raw: &Value) -> Result<(), ShapeViolation> {
    let obj = raw.as_object().ok_or(ShapeViolation::NotAnObject)?;
    if !obj.get("nodes").map(Value::is_array).unwrap_or(false) {
        return Err(ShapeViolation::NodesNotArray);
    }
    if !obj.get("edges").map(Value::is_array).unwrap_or(false) {
        return Err(ShapeViolation::EdgesNotArray);
    }
    Ok(())
}

impl Graph {
    /// Create a graph from nodes and edges.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            version: None,
            nodes,
            edges,
            meta: GraphMeta::default(),
        }
    }

    /// True when there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by ID.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Kind of the node with the given ID.
    pub fn kind_of(&self, id: &str) -> Option<NodeKind> {
        self.node(id).map(|n| n.kind)
    }

    /// Map of node ID → kind.
    pub fn kind_index(&self) -> HashMap<&str, NodeKind> {
        self.nodes.iter().map(|n| (n.id.as_str(), n.kind)).collect()
    }

    /// Whether any node of the kind exists.
    pub fn has_kind(&self, kind: NodeKind) -> bool {
        self.nodes.iter().any(|n| n.kind == kind)
    }

    /// Nodes of one kind, in graph order.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Set of all node IDs.
    pub fn node_ids(&self) -> HashSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Edges leaving a node.
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Edges entering a node.
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Whether an edge `from → to` exists.
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.iter().any(|e| e.from == from && e.to == to)
    }

    /// Adjacency list over existing nodes only.
    pub fn adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let ids = self.node_ids();
        let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
        for e in &self.edges {
            if ids.contains(e.from.as_str()) && ids.contains(e.to.as_str()) {
                adj.entry(e.from.as_str()).or_default().push(e.to.as_str());
            }
        }
        adj
    }

    /// IDs reachable from `start` following edge direction (excluding `start`).
    pub fn reachable_from(&self, start: &str) -> HashSet<String> {
        let adj = self.adjacency();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in adj.get(current).into_iter().flatten() {
                if seen.insert((*next).to_string()) {
                    queue.push_back(next);
                }
            }
        }
        seen.remove(start);
        seen
    }

    /// Node IDs participating in a cycle, sorted (empty for a DAG).
    pub fn cycle_nodes(&self) -> Vec<String> {
        // Kahn's algorithm: whatever keeps a non-zero in-degree sits on or behind a cycle.
        let adj = self.adjacency();
        let mut in_degree: BTreeMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for targets in adj.values() {
            for t in targets {
                if let Some(d) = in_degree.get_mut(t) {
                    *d += 1;
                }
            }
        }
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        while let Some(id) = queue.pop_front() {
            for t in adj.get(id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(t) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(t);
                    }
                }
            }
        }
        in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// True when the graph has no directed cycle.
    pub fn is_acyclic(&self) -> bool {
        self.cycle_nodes().is_empty()
    }

    /// Edges whose endpoints are not both present.
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        let ids = self.node_ids();
        self.edges
            .iter()
            .filter(|e| !ids.contains(e.from.as_str()) || !ids.contains(e.to.as_str()))
            .collect()
    }

    /// Count of nodes per kind.
    pub fn kind_counts(&self) -> BTreeMap<NodeKind, usize> {
        let mut counts = BTreeMap::new();
        for n in &self.nodes {
            *counts.entry(n.kind).or_insert(0) += 1;
        }
        counts
    }
}
