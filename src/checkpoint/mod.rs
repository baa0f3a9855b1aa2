//! Stage-boundary checkpoints.
//!
//! A checkpoint records counts, field presence and a small stratified sample
//! of edges at a named stage boundary. Missing numeric fields are rendered as
//! the `MISSING` sentinel. After all checkpoints are collected a size guard
//! drops every `sample_edges` list if the serialized set is over budget;
//! scalar counters always survive.

pub mod provenance;

pub use provenance::{Provenance, PromptSource};

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::warn;

use crate::graph::{EdgeCategory, Edge, Graph};

/// Sentinel rendered for absent numeric fields.
pub const MISSING: &str = "MISSING";

/// Edges sampled when no ID carries a category prefix.
const FALLBACK_SAMPLE: usize = 3;

/// Named stage boundaries, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStage {
    /// Right after the adapter parsed the draft.
    PostAdapterNormalisation,
    /// After edge strength normalisation.
    PostNormalisation,
    /// After the deterministic repair sweep.
    PostRepair,
    /// After stabilisation and the threshold sweep.
    PostStabilisation,
    /// Immediately before the response is assembled.
    PreBoundary,
}

impl CheckpointStage {
    /// Get the stage name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStage::PostAdapterNormalisation => "post_adapter_normalisation",
            CheckpointStage::PostNormalisation => "post_normalisation",
            CheckpointStage::PostRepair => "post_repair",
            CheckpointStage::PostStabilisation => "post_stabilisation",
            CheckpointStage::PreBoundary => "pre_boundary",
        }
    }
}

impl std::fmt::Display for CheckpointStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A sampled numeric field: a number or the `MISSING` sentinel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampledValue {
    /// Numeric value as found.
    Number(f64),
    /// Field absent or non-numeric.
    Missing,
}

impl From<Option<f64>> for SampledValue {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => SampledValue::Number(v),
            _ => SampledValue::Missing,
        }
    }
}

impl Serialize for SampledValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SampledValue::Number(v) => serializer.serialize_f64(*v),
            SampledValue::Missing => serializer.serialize_str(MISSING),
        }
    }
}

/// One sampled edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampledEdge {
    /// Edge ID, if it has one.
    pub id: Option<String>,
    /// Source node.
    pub from: String,
    /// Target node.
    pub to: String,
    /// Flat `strength_mean`.
    pub strength_mean: SampledValue,
    /// Flat `strength_std`.
    pub strength_std: SampledValue,
    /// Flat `belief_exists`.
    pub belief_exists: SampledValue,
}

impl From<&Edge> for SampledEdge {
    fn from(edge: &Edge) -> Self {
        Self {
            id: edge.id.clone(),
            from: edge.from.clone(),
            to: edge.to.clone(),
            strength_mean: edge.strength_mean.into(),
            strength_std: edge.strength_std.into(),
            belief_exists: edge.belief_exists.into(),
        }
    }
}

/// Snapshot of the graph at a stage boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoint {
    /// Boundary this snapshot was taken at.
    pub stage: CheckpointStage,
    /// Nodes at this boundary.
    pub node_count: usize,
    /// Edges at this boundary.
    pub edge_count: usize,
    /// Edges carrying each field.
    pub edge_field_presence: BTreeMap<&'static str, usize>,
    /// Nodes carrying each optional field.
    pub node_field_presence: BTreeMap<&'static str, usize>,
    /// Up to one edge per category prefix.
    pub sample_edges: Vec<SampledEdge>,
    /// Only reported before normalisation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested_strength_detected: Option<bool>,
}

impl Checkpoint {
    /// Capture a checkpoint of `graph`.
    pub fn capture(stage: CheckpointStage, graph: &Graph) -> Self {
        let edge_checks: [(&'static str, fn(&Edge) -> bool); 6] = [
            ("id", |e| e.id.is_some()),
            ("strength_mean", |e| e.strength_mean.is_some()),
            ("strength_std", |e| e.strength_std.is_some()),
            ("belief_exists", |e| e.belief_exists.is_some()),
            ("effect_direction", |e| e.effect_direction.is_some()),
            ("provenance", |e| e.provenance.is_some()),
        ];
        let edge_fields = edge_checks
            .into_iter()
            .map(|(name, present)| (name, graph.edges.iter().filter(|e| present(e)).count()))
            .collect();

        let mut node_fields = BTreeMap::new();
        node_fields.insert("label", graph.nodes.iter().filter(|n| !n.label.is_empty()).count());
        node_fields.insert("data", graph.nodes.iter().filter(|n| n.data.is_some()).count());
        node_fields.insert(
            "goal_threshold",
            graph.nodes.iter().filter(|n| n.goal_threshold.is_some()).count(),
        );
        node_fields.insert(
            "goal_threshold_raw",
            graph.nodes.iter().filter(|n| n.goal_threshold_raw.is_some()).count(),
        );

        Self {
            stage,
            node_count: graph.nodes.len(),
            edge_count: graph.edges.len(),
            edge_field_presence: edge_fields,
            node_field_presence: node_fields,
            sample_edges: sample_edges(graph),
            nested_strength_detected: None,
        }
    }

    /// Record whether nested strength objects were seen.
    pub fn with_nested_strength(mut self, detected: bool) -> Self {
        self.nested_strength_detected = Some(detected);
        self
    }
}

/// Stratified edge sample: one edge per ID-prefix category, lowest ID first.
/// Falls back to the first three edges by `from::to` when no ID is prefixed.
pub fn sample_edges(graph: &Graph) -> Vec<SampledEdge> {
    let mut stratified = Vec::new();
    for category in EdgeCategory::ALL {
        let pick = graph
            .edges
            .iter()
            .filter(|e| e.id.as_deref().and_then(EdgeCategory::from_id) == Some(category))
            .min_by(|a, b| a.id.cmp(&b.id));
        if let Some(edge) = pick {
            stratified.push(SampledEdge::from(edge));
        }
    }
    if !stratified.is_empty() {
        return stratified;
    }

    let mut edges: Vec<&Edge> = graph.edges.iter().collect();
    edges.sort_by_key(|e| e.pair_key());
    edges
        .into_iter()
        .take(FALLBACK_SAMPLE)
        .map(SampledEdge::from)
        .collect()
}

/// Collected checkpoints, after the size guard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckpointSet {
    /// In stage order.
    pub checkpoints: Vec<Checkpoint>,
    /// The size guard emptied every sample.
    pub samples_dropped: bool,
}

/// Collects checkpoints across a request.
#[derive(Debug, Clone)]
pub struct CheckpointRecorder {
    enabled: bool,
    byte_budget: usize,
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointRecorder {
    /// Create a recorder.
    pub fn new(enabled: bool, byte_budget: usize) -> Self {
        Self {
            enabled,
            byte_budget,
            checkpoints: Vec::new(),
        }
    }

    /// Capture and keep a checkpoint.
    pub fn record(&mut self, stage: CheckpointStage, graph: &Graph) {
        if self.enabled {
            self.checkpoints.push(Checkpoint::capture(stage, graph));
        }
    }

    /// Keep an already captured checkpoint.
    pub fn push(&mut self, checkpoint: Checkpoint) {
        if self.enabled {
            self.checkpoints.push(checkpoint);
        }
    }

    /// Checkpoints recorded so far.
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Apply the size guard and hand the set over.
    pub fn finish(self) -> CheckpointSet {
        let mut checkpoints = self.checkpoints;
        let samples_dropped = apply_size_guard(&mut checkpoints, self.byte_budget);
        CheckpointSet {
            checkpoints,
            samples_dropped,
        }
    }
}

/// Empty every `sample_edges` when the serialized set exceeds `byte_budget`.
/// Returns true when samples were dropped.
pub fn apply_size_guard(checkpoints: &mut [Checkpoint], byte_budget: usize) -> bool {
    let size = serde_json::to_vec(&checkpoints).map(|b| b.len()).unwrap_or(usize::MAX);
    if size <= byte_budget {
        return false;
    }
    warn!(
        bytes = size,
        budget = byte_budget,
        "Checkpoint set over budget, dropping edge samples"
    );
    for checkpoint in checkpoints.iter_mut() {
        checkpoint.sample_edges.clear();
    }
    true
}
