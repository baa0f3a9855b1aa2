//! Deterministic repair engine.
//!
//! Applies idempotent, model-free transformations until the detectors
//! report no deterministically repairable (bucket B) violation or the pass
//! ceiling is reached:
//!
//! `pending → (detect → repair)* → stable | llm_repair_needed`
//!
//! Passes, in order: edge filtering and numeric clamping ([`edges`]), goal
//! inference ([`goal`]), orphan wiring ([`orphans`]), status-quo handling
//! ([`status_quo`]) and cap enforcement ([`caps`]). After the loop every
//! edge gets a deterministic ID and the edge list is sorted by ID.
//!
//! The engine never returns an error: the worst outcome is a graph with a
//! non-empty bucket C, which sets `llm_repair_needed`.

pub mod caps;
pub mod edges;
pub mod goal;
pub mod orphans;
pub mod status_quo;

pub use goal::{extract_goal_from_brief, GoalHints, GoalInference, GoalSource};
pub use status_quo::StatusQuoTrace;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

use crate::detect::{detect_all, from_validation, Bucket, DetectorConfig, Violation};
use crate::graph::{EdgeFilterMode, Graph};
use crate::validate::Validator;

/// Strength of structural synthetic edges.
pub const STRUCTURAL_MEAN: f64 = 1.0;
/// Std of structural synthetic edges.
pub const STRUCTURAL_STD: f64 = 0.01;
/// Existence belief of structural synthetic edges.
pub const STRUCTURAL_BELIEF: f64 = 1.0;

/// Code for one applied repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RepairCode {
    /// A goal node was synthesised.
    GoalInferred,
    /// An orphaned node was wired into the chain.
    OrphanWired,
    /// An option was linked from a decision.
    OptionLinked,
    /// A disconnected option was wired from a sibling's interventions.
    StatusQuoWired,
    /// A disallowed edge was removed.
    InvalidEdgeStripped,
    /// A disallowed edge was kept and flagged.
    InvalidEdgeFlagged,
    /// An edge referencing a missing node was removed.
    DanglingEdgeStripped,
    /// A factor was trimmed to honour the node cap.
    NodeCapEnforced,
    /// An edge was trimmed to honour the edge cap.
    EdgeCapEnforced,
    /// Deterministic edge IDs were assigned.
    EdgeIdsAssigned,
    /// Out-of-range numeric fields were clamped.
    EdgeNumericClamped,
    /// Missing numeric fields were restored from the stash.
    EdgeFieldsRestored,
}

impl RepairCode {
    /// Wire code.
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairCode::GoalInferred => "GOAL_INFERRED",
            RepairCode::OrphanWired => "ORPHAN_WIRED",
            RepairCode::OptionLinked => "OPTION_LINKED",
            RepairCode::StatusQuoWired => "STATUS_QUO_WIRED",
            RepairCode::InvalidEdgeStripped => "INVALID_EDGE_STRIPPED",
            RepairCode::InvalidEdgeFlagged => "INVALID_EDGE_FLAGGED",
            RepairCode::DanglingEdgeStripped => "DANGLING_EDGE_STRIPPED",
            RepairCode::NodeCapEnforced => "NODE_CAP_ENFORCED",
            RepairCode::EdgeCapEnforced => "EDGE_CAP_ENFORCED",
            RepairCode::EdgeIdsAssigned => "EDGE_IDS_ASSIGNED",
            RepairCode::EdgeNumericClamped => "EDGE_NUMERIC_CLAMPED",
            RepairCode::EdgeFieldsRestored => "EDGE_FIELDS_RESTORED",
        }
    }
}

impl std::fmt::Display for RepairCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for RepairCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One applied repair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairRecord {
    /// What was done.
    pub code: RepairCode,
    /// Node or edge it was done to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl RepairRecord {
    /// Create a record.
    pub fn new(code: RepairCode, subject: impl Into<String>) -> Self {
        Self {
            code,
            subject: Some(subject.into()),
        }
    }
}

/// Engine state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Not yet run.
    Pending,
    /// No deterministically repairable violations remain (bucket C is empty).
    Stable,
    /// Bucket C is non-empty after the deterministic passes.
    LlmRepairNeeded,
}

/// Violation counts per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    /// Informational.
    pub a: usize,
    /// Deterministically repairable.
    pub b: usize,
    /// Needs the model.
    pub c: usize,
}

impl BucketCounts {
    fn of(violations: &[Violation]) -> Self {
        let mut counts = Self::default();
        for v in violations {
            match v.bucket {
                Bucket::A => counts.a += 1,
                Bucket::B => counts.b += 1,
                Bucket::C => counts.c += 1,
            }
        }
        counts
    }
}

/// Trace of one deterministic sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepTrace {
    /// Sweep name (`deterministic`, `post_llm_repair`, ...).
    pub name: String,
    /// Detect/repair passes executed.
    pub passes: usize,
    /// Terminal state.
    pub state: EngineState,
    /// Repairs applied, in order.
    pub repairs: Vec<RepairRecord>,
    /// Violations found by the first detect pass.
    pub initial: BucketCounts,
    /// Violations left after the final pass.
    pub remaining: BucketCounts,
    /// The remaining violations themselves.
    pub violations: Vec<Violation>,
    /// Status-quo handling telemetry.
    pub status_quo: StatusQuoTrace,
    /// Goal inference, when a goal was synthesised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_inference: Option<GoalInference>,
    /// Wall time.
    pub duration_ms: u64,
}

impl SweepTrace {
    /// Whether the orchestrator should consider a model-assisted repair.
    pub fn llm_repair_needed(&self) -> bool {
        self.state == EngineState::LlmRepairNeeded
    }

    /// Bucket C violations left after the sweep.
    pub fn unresolved(&self) -> Vec<&Violation> {
        self.violations
            .iter()
            .filter(|v| v.bucket == Bucket::C)
            .collect()
    }

    /// Repair codes in application order.
    pub fn codes(&self) -> Vec<RepairCode> {
        self.repairs.iter().map(|r| r.code).collect()
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct RepairConfig {
    /// Caps and edge filter mode.
    pub detector: DetectorConfig,
    /// Maximum detect/repair passes.
    pub pass_ceiling: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            pass_ceiling: 3,
        }
    }
}

impl RepairConfig {
    /// Edge filter mode.
    pub fn filter_mode(&self) -> EdgeFilterMode {
        self.detector.filter_mode
    }
}

/// The deterministic repair engine.
pub struct RepairEngine<'a> {
    config: RepairConfig,
    validator: Option<&'a dyn Validator>,
}

impl<'a> RepairEngine<'a> {
    /// Create an engine that relies on the structural detectors only.
    pub fn new(config: RepairConfig) -> Self {
        Self {
            config,
            validator: None,
        }
    }

    /// Also classify the validator's findings each pass.
    pub fn with_validator(mut self, validator: &'a dyn Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Detect violations, including validator findings.
    pub fn detect(&self, graph: &Graph) -> Vec<Violation> {
        let mut violations = detect_all(graph, &self.config.detector);
        if let Some(validator) = self.validator {
            violations.extend(from_validation(&validator.validate(graph)));
        }
        violations
    }

    /// Run the sweep to a fixed point or the pass ceiling.
    pub fn sweep(&self, name: &str, graph: &mut Graph, hints: &GoalHints) -> SweepTrace {
        let start = Instant::now();
        let mut repairs = Vec::new();
        let mut status_quo = StatusQuoTrace::default();
        let mut goal_inference = None;
        let mut passes = 0;

        let initial = BucketCounts::of(&self.detect(graph));

        // The first pass always runs so status-quo telemetry is recorded even
        // when nothing is repairable.
        let ceiling = self.config.pass_ceiling.max(1);
        while passes < ceiling {
            passes += 1;

            let applied = self.apply_pass(graph, hints, &mut status_quo, &mut goal_inference);
            debug!(
                sweep = %name,
                pass = passes,
                repairs = applied.len(),
                "Deterministic repair pass"
            );
            let changed = !applied.is_empty();
            repairs.extend(applied);
            if !changed {
                break;
            }
            if !self.detect(graph).iter().any(|v| v.bucket == Bucket::B) {
                break;
            }
        }

        repairs.extend(canonicalise_edges(graph));
        let violations = self.detect(graph);
        let remaining = BucketCounts::of(&violations);
        let state = if remaining.c > 0 {
            EngineState::LlmRepairNeeded
        } else {
            EngineState::Stable
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            sweep = %name,
            passes,
            repairs = repairs.len(),
            remaining_b = remaining.b,
            remaining_c = remaining.c,
            duration_ms,
            "Deterministic sweep completed"
        );

        SweepTrace {
            name: name.to_string(),
            passes,
            state,
            repairs,
            initial,
            remaining,
            violations,
            status_quo,
            goal_inference,
            duration_ms,
        }
    }

    fn apply_pass(
        &self,
        graph: &mut Graph,
        hints: &GoalHints,
        status_quo: &mut StatusQuoTrace,
        goal_inference: &mut Option<GoalInference>,
    ) -> Vec<RepairRecord> {
        let mut applied = Vec::new();
        applied.extend(edges::filter_edges(graph, self.config.filter_mode()));
        applied.extend(edges::clamp_numeric_fields(graph));
        if let Some((inference, records)) = goal::infer_goal(graph, hints) {
            *goal_inference = Some(inference);
            applied.extend(records);
        }
        applied.extend(orphans::wire_orphans(graph));
        let (pass_trace, records) = status_quo::handle_status_quo(graph);
        status_quo.merge(&pass_trace);
        applied.extend(records);
        applied.extend(caps::enforce_caps(graph, &self.config.detector));
        applied
    }
}

/// Give every edge a unique deterministic ID and sort the edge list by ID.
///
/// Edges that already carry a unique ID keep it; missing or duplicate IDs
/// become `from::to::index` with the lowest free index.
pub fn canonicalise_edges(graph: &mut Graph) -> Vec<RepairRecord> {
    let mut records = Vec::new();
    let mut used: HashSet<String> = HashSet::new();
    let mut needs_id = Vec::new();

    for (i, edge) in graph.edges.iter().enumerate() {
        match &edge.id {
            Some(id) if !id.is_empty() && used.insert(id.clone()) => {}
            _ => needs_id.push(i),
        }
    }

    for i in needs_id {
        let edge = &mut graph.edges[i];
        let mut index = 0;
        let id = loop {
            let candidate = format!("{}::{}::{}", edge.from, edge.to, index);
            if !used.contains(&candidate) {
                break candidate;
            }
            index += 1;
        };
        used.insert(id.clone());
        records.push(RepairRecord::new(RepairCode::EdgeIdsAssigned, id.clone()));
        edge.id = Some(id);
    }

    graph
        .edges
        .sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.pair_key().cmp(&b.pair_key())));
    records
}

#[cfg(test)]
#[path = "repair_tests.rs"]
mod tests;
