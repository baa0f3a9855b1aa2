//! Goal threshold sweep.
//!
//! A numeric `goal_threshold` is only trusted when the brief text it was
//! read from (`goal_threshold_raw`) is present and actually contains a
//! number. Otherwise the model probably invented it, and it is stripped.

use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};

use crate::graph::{Graph, NodeKind};

/// Threshold stripped: no raw text recorded.
pub const STRIPPED_NO_RAW: &str = "GOAL_THRESHOLD_STRIPPED_NO_RAW";
/// Threshold stripped: raw text has no digits.
pub const STRIPPED_NO_DIGITS: &str = "GOAL_THRESHOLD_STRIPPED_NO_DIGITS";
/// Warning: the goal reads as qualitative, so the threshold was likely inferred.
pub const POSSIBLY_INFERRED: &str = "GOAL_THRESHOLD_POSSIBLY_INFERRED";

/// Summary of one threshold sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThresholdSweepTrace {
    /// False when the sweep short-circuited.
    pub ran: bool,
    /// Goals carrying a threshold that were inspected.
    pub goals_checked: usize,
    /// Thresholds removed.
    pub strips_applied: usize,
    /// Warnings emitted.
    pub warnings_emitted: usize,
    /// Codes, in emission order.
    pub codes: Vec<String>,
    /// Wall time.
    pub duration_ms: u64,
}

fn has_digits(raw: &Value) -> bool {
    match raw {
        Value::Number(_) => true,
        Value::String(s) => s.chars().any(|c| c.is_ascii_digit()),
        Value::Null => false,
        other => other.to_string().chars().any(|c| c.is_ascii_digit()),
    }
}

/// Strip unsupported goal thresholds in place.
///
/// `None` stands for a graph whose nodes could not be read; it and an empty
/// graph both produce a no-op trace with `ran = false`.
pub fn sweep_thresholds(graph: Option<&mut Graph>) -> ThresholdSweepTrace {
    let start = Instant::now();
    let graph = match graph {
        Some(g) if !g.is_empty() => g,
        _ => {
            debug!("Threshold sweep skipped: no nodes");
            return ThresholdSweepTrace::default();
        }
    };

    let mut trace = ThresholdSweepTrace {
        ran: true,
        ..Default::default()
    };

    for node in graph
        .nodes
        .iter_mut()
        .filter(|n| n.kind == NodeKind::Goal && n.goal_threshold.is_some())
    {
        trace.goals_checked += 1;
        let reason = match &node.goal_threshold_raw {
            None | Some(Value::Null) => Some(STRIPPED_NO_RAW),
            Some(raw) if !has_digits(raw) => Some(STRIPPED_NO_DIGITS),
            Some(_) => None,
        };
        let Some(reason) = reason else { continue };

        node.goal_threshold = None;
        node.goal_threshold_unit = None;
        trace.strips_applied += 1;
        trace.codes.push(reason.to_string());

        if reason == STRIPPED_NO_DIGITS && !node.label.chars().any(|c| c.is_ascii_digit()) {
            trace.warnings_emitted += 1;
            trace.codes.push(POSSIBLY_INFERRED.to_string());
        }
        debug!(goal = %node.id, code = reason, "Stripped goal threshold");
    }

    trace.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        goals_checked = trace.goals_checked,
        strips_applied = trace.strips_applied,
        warnings = trace.warnings_emitted,
        duration_ms = trace.duration_ms,
        "Threshold sweep completed"
    );
    trace
}
