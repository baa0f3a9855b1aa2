//! Request-wide wall-clock budget.
//!
//! Before the draft call `elapsed ≥ budget` is fatal. Later stages degrade
//! instead: enrichment is skipped once the budget is spent, and on entry to
//! the repair stage:
//!
//! ```text
//! remaining         = budget - elapsed - headroom
//! effective_timeout = min(max_repair_timeout, remaining - safety_margin)
//! skip              = effective_timeout ≤ 0
//! ```

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};

/// Outcome of the repair timeout formula. Values are signed so a blown
/// budget shows up as a negative remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepairTimeout {
    /// Budget left after elapsed time and headroom.
    pub remaining_ms: i64,
    /// Timeout for the repair call after the safety margin.
    pub effective_timeout_ms: i64,
    /// `effective_timeout_ms <= 0`.
    pub skip_due_to_budget: bool,
}

impl RepairTimeout {
    /// Effective timeout as a duration; zero when skipped.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.effective_timeout_ms.max(0) as u64)
    }
}

/// The repair timeout formula.
pub fn compute_repair_timeout(
    elapsed_ms: i64,
    budget_ms: i64,
    headroom_ms: i64,
    safety_margin_ms: i64,
    max_repair_timeout_ms: i64,
) -> RepairTimeout {
    let remaining_ms = budget_ms - elapsed_ms - headroom_ms;
    let effective_timeout_ms = max_repair_timeout_ms.min(remaining_ms - safety_margin_ms);
    RepairTimeout {
        remaining_ms,
        effective_timeout_ms,
        skip_due_to_budget: effective_timeout_ms <= 0,
    }
}

/// Wall-clock budget started when the request arrived.
#[derive(Debug, Clone, Copy)]
pub struct RequestBudget {
    started: Instant,
    budget: Duration,
}

impl RequestBudget {
    /// Start a budget now.
    pub fn start(budget: Duration) -> Self {
        Self::starting_at(Instant::now(), budget)
    }

    /// Budget that started at `started`.
    pub fn starting_at(started: Instant, budget: Duration) -> Self {
        Self { started, budget }
    }

    /// Total budget in milliseconds.
    pub fn budget_ms(&self) -> u64 {
        self.budget.as_millis() as u64
    }

    /// Time since the request arrived.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Unspent budget, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    /// Fail with `BudgetExceeded` when the budget is spent.
    pub fn ensure_within(&self, stage: &str) -> PipelineResult<()> {
        let elapsed_ms = self.elapsed_ms();
        if elapsed_ms >= self.budget_ms() {
            warn!(stage = %stage, elapsed_ms, budget_ms = self.budget_ms(), "Request budget exceeded");
            return Err(PipelineError::BudgetExceeded {
                stage: stage.to_string(),
                elapsed_ms,
                budget_ms: self.budget_ms(),
            });
        }
        Ok(())
    }

    /// Apply the repair timeout formula at the current instant.
    pub fn repair_timeout(&self, config: &PipelineConfig) -> RepairTimeout {
        compute_repair_timeout(
            self.elapsed_ms() as i64,
            self.budget_ms() as i64,
            config.repair_headroom_ms as i64,
            config.repair_safety_margin_ms as i64,
            config.max_repair_timeout_ms as i64,
        )
    }
}
