//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use cee_draft_pipeline::adapter::{
    AdapterFactory, AdapterRegistry, CallOptions, DraftInput, DraftResponse, LlmAdapter,
    RepairInput, RepairResponse, TimeoutPhase,
};
use cee_draft_pipeline::config::PipelineConfig;
use cee_draft_pipeline::error::{AdapterError, AdapterResult, AppResult};
use cee_draft_pipeline::adapter::RetryPolicy;

/// Adapter that replays scripted results in order.
#[derive(Default)]
pub struct ScriptedAdapter {
    drafts: Mutex<VecDeque<AdapterResult<DraftResponse>>>,
    repairs: Mutex<VecDeque<AdapterResult<RepairResponse>>>,
    draft_delay: Option<Duration>,
    pub draft_calls: AtomicUsize,
    pub repair_calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_draft(self, result: AdapterResult<DraftResponse>) -> Self {
        self.drafts.lock().unwrap().push_back(result);
        self
    }

    pub fn with_repair(self, result: AdapterResult<RepairResponse>) -> Self {
        self.repairs.lock().unwrap().push_back(result);
        self
    }

    /// Sleep before answering each draft call.
    pub fn with_draft_delay(mut self, delay: Duration) -> Self {
        self.draft_delay = Some(delay);
        self
    }

    pub fn draft_calls(&self) -> usize {
        self.draft_calls.load(Ordering::SeqCst)
    }

    pub fn repair_calls(&self) -> usize {
        self.repair_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmAdapter for ScriptedAdapter {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn draft_graph(&self, _input: &DraftInput, _opts: &CallOptions) -> AdapterResult<DraftResponse> {
        self.draft_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.draft_delay {
            tokio::time::sleep(delay).await;
        }
        self.drafts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected draft call"))
    }

    async fn repair_graph(&self, _input: &RepairInput, _opts: &CallOptions) -> AdapterResult<RepairResponse> {
        self.repair_calls.fetch_add(1, Ordering::SeqCst);
        self.repairs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected repair call"))
    }
}

/// Factory handing out one shared adapter for every model.
pub struct SharedFactory(pub Arc<ScriptedAdapter>);

impl AdapterFactory for SharedFactory {
    fn create(&self, _provider: &str, _model: &str) -> AppResult<Arc<dyn LlmAdapter>> {
        Ok(self.0.clone())
    }
}

pub fn registry(adapter: Arc<ScriptedAdapter>) -> Arc<AdapterRegistry> {
    Arc::new(AdapterRegistry::with_capacity(
        Arc::new(SharedFactory(adapter)),
        8,
        Duration::from_secs(60),
    ))
}

/// Pipeline config with millisecond backoff.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy {
            base_ms: 1,
            factor: 1.0,
            max_ms: 1,
            jitter_pct: 0,
        },
        ..Default::default()
    }
}

pub fn body_timeout() -> AdapterError {
    AdapterError::UpstreamTimeout {
        phase: TimeoutPhase::Body,
        elapsed_ms: 30_000,
    }
}

pub fn pre_aborted() -> AdapterError {
    AdapterError::UpstreamTimeout {
        phase: TimeoutPhase::PreAborted,
        elapsed_ms: 0,
    }
}

pub fn draft(graph: Value) -> AdapterResult<DraftResponse> {
    Ok(DraftResponse {
        graph,
        confidence: Some(0.92),
        ..Default::default()
    })
}

/// Pricing decision where `opt_hold` has no outgoing edges and its sibling
/// intervenes on `fac_price`.
pub fn pricing_graph() -> Value {
    json!({
        "nodes": [
            {"id": "goal_1", "kind": "goal", "label": "Grow revenue"},
            {"id": "dec_1", "kind": "decision", "label": "Pricing"},
            {"id": "opt_raise", "kind": "option", "label": "Raise prices",
             "data": {"interventions": {"fac_price": 1.1}}},
            {"id": "opt_hold", "kind": "option", "label": "Hold prices"},
            {"id": "fac_price", "kind": "factor", "label": "Price"},
            {"id": "out_rev", "kind": "outcome", "label": "Revenue"}
        ],
        "edges": [
            {"id": "struct_1", "from": "dec_1", "to": "opt_raise"},
            {"id": "struct_2", "from": "dec_1", "to": "opt_hold"},
            {"id": "struct_3", "from": "opt_raise", "to": "fac_price"},
            {"id": "causal_1", "from": "fac_price", "to": "out_rev",
             "strength": {"mean": 0.6, "std": 0.1}, "belief_exists": 0.8},
            {"id": "bridge_1", "from": "out_rev", "to": "goal_1", "strength_mean": 0.9}
        ]
    })
}

/// Same decision without any intervention template for `opt_hold`.
pub fn droppable_graph() -> Value {
    let mut graph = pricing_graph();
    graph["nodes"][2]
        .as_object_mut()
        .unwrap()
        .remove("data");
    graph
}

/// Graph whose goal loops back into the decision.
pub fn cyclic_graph() -> Value {
    let mut graph = pricing_graph();
    graph["edges"]
        .as_array_mut()
        .unwrap()
        .push(json!({"id": "loop_1", "from": "goal_1", "to": "dec_1"}));
    graph
}
