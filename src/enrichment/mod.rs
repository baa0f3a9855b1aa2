//! Enrichment collaborator contract.
//!
//! Enrichers add advisory content (bias findings, evidence and sensitivity
//! suggestions) and may propose extra edges. The orchestrator stamps every
//! proposed edge as synthetic enrichment output before merging it, and
//! treats enrichment failure as a warning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::{Edge, Graph};

/// What an enricher contributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentOutput {
    /// Cognitive bias findings.
    #[serde(default)]
    pub bias_findings: Vec<Value>,
    /// Suggested evidence to gather.
    #[serde(default)]
    pub evidence_suggestions: Vec<Value>,
    /// Suggested sensitivity checks.
    #[serde(default)]
    pub sensitivity_suggestions: Vec<Value>,
    /// Edges to merge into the graph.
    #[serde(default)]
    pub added_edges: Vec<Edge>,
}

/// Enrichment failure; never fatal to the request.
#[derive(Debug, thiserror::Error)]
#[error("Enrichment failed: {message}")]
pub struct EnrichmentError {
    /// What went wrong.
    pub message: String,
}

/// External enrichment collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Inspect the repaired graph and contribute advisory content.
    async fn enrich(&self, graph: &Graph, brief: &str) -> Result<EnrichmentOutput, EnrichmentError>;
}

/// Enricher that contributes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnricher;

#[async_trait]
impl Enricher for NoopEnricher {
    async fn enrich(&self, _graph: &Graph, _brief: &str) -> Result<EnrichmentOutput, EnrichmentError> {
        Ok(EnrichmentOutput::default())
    }
}
