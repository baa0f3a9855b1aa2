//! # CEE Draft Pipeline
//!
//! Drafts probabilistic causal decision graphs from a free-text brief by
//! calling an LLM through Langbase Pipes, then repairs, validates and
//! finalizes them deterministically.
//!
//! ## Stages
//!
//! - **Draft**: model call with retry, edge strength normalisation, field stash
//! - **Repair**: bucketed violation detection and a fixed-point repair sweep,
//!   with optional model-assisted repair sized to the remaining budget
//! - **Threshold sweep**: strips fabricated goal thresholds
//! - **Enrichment**: injected collaborator, merged under the caps
//! - **Validation**: stash restoration, optional strict mode
//! - **Finalize**: acceptance gate, quality score, truncated lists
//!
//! ## Architecture
//!
//! ```text
//! stdin (JSON lines) → DraftServer → Pipeline → LlmAdapter → Langbase Pipes (HTTP)
//!                                        ↓
//!                            repair / validate / finalize
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cee_draft_pipeline::{Config, DraftRequest, Pipeline};
//! use cee_draft_pipeline::adapter::AdapterRegistry;
//! use cee_draft_pipeline::langbase::LangbaseFactory;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let factory = Arc::new(LangbaseFactory::new(
//!         config.langbase.clone(),
//!         config.request.clone(),
//!         config.pipes.clone(),
//!     ));
//!     let registry = Arc::new(AdapterRegistry::with_capacity(factory, 16, Duration::from_secs(600)));
//!     let pipeline = Pipeline::from_config(&config, registry);
//!     let response = pipeline
//!         .run(DraftRequest::new("Should we raise prices?"), CancellationToken::new())
//!         .await;
//!     println!("{}", response.body);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// LLM adapter contract, retry policy, model selection and registry.
pub mod adapter;
/// Bounded TTL/LRU caches.
pub mod cache;
/// Stage checkpoints and provenance.
pub mod checkpoint;
/// Configuration management.
pub mod config;
/// Structural violation detectors.
pub mod detect;
/// Draft stage.
pub mod draft;
/// Enrichment collaborator contract.
pub mod enrichment;
/// Error types and result aliases.
pub mod error;
/// Decision graph model.
pub mod graph;
/// Langbase API client and the Langbase adapter.
pub mod langbase;
/// Pipeline orchestrator, context and budget.
pub mod pipeline;
/// System prompts for Langbase pipes.
pub mod prompts;
/// Deterministic repair engine.
pub mod repair;
/// Response finalizer and quality score.
pub mod response;
/// Stdio front end.
pub mod server;
/// Goal threshold sweep.
pub mod threshold;
/// Graph validation.
pub mod validate;

pub use config::Config;
pub use error::{AdapterError, AppError, AppResult, PipelineError, PipelineResult};
pub use pipeline::{DraftRequest, Pipeline, PipelineTrace};
pub use response::FinalResponse;
