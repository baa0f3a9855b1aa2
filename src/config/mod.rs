use serde::Serialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::adapter::RetryPolicy;
use crate::detect::DetectorConfig;
use crate::error::AppError;
use crate::graph::EdgeFilterMode;
use crate::repair::RepairConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Langbase API settings.
    pub langbase: LangbaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// HTTP request settings.
    pub request: RequestConfig,
    /// Pipe names.
    pub pipes: PipeConfig,
    /// Pipeline limits and toggles.
    pub pipeline: PipelineConfig,
    /// Model selection.
    pub models: ModelConfig,
    /// Prompt overrides.
    pub prompts: PromptConfig,
    /// Response list caps.
    pub limits: ResponseLimits,
    /// Cache sizing.
    pub cache: CacheConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    /// Langbase API key.
    pub api_key: String,
    /// Langbase API base URL.
    pub base_url: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default tracing filter directive.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable output.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// HTTP client timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Pipe that drafts graphs.
    pub draft: String,
    /// Pipe that repairs graphs.
    pub repair: String,
}

/// Budget, retry and repair tunables for the draft pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Wall-clock budget for one request.
    pub request_budget_ms: u64,
    /// Time reserved after model-assisted repair for post-processing.
    pub repair_headroom_ms: u64,
    /// Subtracted from the remaining budget before sizing the repair timeout.
    pub repair_safety_margin_ms: u64,
    /// Upper bound on the model-assisted repair timeout.
    pub max_repair_timeout_ms: u64,
    /// Per-attempt draft timeout.
    pub draft_timeout_ms: u64,
    /// Draft attempts on body timeouts (first call included).
    pub draft_max_attempts: u32,
    /// Retry policy for the draft call.
    pub retry: RetryPolicy,
    /// Confidence at or above which the draft counts as confident.
    pub confidence_threshold: f64,
    /// Clarifier rounds after which questions stop.
    pub max_clarifier_rounds: u32,
    /// Maximum deterministic repair passes, at least 1.
    pub repair_pass_ceiling: usize,
    /// Serialized size limit for checkpoints.
    pub checkpoint_byte_budget: usize,
    /// Record stage checkpoints.
    pub checkpoints_enabled: bool,
    /// Node cap.
    pub max_nodes: usize,
    /// Edge cap.
    pub max_edges: usize,
    /// Edge filter mode for the threshold sweep.
    pub edge_filter_mode: EdgeFilterMode,
    /// Allow the model-backed repair call.
    pub llm_repair_enabled: bool,
    /// Treat validator errors left after repair as fatal.
    pub strict_validation: bool,
}

/// Model selection inputs
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Provider name reported in traces.
    pub provider: String,
    /// Default model for drafting.
    pub default_draft_model: String,
    /// Default model for repair.
    pub default_repair_model: String,
    /// `CEE_DRAFT_MODEL`
    pub draft_model: Option<String>,
    /// `CEE_REPAIR_MODEL`
    pub repair_model: Option<String>,
    /// `LLM_MODEL`, honoured only when tiered selection is off.
    pub legacy_model: Option<String>,
    /// Resolve models per task.
    pub tiered: bool,
    /// Models a per-request override may name.
    pub allowed_models: Vec<String>,
    /// Used when nothing else resolves.
    pub fallback_model: String,
}

/// Prompt source configuration
#[derive(Debug, Clone, Default)]
pub struct PromptConfig {
    /// `CEE_PROMPT_VERSION` override.
    pub version_override: Option<String>,
    /// Remote prompt store, if one is configured.
    pub store_url: Option<String>,
}

/// Independent maxima for the lists carried in a success response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResponseLimits {
    /// Cap on `bias_findings`.
    pub bias_findings_max: usize,
    /// Cap on option nodes listed.
    pub options_max: usize,
    /// Cap on `evidence_suggestions`.
    pub evidence_suggestions_max: usize,
    /// Cap on `sensitivity_suggestions`.
    pub sensitivity_suggestions_max: usize,
}

/// Injected cache sizing
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Adapter response cache entries.
    pub adapter_capacity: usize,
    /// Adapter response cache TTL.
    pub adapter_ttl_secs: u64,
    /// Validation cache entries.
    pub validation_capacity: usize,
    /// Validation cache TTL.
    pub validation_ttl_secs: u64,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 30000),
        };

        let pipes = PipeConfig {
            draft: env::var("PIPE_DRAFT").unwrap_or_else(|_| "cee-draft-graph-v1".to_string()),
            repair: env::var("PIPE_REPAIR").unwrap_or_else(|_| "cee-repair-graph-v1".to_string()),
        };

        Ok(Config {
            langbase,
            logging,
            request,
            pipes,
            pipeline: PipelineConfig::from_env(),
            models: ModelConfig::from_env(),
            prompts: PromptConfig::from_env(),
            limits: ResponseLimits::from_env(),
            cache: CacheConfig::from_env(),
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 30000 }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            draft: "cee-draft-graph-v1".to_string(),
            repair: "cee-repair-graph-v1".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_budget_ms: 90_000,
            repair_headroom_ms: 10_000,
            repair_safety_margin_ms: 2_000,
            max_repair_timeout_ms: 20_000,
            draft_timeout_ms: 30_000,
            draft_max_attempts: 2,
            retry: RetryPolicy::default(),
            confidence_threshold: 0.90,
            max_clarifier_rounds: 3,
            repair_pass_ceiling: 3,
            checkpoint_byte_budget: 3072,
            checkpoints_enabled: true,
            max_nodes: 50,
            max_edges: 200,
            edge_filter_mode: EdgeFilterMode::Strict,
            llm_repair_enabled: true,
            strict_validation: false,
        }
    }
}

impl PipelineConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            request_budget_ms: parse_env("CEE_REQUEST_BUDGET_MS", d.request_budget_ms),
            repair_headroom_ms: parse_env("CEE_REPAIR_HEADROOM_MS", d.repair_headroom_ms),
            repair_safety_margin_ms: parse_env(
                "CEE_REPAIR_SAFETY_MARGIN_MS",
                d.repair_safety_margin_ms,
            ),
            max_repair_timeout_ms: parse_env("CEE_MAX_REPAIR_TIMEOUT_MS", d.max_repair_timeout_ms),
            draft_timeout_ms: parse_env("CEE_DRAFT_TIMEOUT_MS", d.draft_timeout_ms),
            draft_max_attempts: parse_env("CEE_DRAFT_MAX_ATTEMPTS", d.draft_max_attempts).max(1),
            retry: RetryPolicy {
                base_ms: parse_env("CEE_RETRY_BASE_MS", d.retry.base_ms),
                factor: parse_env("CEE_RETRY_FACTOR", d.retry.factor),
                max_ms: parse_env("CEE_RETRY_MAX_MS", d.retry.max_ms),
                jitter_pct: parse_env("CEE_RETRY_JITTER_PCT", d.retry.jitter_pct),
            },
            confidence_threshold: parse_env("CEE_CONFIDENCE_THRESHOLD", d.confidence_threshold),
            max_clarifier_rounds: parse_env("CEE_MAX_CLARIFIER_ROUNDS", d.max_clarifier_rounds),
            repair_pass_ceiling: parse_env("CEE_REPAIR_PASS_CEILING", d.repair_pass_ceiling).max(1),
            checkpoint_byte_budget: parse_env(
                "CEE_CHECKPOINT_BYTE_BUDGET",
                d.checkpoint_byte_budget,
            ),
            checkpoints_enabled: parse_env("CEE_CHECKPOINTS_ENABLED", d.checkpoints_enabled),
            max_nodes: parse_env("CEE_MAX_NODES", d.max_nodes),
            max_edges: parse_env("CEE_MAX_EDGES", d.max_edges),
            edge_filter_mode: parse_env("CEE_EDGE_FILTER_MODE", d.edge_filter_mode),
            llm_repair_enabled: parse_env("CEE_LLM_REPAIR_ENABLED", d.llm_repair_enabled),
            strict_validation: parse_env("CEE_STRICT_VALIDATION", d.strict_validation),
        }
    }

    /// Limits handed to the detectors.
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            max_nodes: self.max_nodes,
            max_edges: self.max_edges,
            filter_mode: self.edge_filter_mode,
        }
    }

    /// Settings for the deterministic repair engine.
    pub fn repair_config(&self) -> RepairConfig {
        RepairConfig {
            detector: self.detector_config(),
            pass_ceiling: self.repair_pass_ceiling,
        }
    }

    /// Draft call timeout as a `Duration`.
    pub fn draft_timeout(&self) -> Duration {
        Duration::from_millis(self.draft_timeout_ms)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "langbase".to_string(),
            default_draft_model: "openai:gpt-4o".to_string(),
            default_repair_model: "openai:gpt-4o-mini".to_string(),
            draft_model: None,
            repair_model: None,
            legacy_model: None,
            tiered: true,
            allowed_models: vec![
                "openai:gpt-4o".to_string(),
                "openai:gpt-4o-mini".to_string(),
                "anthropic:claude-3-5-sonnet-latest".to_string(),
            ],
            fallback_model: "openai:gpt-4o-mini".to_string(),
        }
    }
}

impl ModelConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        let allowed_models = optional_env("CEE_MODEL_ALLOWLIST")
            .map(|list| {
                list.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or(d.allowed_models);
        Self {
            provider: optional_env("LLM_PROVIDER").unwrap_or(d.provider),
            default_draft_model: d.default_draft_model,
            default_repair_model: d.default_repair_model,
            draft_model: optional_env("CEE_DRAFT_MODEL"),
            repair_model: optional_env("CEE_REPAIR_MODEL"),
            legacy_model: optional_env("LLM_MODEL"),
            tiered: parse_env("CEE_TIERED_MODELS", d.tiered),
            allowed_models,
            fallback_model: optional_env("CEE_FALLBACK_MODEL").unwrap_or(d.fallback_model),
        }
    }
}

impl PromptConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            version_override: optional_env("CEE_PROMPT_VERSION"),
            store_url: optional_env("CEE_PROMPT_STORE_URL"),
        }
    }
}

impl Default for ResponseLimits {
    fn default() -> Self {
        Self {
            bias_findings_max: 10,
            options_max: 6,
            evidence_suggestions_max: 20,
            sensitivity_suggestions_max: 10,
        }
    }
}

impl ResponseLimits {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            bias_findings_max: parse_env("CEE_MAX_BIAS_FINDINGS", d.bias_findings_max),
            options_max: parse_env("CEE_MAX_OPTIONS", d.options_max),
            evidence_suggestions_max: parse_env(
                "CEE_MAX_EVIDENCE_SUGGESTIONS",
                d.evidence_suggestions_max,
            ),
            sensitivity_suggestions_max: parse_env(
                "CEE_MAX_SENSITIVITY_SUGGESTIONS",
                d.sensitivity_suggestions_max,
            ),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            adapter_capacity: 16,
            adapter_ttl_secs: 3600,
            validation_capacity: 256,
            validation_ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            adapter_capacity: parse_env("CEE_ADAPTER_CACHE_SIZE", d.adapter_capacity),
            adapter_ttl_secs: parse_env("CEE_ADAPTER_CACHE_TTL_SECS", d.adapter_ttl_secs),
            validation_capacity: parse_env("CEE_VALIDATION_CACHE_SIZE", d.validation_capacity),
            validation_ttl_secs: parse_env("CEE_VALIDATION_CACHE_TTL_SECS", d.validation_ttl_secs),
        }
    }
}
