use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Adapter failure.
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Pipeline failure.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// When an upstream timeout fired relative to the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPhase {
    /// The caller was already gone before the request was sent.
    PreAborted,
    /// The request was sent and the response did not arrive in time.
    Body,
}

impl TimeoutPhase {
    /// Get the phase name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutPhase::PreAborted => "pre_aborted",
            TimeoutPhase::Body => "body",
        }
    }
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// LLM adapter errors
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The call did not complete in time.
    #[error("Upstream timeout ({phase}) after {elapsed_ms}ms")]
    UpstreamTimeout { phase: TimeoutPhase, elapsed_ms: u64 },

    /// Non-success HTTP status.
    #[error("Upstream HTTP error: {status} - {message}")]
    UpstreamHttp { status: u16, message: String },

    /// Body was not valid JSON.
    #[error("Upstream returned non-JSON output: {message}")]
    UpstreamNonJson { message: String },

    /// Connection or transport failure.
    #[error("Transport error: {message}")]
    Transport { message: String },
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::UpstreamTimeout {
                phase: TimeoutPhase::Body,
                elapsed_ms: 0,
            }
        } else if err.is_decode() {
            AdapterError::UpstreamNonJson {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            AdapterError::UpstreamHttp {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            AdapterError::Transport {
                message: err.to_string(),
            }
        }
    }
}

/// Which kind of upstream failure a [`PipelineError::Upstream`] wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    /// Non-2xx HTTP status.
    Http,
    /// Response body was not usable JSON.
    NonJson,
    /// Connection-level failure.
    Transport,
}

/// Pipeline errors, one variant per taxonomy entry
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Draft failed structural checks.
    #[error("Graph invalid ({reason}): {message}")]
    StructuralInvalid {
        reason: String,
        message: String,
        missing_kinds: Vec<String>,
    },

    /// Draft timed out after all attempts.
    #[error("Upstream timed out after {attempts} attempt(s): {message}")]
    Timeout { attempts: u32, message: String },

    /// Upstream provider error.
    #[error("Upstream failure: {message}")]
    Upstream {
        kind: UpstreamKind,
        status: Option<u16>,
        message: String,
    },

    /// Request budget spent before the draft call.
    #[error("Request budget exceeded before {stage}: {elapsed_ms}ms of {budget_ms}ms")]
    BudgetExceeded {
        stage: String,
        elapsed_ms: u64,
        budget_ms: u64,
    },

    /// Caller went away.
    #[error("Client disconnected before {stage}")]
    ClientDisconnected { stage: String },

    /// Final graph failed validation.
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String, codes: Vec<String> },

    /// Provider rate limit.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<AdapterError> for PipelineError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::UpstreamTimeout {
                phase: TimeoutPhase::PreAborted,
                ..
            } => PipelineError::ClientDisconnected {
                stage: "adapter".to_string(),
            },
            AdapterError::UpstreamTimeout { elapsed_ms, .. } => PipelineError::Timeout {
                attempts: 1,
                message: format!("upstream did not respond within {}ms", elapsed_ms),
            },
            AdapterError::UpstreamHttp { status, message } => PipelineError::Upstream {
                kind: UpstreamKind::Http,
                status: Some(status),
                message,
            },
            AdapterError::UpstreamNonJson { message } => PipelineError::Upstream {
                kind: UpstreamKind::NonJson,
                status: None,
                message,
            },
            AdapterError::Transport { message } => PipelineError::Upstream {
                kind: UpstreamKind::Transport,
                status: None,
                message,
            },
        }
    }
}

impl PipelineError {
    /// Caller-facing error code.
    pub fn code(&self) -> CeeErrorCode {
        match self {
            PipelineError::StructuralInvalid { .. } => CeeErrorCode::GraphInvalid,
            PipelineError::Timeout { .. } => CeeErrorCode::Timeout,
            PipelineError::Upstream { .. } => CeeErrorCode::LlmUpstreamError,
            PipelineError::BudgetExceeded { .. } => CeeErrorCode::BudgetExceeded,
            PipelineError::ClientDisconnected { .. } => CeeErrorCode::ClientDisconnected,
            PipelineError::ValidationFailed { .. } => CeeErrorCode::ValidationFailed,
            PipelineError::RateLimited { .. } => CeeErrorCode::RateLimit,
            PipelineError::Internal { .. } => CeeErrorCode::InternalError,
        }
    }

    /// Structured details for the error envelope.
    pub fn details(&self) -> Option<Value> {
        match self {
            PipelineError::StructuralInvalid {
                reason,
                missing_kinds,
                ..
            } => {
                let mut details = json!({ "reason": reason });
                if !missing_kinds.is_empty() {
                    details["missing_kinds"] = json!(missing_kinds);
                }
                Some(details)
            }
            PipelineError::Timeout { attempts, .. } => Some(json!({ "attempts": attempts })),
            PipelineError::Upstream { kind, status, .. } => Some(json!({
                "upstream_kind": kind,
                "upstream_status": status,
            })),
            PipelineError::BudgetExceeded {
                stage,
                elapsed_ms,
                budget_ms,
            } => Some(json!({
                "stage": stage,
                "elapsed_ms": elapsed_ms,
                "budget_ms": budget_ms,
            })),
            PipelineError::ClientDisconnected { stage } => Some(json!({ "stage": stage })),
            PipelineError::ValidationFailed { codes, .. } => Some(json!({ "codes": codes })),
            PipelineError::RateLimited { retry_after_secs } => {
                Some(json!({ "retry_after_seconds": retry_after_secs }))
            }
            PipelineError::Internal { .. } => None,
        }
    }
}

/// Closed set of caller-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CeeErrorCode {
    /// `CEE_GRAPH_INVALID`, 400.
    GraphInvalid,
    /// `CEE_VALIDATION_FAILED`, 400.
    ValidationFailed,
    /// `CEE_TIMEOUT`, 504.
    Timeout,
    /// `CEE_LLM_UPSTREAM_ERROR`, 502.
    LlmUpstreamError,
    /// `CEE_BUDGET_EXCEEDED`, 504.
    BudgetExceeded,
    /// `CEE_CLIENT_DISCONNECTED`, 499.
    ClientDisconnected,
    /// `CEE_RATE_LIMIT`, 429.
    RateLimit,
    /// `CEE_INTERNAL_ERROR`, 500.
    InternalError,
}

impl CeeErrorCode {
    /// Wire code.
    pub fn as_str(&self) -> &'static str {
        match self {
            CeeErrorCode::GraphInvalid => "CEE_GRAPH_INVALID",
            CeeErrorCode::ValidationFailed => "CEE_VALIDATION_FAILED",
            CeeErrorCode::Timeout => "CEE_TIMEOUT",
            CeeErrorCode::LlmUpstreamError => "CEE_LLM_UPSTREAM_ERROR",
            CeeErrorCode::BudgetExceeded => "CEE_BUDGET_EXCEEDED",
            CeeErrorCode::ClientDisconnected => "CEE_CLIENT_DISCONNECTED",
            CeeErrorCode::RateLimit => "CEE_RATE_LIMIT",
            CeeErrorCode::InternalError => "CEE_INTERNAL_ERROR",
        }
    }

    /// HTTP status the code maps to. Upstream failures are always 5xx.
    pub fn http_status(&self) -> u16 {
        match self {
            CeeErrorCode::GraphInvalid | CeeErrorCode::ValidationFailed => 400,
            CeeErrorCode::Timeout | CeeErrorCode::BudgetExceeded => 504,
            CeeErrorCode::LlmUpstreamError => 502,
            CeeErrorCode::ClientDisconnected => 499,
            CeeErrorCode::RateLimit => 429,
            CeeErrorCode::InternalError => 500,
        }
    }

    /// Whether a caller may retry the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CeeErrorCode::Timeout
                | CeeErrorCode::LlmUpstreamError
                | CeeErrorCode::BudgetExceeded
                | CeeErrorCode::RateLimit
        )
    }
}

impl std::fmt::Display for CeeErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for CeeErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
