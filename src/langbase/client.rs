use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::types::{CreatePipeRequest, CreatePipeResponse, GraphCompletion, Message, PipeRequest, PipeResponse};
use super::parse_completion;
use crate::adapter::{
    AdapterFactory, CallOptions, DraftInput, DraftResponse, LlmAdapter, RepairInput,
    RepairResponse, TimeoutPhase,
};
use crate::config::{LangbaseConfig, PipeConfig, RequestConfig};
use crate::error::{AdapterError, AdapterResult, AppError, AppResult};
use crate::prompts::{DRAFT_GRAPH_PROMPT, PROMPT_VERSION, REPAIR_GRAPH_PROMPT};

/// Provider name this adapter registers under.
pub const PROVIDER: &str = "langbase";

/// Langbase Pipes client implementing the adapter contract.
///
/// Makes exactly one HTTP call per adapter operation; retries belong to the
/// draft stage so attempts never overlap.
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    pipes: PipeConfig,
    model: String,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(
        config: &LangbaseConfig,
        request_config: &RequestConfig,
        pipes: PipeConfig,
    ) -> AdapterResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            pipes,
            model: String::new(),
        })
    }

    /// Run pipes against a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn pipe_request(&self, pipe: &str, content: String) -> PipeRequest {
        let request = PipeRequest::new(pipe, vec![Message::user(content)])
            .with_variable("prompt_version", PROMPT_VERSION);
        if self.model.is_empty() {
            request
        } else {
            request.with_model(&self.model)
        }
    }

    /// Run a pipe once under the call's timeout and cancellation token.
    async fn run_pipe(&self, request: &PipeRequest, opts: &CallOptions) -> AdapterResult<PipeResponse> {
        if opts.cancel.is_cancelled() {
            return Err(AdapterError::UpstreamTimeout {
                phase: TimeoutPhase::PreAborted,
                elapsed_ms: 0,
            });
        }

        let url = format!("{}/v1/pipes/run", self.base_url);
        let start = Instant::now();

        let result = tokio::select! {
            _ = opts.cancel.cancelled() => Err(AdapterError::UpstreamTimeout {
                phase: TimeoutPhase::PreAborted,
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
            outcome = tokio::time::timeout(opts.timeout, self.execute_request(&url, request)) => {
                match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(AdapterError::UpstreamTimeout {
                        phase: TimeoutPhase::Body,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    }),
                }
            }
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(response) => {
                info!(
                    request_id = %opts.request_id,
                    pipe = %request.name,
                    model = %self.model,
                    latency_ms,
                    "Langbase pipe call succeeded"
                );
                Ok(response)
            }
            Err(AdapterError::UpstreamTimeout { phase, elapsed_ms: 0 }) => {
                error!(request_id = %opts.request_id, pipe = %request.name, %phase, latency_ms, "Langbase pipe call timed out");
                Err(AdapterError::UpstreamTimeout {
                    phase,
                    elapsed_ms: latency_ms,
                })
            }
            Err(e) => {
                error!(
                    request_id = %opts.request_id,
                    pipe = %request.name,
                    error = %e,
                    latency_ms,
                    "Langbase pipe call failed"
                );
                Err(e)
            }
        }
    }

    /// Execute a single request (internal)
    async fn execute_request(&self, url: &str, request: &PipeRequest) -> AdapterResult<PipeResponse> {
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(AdapterError::UpstreamHttp {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let body = response.text().await?;
        let pipe_response: PipeResponse =
            serde_json::from_str(&body).map_err(|e| AdapterError::UpstreamNonJson {
                message: format!("Failed to parse pipe response: {}", e),
            })?;

        if !pipe_response.success {
            return Err(AdapterError::UpstreamNonJson {
                message: "pipe reported success=false".to_string(),
            });
        }

        Ok(pipe_response)
    }

    /// Create a new pipe
    pub async fn create_pipe(&self, request: CreatePipeRequest) -> AdapterResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(AdapterError::UpstreamHttp {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: CreatePipeResponse =
            response
                .json()
                .await
                .map_err(|e| AdapterError::UpstreamNonJson {
                    message: format!("Failed to parse create pipe response: {}", e),
                })?;

        info!(
            pipe = %pipe_response.name,
            url = %pipe_response.url,
            "Pipe created successfully"
        );

        Ok(pipe_response)
    }

    /// Ensure the draft and repair pipes exist, creating them if needed
    pub async fn ensure_pipes(&self, draft_model: &str, repair_model: &str) -> AdapterResult<()> {
        let draft = CreatePipeRequest::graph_pipe(&self.pipes.draft, draft_model, DRAFT_GRAPH_PROMPT)
            .with_description("Drafts causal decision graphs from a brief");
        let repair = CreatePipeRequest::graph_pipe(&self.pipes.repair, repair_model, REPAIR_GRAPH_PROMPT)
            .with_description("Repairs structural violations in decision graphs")
            .with_temperature(0.0);

        for request in [draft, repair] {
            let name = request.name.clone();
            match self.create_pipe(request).await {
                Ok(_) => info!(pipe = %name, "Pipe ready"),
                Err(AdapterError::UpstreamHttp { status: 409, .. }) => {
                    info!(pipe = %name, "Pipe already exists");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LlmAdapter for LangbaseClient {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn draft_graph(&self, input: &DraftInput, opts: &CallOptions) -> AdapterResult<DraftResponse> {
        let content = json!({
            "brief": input.brief,
            "prior_graph": input.prior_graph,
            "include_rationales": input.flags.include_rationales,
            "strict_schema": input.flags.strict_schema,
        })
        .to_string();
        let request = self
            .pipe_request(&self.pipes.draft, content)
            .with_variable("clarifier_rounds", input.clarifier_rounds.to_string());

        let response = self.run_pipe(&request, opts).await?;
        let completion = GraphCompletion::from_value(parse_completion(&response.completion)?);

        Ok(DraftResponse {
            graph: completion.graph,
            rationales: completion.rationales,
            usage: response.usage(),
            confidence: completion.confidence,
            clarifying_questions: completion.clarifying_questions,
        })
    }

    async fn repair_graph(&self, input: &RepairInput, opts: &CallOptions) -> AdapterResult<RepairResponse> {
        let content = json!({
            "brief": input.brief,
            "graph": input.graph,
            "violations": input.violations,
        })
        .to_string();
        let request = self.pipe_request(&self.pipes.repair, content);

        let response = self.run_pipe(&request, opts).await?;
        let completion = GraphCompletion::from_value(parse_completion(&response.completion)?);

        Ok(RepairResponse {
            graph: completion.graph,
            usage: response.usage(),
        })
    }
}

/// Builds [`LangbaseClient`]s for the adapter registry.
#[derive(Clone)]
pub struct LangbaseFactory {
    langbase: LangbaseConfig,
    request: RequestConfig,
    pipes: PipeConfig,
}

impl LangbaseFactory {
    /// Create a factory from the connection settings.
    pub fn new(langbase: LangbaseConfig, request: RequestConfig, pipes: PipeConfig) -> Self {
        Self {
            langbase,
            request,
            pipes,
        }
    }
}

impl AdapterFactory for LangbaseFactory {
    fn create(&self, provider: &str, model: &str) -> AppResult<Arc<dyn LlmAdapter>> {
        if provider != PROVIDER {
            return Err(AppError::Config {
                message: format!("Unsupported LLM provider: {}", provider),
            });
        }
        let client = LangbaseClient::new(&self.langbase, &self.request, self.pipes.clone())?
            .with_model(model);
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn config() -> LangbaseConfig {
        LangbaseConfig {
            api_key: "test_key".to_string(),
            base_url: "https://api.langbase.com/".to_string(),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = LangbaseClient::new(&config(), &RequestConfig::default(), PipeConfig::default())
            .unwrap()
            .with_model("openai:gpt-4o");
        assert_eq!(client.base_url(), "https://api.langbase.com");
        assert_eq!(client.provider(), "langbase");
        assert_eq!(client.model(), "openai:gpt-4o");
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let factory = LangbaseFactory::new(config(), RequestConfig::default(), PipeConfig::default());
        assert!(factory.create("langbase", "openai:gpt-4o").is_ok());
        assert!(matches!(
            factory.create("other", "m"),
            Err(AppError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_call_is_pre_aborted() {
        let client =
            LangbaseClient::new(&config(), &RequestConfig::default(), PipeConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let opts = CallOptions::new("req-1", Duration::from_secs(5), cancel);
        let err = client
            .draft_graph(&DraftInput::default(), &opts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::UpstreamTimeout {
                phase: TimeoutPhase::PreAborted,
                ..
            }
        ));
    }
}
