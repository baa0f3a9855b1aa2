//! Integration tests for the Langbase adapter
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use cee_draft_pipeline::adapter::{CallOptions, DraftInput, LlmAdapter, RepairInput, TimeoutPhase};
use cee_draft_pipeline::config::{LangbaseConfig, PipeConfig, RequestConfig};
use cee_draft_pipeline::error::{AdapterError, PipelineError};
use cee_draft_pipeline::graph::Graph;
use cee_draft_pipeline::langbase::LangbaseClient;

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str) -> LangbaseClient {
    let config = LangbaseConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
    };
    let request_config = RequestConfig { timeout_ms: 5000 };

    LangbaseClient::new(&config, &request_config, PipeConfig::default())
        .expect("Failed to create client")
        .with_model("openai:gpt-4o")
}

fn opts(timeout: Duration) -> CallOptions {
    CallOptions::new("req-test", timeout, CancellationToken::new())
}

fn completion_body(completion: &str) -> serde_json::Value {
    json!({
        "success": true,
        "completion": completion,
        "threadId": "thread-123",
        "raw": {
            "model": "gpt-4o",
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 80,
                "total_tokens": 200
            }
        }
    })
}

#[cfg(test)]
mod draft_call_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_draft_call() {
        let mock_server = MockServer::start().await;
        let completion = json!({
            "graph": {
                "nodes": [{"id": "goal_1", "kind": "goal", "label": "Grow"}],
                "edges": []
            },
            "confidence": 0.8,
            "clarifying_questions": ["Which market?"]
        })
        .to_string();

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("Content-Type", "application/json"))
            .and(body_partial_json(json!({"name": "cee-draft-graph-v1", "model": "openai:gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&completion)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let input = DraftInput {
            brief: "Should we expand?".to_string(),
            ..Default::default()
        };
        let response = client
            .draft_graph(&input, &opts(Duration::from_secs(5)))
            .await
            .expect("draft should succeed");

        assert_eq!(response.graph["nodes"][0]["id"], "goal_1");
        assert_eq!(response.confidence, Some(0.8));
        assert_eq!(response.clarifying_questions, vec!["Which market?".to_string()]);
        assert_eq!(response.usage.input_tokens, 120);
        assert_eq!(response.usage.output_tokens, 80);
    }

    #[tokio::test]
    async fn test_fenced_completion_is_extracted() {
        let mock_server = MockServer::start().await;
        let completion = "Here you go:\n```json\n{\"nodes\": [], \"edges\": []}\n```";

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(completion)))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let response = client
            .draft_graph(&DraftInput::default(), &opts(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(response.graph, json!({"nodes": [], "edges": []}));
    }

    #[tokio::test]
    async fn test_repair_call_uses_repair_pipe() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({"name": "cee-repair-graph-v1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body(r#"{"graph": {"nodes": [], "edges": []}}"#)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let input = RepairInput {
            brief: "brief".to_string(),
            graph: Graph::default(),
            violations: Vec::new(),
        };
        let response = client
            .repair_graph(&input, &opts(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(response.graph, json!({"nodes": [], "edges": []}));
    }
}

#[cfg(test)]
mod error_mapping_tests {
    use super::*;

    #[tokio::test]
    async fn test_server_error_maps_to_upstream_http() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .draft_graph(&DraftInput::default(), &opts(Duration::from_secs(5)))
            .await
            .unwrap_err();

        match &err {
            AdapterError::UpstreamHttp { status, .. } => assert_eq!(*status, 500),
            other => panic!("unexpected error: {:?}", other),
        }
        let mapped: PipelineError = err.into();
        assert_eq!(mapped.code().http_status(), 502);
    }

    #[tokio::test]
    async fn test_html_body_maps_to_non_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>Bad Gateway</body></html>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .draft_graph(&DraftInput::default(), &opts(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UpstreamNonJson { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_prose_completion_maps_to_non_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("I cannot draft a graph for this brief.")),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .draft_graph(&DraftInput::default(), &opts(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UpstreamNonJson { .. }));
    }

    #[tokio::test]
    async fn test_slow_response_maps_to_body_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("{}"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .draft_graph(&DraftInput::default(), &opts(Duration::from_millis(50)))
            .await
            .unwrap_err();

        match err {
            AdapterError::UpstreamTimeout { phase, elapsed_ms } => {
                assert_eq!(phase, TimeoutPhase::Body);
                assert!(elapsed_ms >= 40);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_flight_maps_to_pre_aborted() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("{}"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let cancel = CancellationToken::new();
        let call_opts = CallOptions::new("req-test", Duration::from_secs(5), cancel.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = client
            .draft_graph(&DraftInput::default(), &call_opts)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(
            err,
            AdapterError::UpstreamTimeout {
                phase: TimeoutPhase::PreAborted,
                ..
            }
        ));
    }
}

#[cfg(test)]
mod pipe_management_tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_pipes_creates_both() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "cee-draft-graph-v1",
                "description": "Drafts causal decision graphs from a brief",
                "status": "private",
                "url": "https://langbase.com/test/cee-draft-graph-v1"
            })))
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client.ensure_pipes("openai:gpt-4o", "openai:gpt-4o-mini").await;
        assert!(result.is_ok(), "ensure_pipes failed: {:?}", result.err());
    }

    #[tokio::test]
    async fn test_ensure_pipes_treats_conflict_as_existing() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": {"message": "Pipe already exists"}
            })))
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert!(client.ensure_pipes("openai:gpt-4o", "openai:gpt-4o-mini").await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_pipes_propagates_auth_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .ensure_pipes("openai:gpt-4o", "openai:gpt-4o-mini")
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UpstreamHttp { status: 401, .. }));
    }
}
