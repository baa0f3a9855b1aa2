//! Line-delimited JSON server over stdio.
//!
//! Each input line is one [`DraftRequest`]; each output line is the
//! matching [`FinalResponse`] as `{"status_code": .., "body": ..}`.
//! Requests run one at a time. Ctrl-C cancels the request in flight, which
//! the pipeline reports as a client disconnect.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::pipeline::{DraftRequest, Pipeline};
use crate::response::{error_response, FinalResponse};

/// Stdio front end for the draft pipeline.
pub struct DraftServer {
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
}

impl DraftServer {
    /// Create a server around a pipeline.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that cancels the request in flight and stops the loop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Handle one input line.
    pub async fn handle_line(&self, line: &str) -> FinalResponse {
        match serde_json::from_str::<DraftRequest>(line) {
            Ok(request) => {
                self.pipeline
                    .run(request, self.shutdown.child_token())
                    .await
            }
            Err(e) => {
                error!(error = %e, "Failed to parse request");
                let err = PipelineError::StructuralInvalid {
                    reason: "invalid_request".to_string(),
                    message: format!("Parse error: {}", e),
                    missing_kinds: Vec::new(),
                };
                error_response(&err, "")
            }
        }
    }

    /// Serve stdin until EOF or shutdown.
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Draft pipeline ready, waiting for requests on stdin...");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = tokio::select! {
                read = reader.read_line(&mut line) => read?,
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
            };

            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = self.handle_line(trimmed).await;
            let response_json = serde_json::to_string(&response)?;
            debug!(status_code = response.status_code, "Sending response");

            stdout.write_all(response_json.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        Ok(())
    }
}
