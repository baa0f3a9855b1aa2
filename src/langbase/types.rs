use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::adapter;

/// Message in a Langbase conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Author of the message.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// Caller input.
    User,
    /// Model output.
    Assistant,
}

/// Request to run a Langbase pipe
#[derive(Debug, Clone, Serialize)]
pub struct PipeRequest {
    /// Pipe name (required by Langbase API)
    pub name: String,
    /// Conversation to send.
    pub messages: Vec<Message>,
    /// Always false; graph payloads are read in one piece
    #[serde(default)]
    pub stream: bool,
    /// Overrides the model configured on the pipe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Prompt template variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, String>>,
}

/// Response from a Langbase pipe
#[derive(Debug, Clone, Deserialize)]
pub struct PipeResponse {
    /// Whether the run succeeded.
    pub success: bool,
    /// Raw completion text.
    pub completion: String,
    /// Langbase thread, if one was created.
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    /// Provider response details.
    pub raw: Option<RawResponse>,
}

/// Raw model response details
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    /// Model that served the call.
    pub model: Option<String>,
    /// Token usage.
    pub usage: Option<Usage>,
}

/// Token usage as Langbase reports it
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub prompt_tokens: Option<u32>,
    /// Completion tokens.
    pub completion_tokens: Option<u32>,
    /// Sum of both.
    pub total_tokens: Option<u32>,
}

impl From<&Usage> for adapter::Usage {
    fn from(usage: &Usage) -> Self {
        adapter::Usage {
            input_tokens: usage.prompt_tokens.unwrap_or(0) as u64,
            output_tokens: usage.completion_tokens.unwrap_or(0) as u64,
        }
    }
}

impl PipeResponse {
    /// Token usage mapped onto the adapter contract; zero when absent.
    pub fn usage(&self) -> adapter::Usage {
        self.raw
            .as_ref()
            .and_then(|raw| raw.usage.as_ref())
            .map(adapter::Usage::from)
            .unwrap_or_default()
    }
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

impl PipeRequest {
    /// Create a new pipe request with name and messages
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
            stream: false,
            model: None,
            variables: None,
        }
    }

    /// Run the pipe against a specific model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Add a single variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Parsed completion of the draft pipe.
///
/// The pipe is asked for `{graph, rationales, confidence, clarifying_questions}`
/// but some models answer with the bare graph; [`GraphCompletion::from_value`]
/// accepts both.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GraphCompletion {
    /// Graph object as drafted.
    pub graph: Value,
    /// Per-edge rationales.
    #[serde(default)]
    pub rationales: Vec<Value>,
    /// Model confidence, when given.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Questions for the caller.
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
}

impl GraphCompletion {
    /// Interpret a parsed completion, treating a top-level `nodes` or `edges`
    /// as the bare graph.
    pub fn from_value(value: Value) -> Self {
        let bare = value
            .as_object()
            .map(|o| !o.contains_key("graph") && (o.contains_key("nodes") || o.contains_key("edges")))
            .unwrap_or(false);
        if bare {
            return Self {
                graph: value,
                ..Default::default()
            };
        }
        match serde_json::from_value::<GraphCompletion>(value.clone()) {
            Ok(parsed) => parsed,
            // Wrong field types: hand the whole payload on and let the
            // draft stage's shape assertion reject it.
            Err(_) => Self {
                graph: value.get("graph").cloned().unwrap_or(value),
                ..Default::default()
            },
        }
    }
}

/// Upper bound on completion tokens for both graph pipes.
pub const GRAPH_PIPE_MAX_TOKENS: u32 = 4000;

/// Pipe definition sent to `POST /v1/pipes`.
///
/// Graph pipes are private, upserted on every start and run in JSON output
/// mode with a single system prompt.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePipeRequest {
    /// Pipe name.
    pub name: String,
    /// Pipe description.
    pub description: String,
    /// Visibility.
    pub status: PipeStatus,
    pub model: String,
    /// Update the pipe if it exists.
    pub upsert: bool,
    /// Force JSON output.
    pub json: bool,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token limit.
    pub max_tokens: u32,
    /// System prompt messages.
    pub messages: Vec<Message>,
}

/// Pipe visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeStatus {
    /// Listed publicly.
    Public,
    /// Visible to the owner only.
    Private,
}

/// Response from creating a pipe
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePipeResponse {
    /// Pipe name.
    pub name: String,
    /// Pipe description.
    pub description: Option<String>,
    /// Visibility as reported.
    pub status: String,
    /// Pipe URL.
    pub url: String,
}

impl CreatePipeRequest {
    /// Private JSON-mode pipe driven by `system_prompt`.
    pub fn graph_pipe(
        name: impl Into<String>,
        model: impl Into<String>,
        system_prompt: &str,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            status: PipeStatus::Private,
            model: model.into(),
            upsert: true,
            json: true,
            temperature: 0.2,
            max_tokens: GRAPH_PIPE_MAX_TOKENS,
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Set the pipe description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Repair runs deterministically at 0.0.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
