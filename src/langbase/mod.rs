//! Langbase Pipes adapter.
//!
//! [`LangbaseClient`] implements [`LlmAdapter`](crate::adapter::LlmAdapter)
//! over `/v1/pipes/run`; [`LangbaseFactory`] plugs it into the
//! [`AdapterRegistry`](crate::adapter::AdapterRegistry).

mod client;
mod types;

pub use client::{LangbaseClient, LangbaseFactory, PROVIDER};
pub use types::*;

use serde_json::Value;

use crate::error::{AdapterError, AdapterResult};

/// Extract the JSON text from a completion, handling markdown code fences.
///
/// Order: raw JSON, then a fenced ```` ```json ```` block, then any fenced block.
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "found ```json block but it was empty".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "found ``` block but it was empty".to_string());
    }

    Err(format!(
        "no JSON in completion, starts with '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// Parse a completion into JSON, mapping failures to `UpstreamNonJson`.
pub(crate) fn parse_completion(completion: &str) -> AdapterResult<Value> {
    let text = extract_json_from_completion(completion)
        .map_err(|message| AdapterError::UpstreamNonJson { message })?;
    serde_json::from_str(text).map_err(|e| AdapterError::UpstreamNonJson {
        message: format!("completion is not valid JSON: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_raw_json() {
        assert_eq!(extract_json_from_completion("  {\"a\":1} ").unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here you go:\n```json\n{\"nodes\": []}\n```\nDone.";
        assert_eq!(extract_json_from_completion(text).unwrap(), "{\"nodes\": []}");
        let text = "```\n{\"edges\": []}\n```";
        assert_eq!(extract_json_from_completion(text).unwrap(), "{\"edges\": []}");
    }

    #[test]
    fn test_extract_rejects_prose() {
        assert!(extract_json_from_completion("I cannot help with that").is_err());
        assert!(extract_json_from_completion("```json\n```").is_err());
    }

    #[test]
    fn test_parse_completion_maps_to_non_json() {
        assert_eq!(parse_completion("```json\n{\"a\": 2}\n```").unwrap(), json!({"a": 2}));
        assert!(matches!(
            parse_completion("{not json"),
            Err(AdapterError::UpstreamNonJson { .. })
        ));
        assert!(matches!(
            parse_completion("<html>502</html>"),
            Err(AdapterError::UpstreamNonJson { .. })
        ));
    }
}
