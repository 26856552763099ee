//! Structured output extraction from model replies

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::ReasoningError;

const FENCE_PATTERN: &str = r"(?s)```(?:json|JSON)?\s*(.*?)\s*```";

/// Parse the JSON value in a model reply
///
/// Accepts bare JSON, JSON inside a markdown code fence, or JSON surrounded
/// by prose (the outermost object or array is taken).
pub fn extract_json(text: &str) -> Result<Value, ReasoningError> {
    debug!(len = text.len(), "extract_json: called");
    let fence = Regex::new(FENCE_PATTERN).map_err(|e| ReasoningError::Malformed(e.to_string()))?;
    let body = fence
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim();

    if let Ok(value) = serde_json::from_str(body) {
        return Ok(value);
    }

    // Whichever bracket opens first is the outermost value
    if let Some(start) = body.find(['{', '['])
        && let Some(end) = body.rfind(if body[start..].starts_with('{') { '}' } else { ']' })
        && start < end
        && let Ok(value) = serde_json::from_str(&body[start..=end])
    {
        debug!("extract_json: recovered JSON from surrounding text");
        return Ok(value);
    }

    let preview: String = body.chars().take(120).collect();
    Err(ReasoningError::Malformed(format!("no JSON found in reply: {}", preview)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_json() {
        assert_eq!(extract_json(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n{\"intent\": \"INTERESTED\"}\n```\nThanks";
        assert_eq!(extract_json(text).unwrap(), json!({"intent": "INTERESTED"}));
    }

    #[test]
    fn test_json_in_prose() {
        let text = "Sure! [{\"lead_score\": 80}] hope that helps";
        assert_eq!(extract_json(text).unwrap(), json!([{"lead_score": 80}]));
    }

    #[test]
    fn test_no_json() {
        let err = extract_json("I cannot help with that").unwrap_err();
        assert!(matches!(err, ReasoningError::Malformed(_)));
    }
}
