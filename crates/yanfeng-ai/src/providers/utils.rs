use serde_json::{json, Value};

use super::types::ProviderResponse;
use crate::errors::{BridgeError, BridgeResult};

/// Bring a chat completion body into the choices/message shape.
///
/// Bodies that already carry `choices` pass through. The simplified
/// `{output: {text}}` shape is wrapped into a single assistant choice.
/// Anything else is rejected.
pub fn normalize_chat_response(body: Value) -> BridgeResult<ProviderResponse> {
    if body.get("choices").is_some() {
        return Ok(serde_json::from_value(body)?);
    }

    if let Some(text) = body
        .get("output")
        .and_then(|output| output.get("text"))
        .and_then(|text| text.as_str())
    {
        let wrapped = json!({
            "choices": [{
                "message": {
                    "content": text,
                    "role": "assistant"
                }
            }],
            "usage": body.get("usage").cloned().unwrap_or(Value::Null)
        });
        return Ok(serde_json::from_value(wrapped)?);
    }

    Err(BridgeError::InvalidResponseFormat(body.to_string()))
}

/// Find the hosted URL in a file upload response.
///
/// Checks `url`, then `file_url`, then `data.url`.
pub fn extract_upload_url(body: &Value) -> Option<String> {
    [&body["url"], &body["file_url"], &body["data"]["url"]]
        .into_iter()
        .find_map(|candidate| candidate.as_str())
        .map(str::to_string)
}

/// Keep log lines readable when a body embeds base64 images
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}... ({} chars)", head, text.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::Usage;

    #[test]
    fn test_normalize_passes_choices_through() -> anyhow::Result<()> {
        let response = normalize_chat_response(json!({
            "id": "chatcmpl-123",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi there", "tool_calls": null},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 15, "total_tokens": 27}
        }))?;

        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].message.text(), Some("Hi there"));
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage, Some(Usage::new(Some(12), Some(15), Some(27))));
        Ok(())
    }

    #[test]
    fn test_normalize_wraps_output_text() -> anyhow::Result<()> {
        let response = normalize_chat_response(json!({"output": {"text": "你好"}}))?;
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].message.text(), Some("你好"));
        assert_eq!(response.choices[0].message.role.as_deref(), Some("assistant"));
        assert!(response.usage.is_none());
        Ok(())
    }

    #[test]
    fn test_normalize_rejects_unknown_shape() {
        let result = normalize_chat_response(json!({"result": "nope"}));
        assert!(matches!(result, Err(BridgeError::InvalidResponseFormat(_))));

        let result = normalize_chat_response(json!({"output": {"text": 42}}));
        assert!(matches!(result, Err(BridgeError::InvalidResponseFormat(_))));
    }

    #[test]
    fn test_normalize_malformed_choices_is_decode_error() {
        let result = normalize_chat_response(json!({"choices": "not a list"}));
        assert!(matches!(result, Err(BridgeError::Decode(_))));
    }

    #[test]
    fn test_extract_upload_url_order() {
        assert_eq!(
            extract_upload_url(&json!({"url": "a", "file_url": "b"})),
            Some("a".to_string())
        );
        assert_eq!(
            extract_upload_url(&json!({"file_url": "b", "data": {"url": "c"}})),
            Some("b".to_string())
        );
        assert_eq!(
            extract_upload_url(&json!({"data": {"url": "c"}})),
            Some("c".to_string())
        );
        assert_eq!(extract_upload_url(&json!({"id": "file-1"})), None);
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("abcdefghij", 4), "abcd... (10 chars)");
    }
}
