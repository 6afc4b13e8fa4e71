use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

use super::base::Provider;
use super::types::{ChatRequest, ProviderResponse};
use crate::errors::BridgeResult;

/// A mock provider that replays scripted responses and records every request
pub struct MockProvider {
    responses: Mutex<VecDeque<BridgeResult<ProviderResponse>>>,
    repeat: Option<ProviderResponse>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<BridgeResult<ProviderResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers every request with the same response
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

pub fn response_from(body: Value) -> ProviderResponse {
    serde_json::from_value(body).unwrap()
}

pub fn text_response(text: &str) -> ProviderResponse {
    response_from(json!({
        "choices": [{"finish_reason": "stop", "message": {"role": "assistant", "content": text}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
}

/// A response asking for the given `(id, name, arguments)` tool calls
pub fn tool_call_response(calls: &[(&str, &str, Value)]) -> ProviderResponse {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(id, name, arguments)| {
            json!({"id": id, "type": "function", "function": {"name": name, "arguments": arguments}})
        })
        .collect();
    response_from(json!({
        "choices": [{
            "finish_reason": "tool_calls",
            "message": {"role": "assistant", "content": null, "tool_calls": tool_calls}
        }],
        "usage": {"prompt_tokens": 20, "completion_tokens": 8, "total_tokens": 28}
    }))
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate_text(&self, request: &ChatRequest) -> BridgeResult<ProviderResponse> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(response) = &self.repeat {
            return Ok(response.clone());
        }

        // Return an empty reply once the script runs out
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(text_response("")))
    }
}
