use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{ChatRequest, ProviderResponse};
use crate::errors::BridgeResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(alias = "prompt_tokens")]
    pub input_tokens: Option<i32>,
    #[serde(alias = "completion_tokens")]
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Add another response's usage to this running total
    pub fn accumulate(&mut self, other: &Usage) {
        fn add(a: Option<i32>, b: Option<i32>) -> Option<i32> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a + b),
                (a, b) => a.or(b),
            }
        }
        self.input_tokens = add(self.input_tokens, other.input_tokens);
        self.output_tokens = add(self.output_tokens, other.output_tokens);
        self.total_tokens = add(self.total_tokens, other.total_tokens);
    }
}

/// Chat completion transport used by the orchestration loop
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send one chat completion request and return the normalized response
    async fn generate_text(&self, request: &ChatRequest) -> BridgeResult<ProviderResponse>;
}
