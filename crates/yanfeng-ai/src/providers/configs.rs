use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{BridgeError, BridgeResult};

pub const MODELSCOPE_HOST: &str = "https://api-inference.modelscope.cn";

pub const SUPPORTED_CHAT_MODELS: &[&str] = &[
    "Qwen/Qwen2.5-72B-Instruct",
    "Qwen/Qwen3-32B",
    "Qwen/Qwen3-VL-235B-A22B-Instruct",
];

pub const SUPPORTED_IMAGE_MODELS: &[&str] = &["Qwen/Qwen-Image", "Qwen/Qwen-Image-Edit"];

/// Image models that edit an input image rather than generating from text only
pub const IMAGE_EDITING_MODELS: &[&str] = &["Qwen/Qwen-Image-Edit"];

// Pure text models handle function calling best, VL models only partially
pub const RECOMMENDED_CHAT_MODEL: &str = "Qwen/Qwen2.5-72B-Instruct";
pub const RECOMMENDED_IMAGE_MODEL: &str = "Qwen/Qwen-Image";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const TASK_POLL_INTERVAL_SECS: u64 = 2;
pub const TASK_MAX_WAIT_SECS: u64 = 300;
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Models in the thinking family need `enable_thinking: false` on non-streaming calls
pub fn is_thinking_model(model: &str) -> bool {
    model.contains("Qwen3") || model.contains("QwQ")
}

pub fn is_image_editing_model(model: &str) -> bool {
    IMAGE_EDITING_MODELS.contains(&model)
}

/// Connection settings for the ModelScope API-Inference endpoints
#[derive(Debug, Clone)]
pub struct ModelScopeConfig {
    pub host: String,
    pub api_key: String,
    /// Total timeout of every HTTP request
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl ModelScopeConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: MODELSCOPE_HOST.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(TASK_POLL_INTERVAL_SECS),
            max_wait: Duration::from_secs(TASK_MAX_WAIT_SECS),
        }
    }

    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self
    }

    /// Join an API path onto the configured host
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 2048,
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> BridgeResult<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(BridgeError::InvalidParameter(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(BridgeError::InvalidParameter(format!(
                "top_p must be between 0 and 1, got {}",
                self.top_p
            )));
        }
        if !(1..=8192).contains(&self.max_tokens) {
            return Err(BridgeError::InvalidParameter(format!(
                "max_tokens must be between 1 and 8192, got {}",
                self.max_tokens
            )));
        }
        Ok(())
    }
}

/// Options shared by the conversation agent and the AI task.
///
/// Both compose this struct instead of reading host options on their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySettings {
    pub chat_model: String,
    pub image_model: String,
    /// System prompt; `None` uses the bundled default prompt
    pub prompt: Option<String>,
    #[serde(flatten)]
    pub params: GenerationParams,
    pub max_tool_iterations: usize,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            chat_model: RECOMMENDED_CHAT_MODEL.to_string(),
            image_model: RECOMMENDED_IMAGE_MODEL.to_string(),
            prompt: None,
            params: GenerationParams::default(),
            max_tool_iterations: MAX_TOOL_ITERATIONS,
        }
    }
}

impl EntitySettings {
    pub fn validate(&self) -> BridgeResult<()> {
        if self.chat_model.trim().is_empty() {
            return Err(BridgeError::Config("chat model must not be empty".into()));
        }
        if self.image_model.trim().is_empty() {
            return Err(BridgeError::Config("image model must not be empty".into()));
        }
        if self.max_tool_iterations == 0 {
            return Err(BridgeError::Config(
                "max_tool_iterations must be at least 1".into(),
            ));
        }
        self.params.validate()
    }

    /// Configured models missing from the supported catalog.
    ///
    /// Custom model ids are allowed, so these are only worth a warning.
    pub fn uncatalogued_models(&self) -> Vec<&str> {
        let mut models = Vec::new();
        if !SUPPORTED_CHAT_MODELS.contains(&self.chat_model.as_str()) {
            models.push(self.chat_model.as_str());
        }
        if !SUPPORTED_IMAGE_MODELS.contains(&self.image_model.as_str()) {
            models.push(self.image_model.as_str());
        }
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thinking_models() {
        assert!(is_thinking_model("Qwen/Qwen3-32B"));
        assert!(is_thinking_model("Qwen/QwQ-32B"));
        assert!(!is_thinking_model("Qwen/Qwen2.5-72B-Instruct"));
    }

    #[test]
    fn test_endpoint_joins_slashes() {
        let config = ModelScopeConfig::new("key").with_host("https://example.com/");
        assert_eq!(
            config.endpoint("/v1/chat/completions"),
            "https://example.com/v1/chat/completions"
        );
        assert_eq!(config.endpoint("v1/files"), "https://example.com/v1/files");
    }

    #[test]
    fn test_generation_params_bounds() {
        assert!(GenerationParams::default().validate().is_ok());

        let hot = GenerationParams {
            temperature: 2.5,
            ..Default::default()
        };
        assert!(matches!(
            hot.validate(),
            Err(BridgeError::InvalidParameter(_))
        ));

        let no_tokens = GenerationParams {
            max_tokens: 0,
            ..Default::default()
        };
        assert!(no_tokens.validate().is_err());

        let edge = GenerationParams {
            temperature: 2.0,
            top_p: 1.0,
            max_tokens: 8192,
        };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_entity_settings_defaults() {
        let settings = EntitySettings::default();
        assert_eq!(settings.chat_model, RECOMMENDED_CHAT_MODEL);
        assert_eq!(settings.image_model, RECOMMENDED_IMAGE_MODEL);
        assert_eq!(settings.max_tool_iterations, 10);
        assert!(settings.validate().is_ok());
        assert!(is_image_editing_model("Qwen/Qwen-Image-Edit"));
        assert!(!is_image_editing_model(&settings.image_model));
    }

    #[test]
    fn test_uncatalogued_models() {
        let settings = EntitySettings::default();
        assert!(settings.uncatalogued_models().is_empty());

        let custom = EntitySettings {
            chat_model: "deepseek-ai/DeepSeek-V3".into(),
            image_model: "Qwen/Qwen-Image-Edit".into(),
            ..Default::default()
        };
        assert_eq!(custom.uncatalogued_models(), vec!["deepseek-ai/DeepSeek-V3"]);
        assert!(custom.validate().is_ok());
    }
}
