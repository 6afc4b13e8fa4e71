use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

use super::base::Usage;
use super::configs::GenerationParams;
use crate::errors::{BridgeError, BridgeResult};
use crate::models::tool::{ToolArguments, ToolCallRequest};

pub const FINISH_REASON_TOOL_CALLS: &str = "tool_calls";

/// Body of `POST /v1/chat/completions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,
    #[serde(skip)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new<S: Into<String>>(model: S, messages: Vec<Value>, params: &GenerationParams) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            tools: None,
            tool_choice: None,
            enable_thinking: None,
            stream: false,
        }
    }

    /// Attach tools; an empty list leaves the request without function calling
    pub fn with_tools(mut self, tools: Vec<Value>, tool_choice: &str) -> Self {
        if !tools.is_empty() {
            self.tools = Some(tools);
            self.tool_choice = Some(tool_choice.to_string());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub function: WireFunction,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

impl ResponseMessage {
    /// Convert the wire tool calls, assigning positional ids where the provider left them out
    pub fn tool_call_requests(&self) -> Vec<ToolCallRequest> {
        self.tool_calls
            .iter()
            .flatten()
            .enumerate()
            .map(|(index, call)| {
                let id = call
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| positional_call_id(index));
                ToolCallRequest {
                    id,
                    tool_name: call.function.name.clone(),
                    arguments: ToolArguments::from(call.function.arguments.clone()),
                }
            })
            .collect()
    }

    /// Content with surrounding whitespace removed, if any is left
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

pub fn positional_call_id(index: usize) -> String {
    format!("call_{}", index + 1)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub message: ResponseMessage,
}

impl Choice {
    pub fn wants_tool_calls(&self) -> bool {
        self.finish_reason.as_deref() == Some(FINISH_REASON_TOOL_CALLS)
    }
}

/// A chat completion normalized to the choices/message shape
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Lifecycle of an asynchronous image task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Processing,
    Succeed,
    Failed,
}

impl TaskStatus {
    pub fn parse(status: &str) -> BridgeResult<Self> {
        TaskStatus::from_str(status).map_err(|_| BridgeError::UnknownStatus(status.to_string()))
    }
}

/// Local view of a submitted image task
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub output_images: Vec<String>,
    pub error: Option<String>,
}

impl ImageTask {
    pub fn submitted<S: Into<String>>(task_id: S) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            output_images: Vec::new(),
            error: None,
        }
    }

    /// Record a polled status. Status never moves backwards; a stale report
    /// is ignored and `false` is returned.
    pub fn advance(&mut self, status: TaskStatus) -> bool {
        if status < self.status {
            return false;
        }
        self.status = status;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub url: String,
}

/// Generated images in the OpenAI `{data: [{url}]}` shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub data: Vec<ImageData>,
}

impl ImageResult {
    pub fn from_urls(urls: Vec<String>) -> Self {
        Self {
            data: urls.into_iter().map(|url| ImageData { url }).collect(),
        }
    }

    pub fn first_url(&self) -> Option<&str> {
        self.data.first().map(|d| d.url.as_str())
    }
}

/// Parameters of an image generation or edit job
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    /// Public URL of the image to edit, preferred over `image_path`
    pub image_url: Option<String>,
    /// Local image to upload and edit when no URL is given
    pub image_path: Option<PathBuf>,
    pub image_mime_type: Option<String>,
    pub size: Option<String>,
    pub n: Option<u32>,
}

impl ImageRequest {
    pub fn new<M: Into<String>, P: Into<String>>(model: M, prompt: P) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_image_url<S: Into<String>>(mut self, url: S) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_image_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.image_path = Some(path.into());
        self
    }
}
