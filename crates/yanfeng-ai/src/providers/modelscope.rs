use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::base::Provider;
use super::configs::{
    is_thinking_model, GenerationParams, ModelScopeConfig, RECOMMENDED_CHAT_MODEL,
};
use super::types::{
    ChatRequest, ImageRequest, ImageResult, ImageTask, ProviderResponse, TaskStatus,
};
use super::utils::{extract_upload_url, normalize_chat_response, truncate_for_log};
use crate::errors::{BridgeError, BridgeResult};
use crate::models::content::{guess_mime_type, OCTET_STREAM};

const ASYNC_MODE_HEADER: &str = "X-ModelScope-Async-Mode";
const TASK_TYPE_HEADER: &str = "X-ModelScope-Task-Type";
const LOG_BODY_CHARS: usize = 2000;

/// Client for the ModelScope API-Inference endpoints.
///
/// Holds no per-call state, so one instance can serve concurrent runs.
pub struct ModelScopeProvider {
    client: Client,
    config: ModelScopeConfig,
}

impl ModelScopeProvider {
    pub fn new(config: ModelScopeConfig) -> BridgeResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    /// Use an HTTP client owned by the host
    pub fn with_client(client: Client, config: ModelScopeConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ModelScopeConfig {
        &self.config
    }

    /// Check the status and decode the JSON body of a response
    async fn read_json(response: Response, context: &str) -> BridgeResult<Value> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!("{} error: {} - {}", context, status, truncate_for_log(&text, LOG_BODY_CHARS));
            return Err(BridgeError::Transport {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            error!("Failed to decode {} response: {}", context, e);
            BridgeError::Decode(e.to_string())
        })
    }

    async fn post_json(&self, path: &str, payload: &Value, async_mode: bool) -> BridgeResult<Value> {
        let url = self.config.endpoint(path);
        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(payload);
        if async_mode {
            request = request.header(ASYNC_MODE_HEADER, "true");
        }

        let response = request.send().await.map_err(|e| {
            error!("Network error calling {}: {}", url, e);
            BridgeError::from(e)
        })?;
        Self::read_json(response, path).await
    }

    /// Upload a local file and return the provider hosted URL
    pub async fn upload_file(&self, path: &Path, mime_type: Option<&str>) -> BridgeResult<String> {
        let mime_type = mime_type.unwrap_or_else(|| guess_mime_type(path));
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| BridgeError::Upload(format!("failed to read {}: {}", path.display(), e)))?;

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();
        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(mime_type)
            .map_err(|e| BridgeError::Upload(format!("invalid mime type {}: {}", mime_type, e)))?;
        let form = Form::new().part("file", part);

        debug!("Uploading file to ModelScope: {} (type: {})", path.display(), mime_type);

        let response = self
            .client
            .post(self.config.endpoint("v1/files"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?;
        let body = Self::read_json(response, "file upload").await?;
        debug!("File upload response: {}", body);

        extract_upload_url(&body).ok_or_else(|| {
            error!("No URL in upload response: {}", body);
            BridgeError::Upload("upload succeeded but no URL was returned".to_string())
        })
    }

    /// Generate or edit an image, blocking until the task finishes
    pub async fn generate_image(&self, request: &ImageRequest) -> BridgeResult<ImageResult> {
        let mut payload = json!({
            "model": request.model,
            "prompt": request.prompt,
        });

        if let Some(url) = &request.image_url {
            debug!("Using image_url for image editing: {}", url);
            payload["image_url"] = json!(url);
        } else if let Some(path) = &request.image_path {
            let mime_type = request
                .image_mime_type
                .as_deref()
                .unwrap_or_else(|| guess_mime_type(path));
            let mime_type = if mime_type == OCTET_STREAM {
                debug!("MIME type not detected for {}, using image/jpeg", path.display());
                "image/jpeg"
            } else {
                mime_type
            };

            let uploaded = self
                .upload_file(path, Some(mime_type))
                .await
                .map_err(|e| {
                    if matches!(e, BridgeError::Upload(_)) {
                        e
                    } else {
                        BridgeError::Upload(e.to_string())
                    }
                })?;
            debug!("Uploaded local image, using URL: {}", uploaded);
            payload["image_url"] = json!(uploaded);
        }

        if let Some(size) = &request.size {
            payload["size"] = json!(size);
        }
        if let Some(n) = request.n {
            payload["n"] = json!(n);
        }

        let task_id = self.submit_image_task(&payload).await?;
        self.poll_task(&task_id, self.config.poll_interval, self.config.max_wait)
            .await
    }

    /// Submit an asynchronous image job and return its task id
    pub async fn submit_image_task(&self, payload: &Value) -> BridgeResult<String> {
        debug!(
            "Submitting ModelScope image task with payload keys: {:?}",
            payload.as_object().map(|o| o.keys().collect::<Vec<_>>())
        );

        let body = self.post_json("v1/images/generations", payload, true).await?;

        body.get("task_id")
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| {
                error!("Invalid ModelScope task response format: {}", body);
                BridgeError::InvalidResponseFormat(body.to_string())
            })
    }

    /// Poll an image task at a fixed interval until it succeeds, fails or times out
    pub async fn poll_task(
        &self,
        task_id: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> BridgeResult<ImageResult> {
        let url = self.config.endpoint(&format!("v1/tasks/{}", task_id));
        let started = Instant::now();
        let mut task = ImageTask::submitted(task_id);

        loop {
            debug!("Polling ModelScope task: {}", url);
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.config.api_key)
                .header(TASK_TYPE_HEADER, "image_generation")
                .send()
                .await?;
            let body = Self::read_json(response, "task polling").await?;

            let reported = body
                .get("task_status")
                .and_then(|s| s.as_str())
                .unwrap_or_default();
            let status = TaskStatus::parse(reported).map_err(|e| {
                error!("Unknown task status for {}: {:?}", task_id, reported);
                e
            })?;
            if !task.advance(status) {
                warn!(
                    "Task {} reported {} after {}, ignoring stale status",
                    task_id, status, task.status
                );
            }

            match task.status {
                TaskStatus::Succeed => {
                    task.output_images = body
                        .get("output_images")
                        .and_then(|images| images.as_array())
                        .map(|images| {
                            images
                                .iter()
                                .filter_map(|url| url.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default();
                    if task.output_images.is_empty() {
                        error!("No output images in successful task: {}", body);
                        return Err(BridgeError::EmptyResult);
                    }
                    info!("Image task {} finished with {} image(s)", task_id, task.output_images.len());
                    return Ok(ImageResult::from_urls(task.output_images));
                }
                TaskStatus::Failed => {
                    let message = match body.get("error") {
                        Some(Value::String(message)) => message.clone(),
                        Some(Value::Null) | None => "Image generation failed".to_string(),
                        Some(other) => other.to_string(),
                    };
                    task.error = Some(message.clone());
                    error!("ModelScope image generation failed: {}", message);
                    return Err(BridgeError::GenerationFailed(message));
                }
                _ => {
                    let elapsed = started.elapsed();
                    if elapsed > max_wait {
                        error!("ModelScope task {} timed out after {:?}", task_id, elapsed);
                        return Err(BridgeError::Timeout(elapsed.as_secs()));
                    }
                    sleep(poll_interval).await;
                }
            }
        }
    }

    /// Download a generated image, returning its bytes and content type
    pub async fn download_image(&self, url: &str) -> BridgeResult<(Vec<u8>, String)> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Transport {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response.bytes().await?;
        Ok((bytes.to_vec(), content_type))
    }

    /// Send a tiny completion to verify the credential and endpoint
    pub async fn check_connection(&self) -> BridgeResult<()> {
        let params = GenerationParams {
            max_tokens: 10,
            ..Default::default()
        };
        let request = ChatRequest::new(
            RECOMMENDED_CHAT_MODEL,
            vec![json!({"role": "user", "content": "Hello"})],
            &params,
        );
        self.generate_text(&request).await?;
        info!("ModelScope API connection successful");
        Ok(())
    }
}

#[async_trait]
impl Provider for ModelScopeProvider {
    async fn generate_text(&self, request: &ChatRequest) -> BridgeResult<ProviderResponse> {
        let mut payload = serde_json::to_value(request)?;

        if is_thinking_model(&request.model) && !request.stream {
            payload["enable_thinking"] = json!(false);
            debug!("Added enable_thinking=false for {} in non-streaming mode", request.model);
        }
        if let Some(tools) = &request.tools {
            debug!(
                "Added {} tools to payload with tool_choice={:?}",
                tools.len(),
                request.tool_choice
            );
        }

        debug!(
            "Sending ModelScope request: {}",
            truncate_for_log(&payload.to_string(), LOG_BODY_CHARS)
        );
        let body = self.post_json("v1/chat/completions", &payload, false).await?;
        debug!(
            "Received ModelScope response: {}",
            truncate_for_log(&body.to_string(), LOG_BODY_CHARS)
        );

        normalize_chat_response(body).map_err(|e| {
            if let BridgeError::InvalidResponseFormat(ref body) = e {
                error!("Invalid ModelScope response format: {}", body);
            }
            e
        })
    }
}
