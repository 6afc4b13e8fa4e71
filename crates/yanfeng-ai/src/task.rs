//! Conversation and AI task entry points.
//!
//! Both compose an [`EntityContext`] holding the shared provider and settings.
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, AgentOptions, RunReport};
use crate::errors::{BridgeError, BridgeResult};
use crate::models::content::Attachment;
use crate::models::message::{ChatLog, ConversationEntry};
use crate::models::tool::ToolSpec;
use crate::projector::StructureSpec;
use crate::providers::configs::{is_image_editing_model, EntitySettings};
use crate::providers::modelscope::ModelScopeProvider;
use crate::providers::types::ImageRequest;
use crate::tool_bridge::ToolExecutor;

lazy_static! {
    static ref URL_PATTERN: Regex = Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).unwrap();
}

/// Shared provider and settings for the conversation agent and the AI task
#[derive(Clone)]
pub struct EntityContext {
    provider: Arc<ModelScopeProvider>,
    settings: EntitySettings,
}

impl EntityContext {
    pub fn new(provider: Arc<ModelScopeProvider>, settings: EntitySettings) -> BridgeResult<Self> {
        settings.validate()?;
        for model in settings.uncatalogued_models() {
            warn!("Model {} is not in the supported catalog, using it as given", model);
        }
        Ok(Self { provider, settings })
    }

    pub fn provider(&self) -> &ModelScopeProvider {
        &self.provider
    }

    pub fn settings(&self) -> &EntitySettings {
        &self.settings
    }

    fn agent(&self, extra_system_prompt: Option<&str>) -> Agent {
        let mut options = AgentOptions::from_settings(&self.settings);
        if let Some(extra) = extra_system_prompt.filter(|extra| !extra.trim().is_empty()) {
            let prompt = match options.system_prompt.take() {
                Some(base) => format!("{}\n\n{}", base, extra),
                None => extra.to_string(),
            };
            options.system_prompt = Some(prompt);
        }
        Agent::new(self.provider.clone(), options)
    }
}

/// The final answer of a conversation turn
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationReply {
    pub conversation_id: String,
    pub text: String,
    pub report: RunReport,
}

pub struct ConversationAgent {
    context: EntityContext,
    executor: Option<Arc<dyn ToolExecutor>>,
}

impl ConversationAgent {
    pub fn new(context: EntityContext) -> Self {
        Self {
            context,
            executor: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Append the user's message, run the tool loop and return the assistant's answer
    pub async fn handle_message(
        &self,
        chat_log: &mut ChatLog,
        text: &str,
        attachments: Vec<Attachment>,
        tools: &[ToolSpec],
        extra_system_prompt: Option<&str>,
    ) -> BridgeResult<ConversationReply> {
        chat_log.push(ConversationEntry::user_with_attachments(text, attachments));

        let mut agent = self.context.agent(extra_system_prompt);
        if let Some(executor) = &self.executor {
            agent = agent.with_executor(executor.clone());
        }

        let before = chat_log.len();
        let report = agent.run(chat_log, tools, None).await?;

        let answer = chat_log
            .entries()
            .get(before..)
            .and_then(|appended| appended.last())
            .and_then(|entry| entry.assistant_text())
            .map(str::to_string)
            .ok_or_else(|| {
                error!("Conversation run ended without an answer: {:?}", report.outcome);
                BridgeError::IncompleteResponse(format!("{:?}", report.outcome))
            })?;

        Ok(ConversationReply {
            conversation_id: chat_log.conversation_id.clone(),
            text: answer,
            report,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataResult {
    pub conversation_id: String,
    /// Parsed JSON when a structure was requested, otherwise the answer as a string
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub conversation_id: String,
    pub image_data: Vec<u8>,
    pub mime_type: String,
    pub model: String,
    pub revised_prompt: String,
}

pub struct AiTask {
    context: EntityContext,
}

impl AiTask {
    pub fn new(context: EntityContext) -> Self {
        Self { context }
    }

    /// Answer the chat log, optionally as JSON matching `structure`
    pub async fn generate_data(
        &self,
        chat_log: &mut ChatLog,
        structure: Option<&StructureSpec>,
    ) -> BridgeResult<DataResult> {
        debug!(
            "Starting generate_data task with {} entries",
            chat_log.len()
        );
        let before = chat_log.len();
        let report = self.context.agent(None).run(chat_log, &[], structure).await?;

        let text = chat_log
            .entries()
            .get(before..)
            .and_then(|appended| appended.last())
            .and_then(|entry| entry.assistant_text())
            .ok_or_else(|| {
                error!("Data task ended without an answer: {:?}", report.outcome);
                BridgeError::IncompleteResponse(format!("{:?}", report.outcome))
            })?;

        let data = match structure {
            None => Value::String(text.to_string()),
            Some(_) => serde_json::from_str(text).map_err(|e| {
                error!("Failed to parse JSON response: {}. Response: {}", e, text);
                BridgeError::InvalidJson(e.to_string())
            })?,
        };

        Ok(DataResult {
            conversation_id: chat_log.conversation_id.clone(),
            data,
        })
    }

    /// Generate or edit an image from the most recent user entry
    pub async fn generate_image(&self, chat_log: &ChatLog) -> BridgeResult<GeneratedImage> {
        let user = chat_log.last_user().ok_or(BridgeError::NoPrompt)?;
        if user.text.trim().is_empty() {
            return Err(BridgeError::NoPrompt);
        }
        let attachment = user.attachments.iter().find(|a| a.is_image());

        let model = self.context.settings.image_model.clone();
        let provider = self.context.provider();

        let mut prompt = user.text.clone();
        let mut image_url = None;
        if let Some(found) = URL_PATTERN.find(&user.text) {
            image_url = Some(found.as_str().to_string());
            prompt = URL_PATTERN.replace_all(&user.text, "").trim().to_string();
            info!("Extracted image URL from prompt: {}", found.as_str());
        } else if let Some(attachment) = attachment.filter(|_| is_image_editing_model(&model)) {
            info!(
                "Uploading image attachment to ModelScope: {}",
                attachment.path.display()
            );
            let url = provider
                .upload_file(&attachment.path, Some("image/jpeg"))
                .await
                .map_err(|e| {
                    error!("Failed to upload image for editing: {}", e);
                    BridgeError::EditUploadFailed {
                        source: Box::new(e),
                    }
                })?;
            info!("Image uploaded successfully: {}", url);
            image_url = Some(url);
        }

        let editing_without_image = image_url.is_none() && is_image_editing_model(&model);
        if editing_without_image {
            warn!(
                "{} is an image editing model but no image was provided, attempting anyway",
                model
            );
        }

        let mut request = ImageRequest::new(&model, &prompt);
        request.image_url = image_url;

        let wrap = |e: BridgeError| {
            error!("Error generating image: {}", e);
            if editing_without_image {
                BridgeError::EditRequiresImage {
                    model: model.clone(),
                    source: Box::new(e),
                }
            } else {
                e
            }
        };

        let result = provider.generate_image(&request).await.map_err(wrap)?;
        let url = result.first_url().ok_or(BridgeError::EmptyResult).map_err(wrap)?;
        let (image_data, mime_type) = provider.download_image(url).await.map_err(wrap)?;

        Ok(GeneratedImage {
            conversation_id: chat_log.conversation_id.clone(),
            image_data,
            mime_type,
            model,
            revised_prompt: prompt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolError;
    use crate::projector::StructureField;
    use crate::providers::configs::ModelScopeConfig;
    use crate::tool_bridge::ToolRegistry;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context_for(server: &MockServer, settings: EntitySettings) -> EntityContext {
        let config = ModelScopeConfig::new("test_api_key")
            .with_host(server.uri())
            .with_polling(Duration::from_millis(10), Duration::from_millis(500));
        let provider = Arc::new(ModelScopeProvider::new(config).unwrap());
        EntityContext::new(provider, settings).unwrap()
    }

    fn chat_body(content: &str) -> Value {
        json!({"choices": [{"finish_reason": "stop", "message": {"role": "assistant", "content": content}}]})
    }

    async fn mount_image_task(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "t-1"})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/tasks/t-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "task_status": "SUCCEED",
                "output_images": [format!("{}/files/1.png", server.uri())]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/1.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/webp")
                    .set_body_bytes(b"IMG".to_vec()),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let config = ModelScopeConfig::new("key");
        let provider = Arc::new(ModelScopeProvider::new(config).unwrap());
        let settings = EntitySettings {
            max_tool_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(
            EntityContext::new(provider, settings),
            Err(BridgeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_message_with_tools() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"tool_choice": "auto"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "finish_reason": "tool_calls",
                    "message": {"content": null, "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_temperature", "arguments": "{\"room\": \"study\"}"}
                    }]}
                }]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("书房温度30.8°C")))
            .mount(&server)
            .await;

        let mut registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new("get_temperature", "Read a room thermometer", json!({"room": "string"})),
            |args| match args["room"].as_str() {
                Some("study") => Ok(json!("30.8")),
                _ => Err(ToolError::InvalidParameters("unknown room".into())),
            },
        )?;
        let tools = registry.specs().to_vec();

        let agent = ConversationAgent::new(context_for(&server, EntitySettings::default()))
            .with_executor(Arc::new(registry));
        let mut chat_log = ChatLog::with_id("conv-1");
        let reply = agent
            .handle_message(&mut chat_log, "书房温度多少", vec![], &tools, Some("User is at home"))
            .await?;

        assert_eq!(reply.conversation_id, "conv-1");
        assert_eq!(reply.text, "书房温度30.8°C");
        assert_eq!(reply.report.iterations, 2);
        // user, tool calls, tool result, answer
        assert_eq!(chat_log.len(), 4);

        let requests = server.received_requests().await.unwrap();
        let first: Value = serde_json::from_slice(&requests[0].body)?;
        let system = first["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("Home Assistant"));
        assert!(system.ends_with("User is at home"));
        Ok(())
    }

    #[tokio::test]
    async fn test_handle_message_without_answer() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("")))
            .mount(&server)
            .await;

        let agent = ConversationAgent::new(context_for(&server, EntitySettings::default()));
        let mut chat_log = ChatLog::new();
        let result = agent
            .handle_message(&mut chat_log, "Hello", vec![], &[], None)
            .await;

        assert!(matches!(result, Err(BridgeError::IncompleteResponse(_))));
        assert_eq!(chat_log.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_data_structured() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body("{\"room\": \"study\", \"temperature\": 30.8}")),
            )
            .mount(&server)
            .await;

        let task = AiTask::new(context_for(&server, EntitySettings::default()));
        let structure = StructureSpec::Fields(vec![
            StructureField::new("room", "string").required(),
            StructureField::new("temperature", "number"),
        ]);
        let mut chat_log = ChatLog::with_id("task-1");
        chat_log.push(ConversationEntry::user("Report the study temperature"));

        let result = task.generate_data(&mut chat_log, Some(&structure)).await?;
        assert_eq!(result.conversation_id, "task-1");
        assert_eq!(result.data, json!({"room": "study", "temperature": 30.8}));
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_data_plain_text_and_bad_json() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("not json at all")))
            .mount(&server)
            .await;
        let task = AiTask::new(context_for(&server, EntitySettings::default()));

        let mut chat_log = ChatLog::from_entries(vec![ConversationEntry::user("Say something")]);
        let result = task.generate_data(&mut chat_log, None).await?;
        assert_eq!(result.data, json!("not json at all"));

        let mut chat_log = ChatLog::from_entries(vec![ConversationEntry::user("Say JSON")]);
        let structure = StructureSpec::Mapping(json!({"answer": "The answer"}));
        let result = task.generate_data(&mut chat_log, Some(&structure)).await;
        assert!(matches!(result, Err(BridgeError::InvalidJson(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_data_without_answer() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("  ")))
            .mount(&server)
            .await;
        let task = AiTask::new(context_for(&server, EntitySettings::default()));

        let mut chat_log = ChatLog::from_entries(vec![ConversationEntry::user("Hello")]);
        let result = task.generate_data(&mut chat_log, None).await;
        assert!(matches!(result, Err(BridgeError::IncompleteResponse(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_data_ignores_previous_answer() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("")))
            .mount(&server)
            .await;
        let task = AiTask::new(context_for(&server, EntitySettings::default()));

        let mut chat_log = ChatLog::from_entries(vec![
            ConversationEntry::user("What is the study temperature?"),
            ConversationEntry::assistant("30.8"),
        ]);
        let result = task.generate_data(&mut chat_log, None).await;

        assert!(matches!(result, Err(BridgeError::IncompleteResponse(_))));
        assert_eq!(chat_log.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_image_extracts_url_from_prompt() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_image_task(&server).await;

        let settings = EntitySettings {
            image_model: "Qwen/Qwen-Image-Edit".into(),
            ..Default::default()
        };
        let task = AiTask::new(context_for(&server, settings));
        let chat_log = ChatLog::from_entries(vec![ConversationEntry::user(
            "Make it snowy https://example.com/garden.jpg",
        )]);

        let image = task.generate_image(&chat_log).await?;
        assert_eq!(image.image_data, b"IMG".to_vec());
        assert_eq!(image.mime_type, "image/webp");
        assert_eq!(image.model, "Qwen/Qwen-Image-Edit");
        assert_eq!(image.revised_prompt, "Make it snowy");

        let requests = server.received_requests().await.unwrap();
        let submitted: Value = serde_json::from_slice(&requests[0].body)?;
        assert_eq!(
            submitted,
            json!({
                "model": "Qwen/Qwen-Image-Edit",
                "prompt": "Make it snowy",
                "image_url": "https://example.com/garden.jpg"
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_image_uploads_attachment_for_editing() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/files"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"file_url": "https://cdn.example.com/up.jpg"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_image_task(&server).await;

        let mut file = tempfile::Builder::new().suffix(".png").tempfile()?;
        file.write_all(b"PNGDATA")?;

        let settings = EntitySettings {
            image_model: "Qwen/Qwen-Image-Edit".into(),
            ..Default::default()
        };
        let task = AiTask::new(context_for(&server, settings));
        let chat_log = ChatLog::from_entries(vec![ConversationEntry::user_with_attachments(
            "Add a cat",
            vec![
                Attachment::new("/tmp/notes.txt", "text/plain"),
                Attachment::new(file.path(), "image/png"),
            ],
        )]);

        task.generate_image(&chat_log).await?;

        let requests = server.received_requests().await.unwrap();
        let submit = requests
            .iter()
            .find(|r| r.url.path() == "/v1/images/generations")
            .unwrap();
        let submitted: Value = serde_json::from_slice(&submit.body)?;
        assert_eq!(submitted["image_url"], "https://cdn.example.com/up.jpg");
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_image_upload_failure_suggests_url() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/files"))
            .respond_with(ResponseTemplate::new(413).set_body_string("file too large"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "t-1"})))
            .expect(0)
            .mount(&server)
            .await;

        let file = tempfile::Builder::new().suffix(".jpg").tempfile()?;
        let settings = EntitySettings {
            image_model: "Qwen/Qwen-Image-Edit".into(),
            ..Default::default()
        };
        let task = AiTask::new(context_for(&server, settings));
        let chat_log = ChatLog::from_entries(vec![ConversationEntry::user_with_attachments(
            "Remove the car",
            vec![Attachment::new(file.path(), "image/jpeg")],
        )]);

        let err = task.generate_image(&chat_log).await.unwrap_err();
        assert!(matches!(err, BridgeError::EditUploadFailed { .. }));
        assert!(err.to_string().contains("public image URL"));
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_image_text_only_ignores_attachment() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_image_task(&server).await;

        let task = AiTask::new(context_for(&server, EntitySettings::default()));
        let chat_log = ChatLog::from_entries(vec![ConversationEntry::user_with_attachments(
            "A lighthouse at dusk",
            vec![Attachment::new("/tmp/unused.png", "image/png")],
        )]);

        let image = task.generate_image(&chat_log).await?;
        assert_eq!(image.model, "Qwen/Qwen-Image");

        let requests = server.received_requests().await.unwrap();
        let submitted: Value = serde_json::from_slice(&requests[0].body)?;
        assert_eq!(
            submitted,
            json!({"model": "Qwen/Qwen-Image", "prompt": "A lighthouse at dusk"})
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_image_edit_without_image_fails_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(400).set_body_string("image_url is required"))
            .mount(&server)
            .await;

        let settings = EntitySettings {
            image_model: "Qwen/Qwen-Image-Edit".into(),
            ..Default::default()
        };
        let task = AiTask::new(context_for(&server, settings));
        let chat_log = ChatLog::from_entries(vec![ConversationEntry::user("Make it blue")]);

        let err = task.generate_image(&chat_log).await.unwrap_err();
        assert!(matches!(err, BridgeError::EditRequiresImage { .. }));
        assert!(matches!(
            err.root_cause(),
            BridgeError::Transport { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn test_generate_image_requires_prompt() {
        let server = MockServer::start().await;
        let task = AiTask::new(context_for(&server, EntitySettings::default()));

        let chat_log = ChatLog::from_entries(vec![ConversationEntry::system("only system")]);
        assert!(matches!(
            task.generate_image(&chat_log).await,
            Err(BridgeError::NoPrompt)
        ));

        let chat_log = ChatLog::from_entries(vec![ConversationEntry::user("   ")]);
        assert!(matches!(
            task.generate_image(&chat_log).await,
            Err(BridgeError::NoPrompt)
        ));
    }
}
