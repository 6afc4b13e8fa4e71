use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::{BridgeError, BridgeResult};
use crate::models::message::{ChatLog, ConversationEntry};
use crate::models::tool::{ToolCallRequest, ToolSpec};
use crate::projector::{project, AttachmentImages, StructureSpec};
use crate::prompt_template::default_system_prompt;
use crate::providers::base::{Provider, Usage};
use crate::providers::configs::{EntitySettings, GenerationParams, MAX_TOOL_ITERATIONS};
use crate::providers::types::{ChatRequest, ProviderResponse};
use crate::tool_bridge::{to_executor_input, tools_to_provider_spec, ToolBridge, ToolExecutor};

/// Reply used when a model signals tool calls without sending any
pub const TOOL_CALL_FALLBACK_TEXT: &str = "Sorry, the selected model tried to call a tool but did not provide the call details. Please rephrase your request or switch to a model with full function-calling support.";

/// How an orchestration run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model produced a final text answer
    Answered,
    /// The model asked for tools without naming any; the fallback text was appended
    ToolCallFallback,
    /// The model replied with neither text nor tool calls; nothing was appended
    EmptyReply,
    /// The iteration bound was reached before a final answer
    IterationLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Number of model calls made
    pub iterations: usize,
    pub usage: Usage,
}

impl RunReport {
    pub fn answered(&self) -> bool {
        self.outcome == RunOutcome::Answered
    }
}

enum LoopState {
    Dispatch {
        iteration: usize,
    },
    AwaitResponse {
        iteration: usize,
        response: ProviderResponse,
    },
    ExecuteTools {
        iteration: usize,
        calls: Vec<ToolCallRequest>,
    },
    Finalize(RunOutcome),
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub model: String,
    pub params: GenerationParams,
    pub system_prompt: Option<String>,
    pub max_iterations: usize,
    pub tool_choice: String,
}

impl AgentOptions {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            params: GenerationParams::default(),
            system_prompt: None,
            max_iterations: MAX_TOOL_ITERATIONS,
            tool_choice: "auto".to_string(),
        }
    }

    pub fn from_settings(settings: &EntitySettings) -> Self {
        Self {
            model: settings.chat_model.clone(),
            params: settings.params,
            system_prompt: Some(
                settings
                    .prompt
                    .clone()
                    .unwrap_or_else(|| default_system_prompt().to_string()),
            ),
            max_iterations: settings.max_tool_iterations,
            tool_choice: "auto".to_string(),
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Agent drives the bounded request, response and tool execution cycle for one chat log
pub struct Agent {
    provider: Arc<dyn Provider>,
    bridge: ToolBridge,
    options: AgentOptions,
}

impl Agent {
    /// Create an agent without a tool executor
    pub fn new(provider: Arc<dyn Provider>, options: AgentOptions) -> Self {
        Self {
            provider,
            bridge: ToolBridge::disabled(),
            options,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.bridge = ToolBridge::new(executor);
        self
    }

    async fn dispatch(
        &self,
        iteration: usize,
        chat_log: &ChatLog,
        images: &AttachmentImages,
        tool_specs: &[serde_json::Value],
        structure: Option<&StructureSpec>,
    ) -> BridgeResult<ProviderResponse> {
        let messages = project(
            chat_log.entries(),
            images,
            self.options.system_prompt.as_deref(),
            structure,
        )?;
        let request = ChatRequest::new(&self.options.model, messages, &self.options.params)
            .with_tools(tool_specs.to_vec(), &self.options.tool_choice);

        debug!(
            "Dispatching iteration {} with {} messages to {}",
            iteration,
            request.messages.len(),
            request.model
        );
        self.provider
            .generate_text(&request)
            .await
            .map_err(|e| BridgeError::model_call(iteration, e))
    }

    /// Run the orchestration loop, appending assistant and tool result entries to the chat log.
    ///
    /// Tool failures become error results the model sees on the next turn. Transport
    /// failures abort the run wrapped with the iteration they happened on.
    pub async fn run(
        &self,
        chat_log: &mut ChatLog,
        tools: &[ToolSpec],
        structure: Option<&StructureSpec>,
    ) -> BridgeResult<RunReport> {
        let tool_specs = tools_to_provider_spec(tools)?;
        let images = AttachmentImages::load(chat_log.entries()).await;
        let mut usage = Usage::default();
        let mut iterations = 0;
        let mut state = LoopState::Dispatch { iteration: 1 };

        loop {
            state = match state {
                LoopState::Dispatch { iteration } if iteration > self.options.max_iterations => {
                    warn!(
                        "Reached maximum tool call iterations ({}) without a final answer",
                        self.options.max_iterations
                    );
                    LoopState::Finalize(RunOutcome::IterationLimit)
                }
                LoopState::Dispatch { iteration } => {
                    iterations = iteration;
                    let response = self
                        .dispatch(iteration, chat_log, &images, &tool_specs, structure)
                        .await?;
                    LoopState::AwaitResponse {
                        iteration,
                        response,
                    }
                }
                LoopState::AwaitResponse {
                    iteration,
                    response,
                } => {
                    if let Some(response_usage) = &response.usage {
                        usage.accumulate(response_usage);
                    }

                    let choice = response
                        .choices
                        .into_iter()
                        .next()
                        .ok_or_else(|| BridgeError::model_call(iteration, BridgeError::EmptyResponse))?;
                    let calls = choice.message.tool_call_requests();
                    let text = choice.message.text().map(str::to_string);

                    if calls.is_empty() && choice.wants_tool_calls() {
                        warn!(
                            "Model {} signalled tool calls without providing any",
                            self.options.model
                        );
                        chat_log.push(ConversationEntry::assistant(TOOL_CALL_FALLBACK_TEXT));
                        LoopState::Finalize(RunOutcome::ToolCallFallback)
                    } else if !calls.is_empty() {
                        info!("Model requested {} tool call(s)", calls.len());
                        chat_log.push(ConversationEntry::assistant_tool_calls(text, calls.clone()));
                        LoopState::ExecuteTools { iteration, calls }
                    } else if let Some(text) = text {
                        chat_log.push(ConversationEntry::assistant(text));
                        LoopState::Finalize(RunOutcome::Answered)
                    } else {
                        warn!("Model returned neither text nor tool calls");
                        LoopState::Finalize(RunOutcome::EmptyReply)
                    }
                }
                LoopState::ExecuteTools { iteration, calls } => {
                    // Sequential so results line up with call order
                    for call in &calls {
                        let result = self.bridge.execute(to_executor_input(call)).await;
                        chat_log.push(ConversationEntry::ToolResult(result));
                    }
                    LoopState::Dispatch {
                        iteration: iteration + 1,
                    }
                }
                LoopState::Finalize(outcome) => {
                    return Ok(RunReport {
                        outcome,
                        iterations,
                        usage,
                    });
                }
            };
        }
    }
}
