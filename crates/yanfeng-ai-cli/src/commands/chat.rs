use anyhow::{Context, Result};
use cliclack::spinner;
use console::style;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use yanfeng_ai::config_cache::ConfigCache;
use yanfeng_ai::models::content::Attachment;
use yanfeng_ai::models::message::{ChatLog, ConversationEntry};
use yanfeng_ai::models::tool::ToolSpec;
use yanfeng_ai::task::{ConversationAgent, EntityContext};
use yanfeng_ai::tool_bridge::ToolRegistry;

/// A tool declared in a YAML file, answering every call with a canned response
#[derive(Debug, Deserialize)]
pub struct ToolDefinition {
    #[serde(flatten)]
    pub spec: ToolSpec,
    #[serde(default)]
    pub response: Value,
}

pub fn load_tools(cache: &ConfigCache, path: &Path) -> Result<ToolRegistry> {
    let definitions: Vec<ToolDefinition> = cache
        .load_as(path)
        .with_context(|| format!("Failed to load tools from {}", path.display()))?;

    let mut registry = ToolRegistry::new();
    for definition in definitions {
        let response = definition.response;
        registry.register(definition.spec, move |arguments| {
            if response.is_null() {
                Ok(json!({"status": "ok", "arguments": arguments}))
            } else {
                Ok(response.clone())
            }
        })?;
    }
    Ok(registry)
}

pub async fn execute(
    context: &EntityContext,
    cache: &ConfigCache,
    message: String,
    images: Vec<PathBuf>,
    tools_file: Option<PathBuf>,
    system: Option<String>,
) -> Result<()> {
    let registry = match tools_file {
        Some(path) => load_tools(cache, &path)?,
        None => ToolRegistry::new(),
    };
    let tools = registry.specs().to_vec();
    let attachments = images.into_iter().map(Attachment::from_path).collect();

    let agent = ConversationAgent::new(context.clone()).with_executor(Arc::new(registry));
    let mut chat_log = ChatLog::new();

    let spin = spinner();
    spin.start("awaiting reply");
    let result = agent
        .handle_message(&mut chat_log, &message, attachments, &tools, system.as_deref())
        .await;
    spin.stop("");

    for entry in chat_log.entries() {
        if let ConversationEntry::ToolResult(result) = entry {
            println!(
                "{} {} {}",
                style("tool").cyan(),
                style(&result.tool_name).bold(),
                style(result.result_text()).dim()
            );
        }
    }

    let reply = result?;
    println!("{}", reply.text);

    let usage = reply.report.usage;
    if let Some(total) = usage.total_tokens {
        println!(
            "{}",
            style(format!(
                "{} iteration(s), {} tokens ({} prompt, {} completion)",
                reply.report.iterations,
                total,
                usage.input_tokens.unwrap_or_default(),
                usage.output_tokens.unwrap_or_default()
            ))
            .dim()
        );
    }
    Ok(())
}
