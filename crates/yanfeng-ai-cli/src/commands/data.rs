use anyhow::{Context, Result};
use cliclack::spinner;
use yanfeng_ai::models::message::{ChatLog, ConversationEntry};
use yanfeng_ai::projector::StructureSpec;
use yanfeng_ai::task::{AiTask, EntityContext};

pub fn parse_structure(raw: &str) -> Result<StructureSpec> {
    let value = serde_json::from_str(raw).context("--structure must be a JSON object")?;
    Ok(StructureSpec::Mapping(value))
}

pub async fn execute(
    context: &EntityContext,
    instructions: String,
    structure: Option<String>,
) -> Result<()> {
    let structure = structure.as_deref().map(parse_structure).transpose()?;

    let mut chat_log = ChatLog::new();
    chat_log.push(ConversationEntry::user(instructions));

    let spin = spinner();
    spin.start("generating data");
    let result = AiTask::new(context.clone())
        .generate_data(&mut chat_log, structure.as_ref())
        .await;
    spin.stop("");

    let result = result?;
    match &result.data {
        serde_json::Value::String(text) => println!("{}", text),
        data => println!("{}", serde_json::to_string_pretty(data)?),
    }
    Ok(())
}
