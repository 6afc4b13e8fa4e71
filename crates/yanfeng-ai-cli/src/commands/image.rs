use anyhow::{Context, Result};
use cliclack::spinner;
use console::style;
use std::path::{Path, PathBuf};
use yanfeng_ai::models::content::Attachment;
use yanfeng_ai::models::message::{ChatLog, ConversationEntry};
use yanfeng_ai::task::{AiTask, EntityContext};

/// File extension for a downloaded image's content type
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type.split(';').next().unwrap_or_default().trim() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        _ => "png",
    }
}

fn output_path(output: Option<PathBuf>, mime_type: &str) -> PathBuf {
    output.unwrap_or_else(|| PathBuf::from(format!("yanfeng-image.{}", extension_for(mime_type))))
}

pub async fn execute(
    context: &EntityContext,
    prompt: String,
    image: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let attachments = image.into_iter().map(Attachment::from_path).collect();
    let chat_log = ChatLog::from_entries(vec![ConversationEntry::user_with_attachments(
        prompt,
        attachments,
    )]);

    let spin = spinner();
    spin.start(format!("generating image with {}", context.settings().image_model));
    let result = AiTask::new(context.clone()).generate_image(&chat_log).await;
    spin.stop("");

    let image = result?;
    let path = output_path(output, &image.mime_type);
    write_image(&path, &image.image_data)?;

    println!(
        "{} {} ({}, {} bytes)",
        style("Saved").green(),
        path.display(),
        image.mime_type,
        image.image_data.len()
    );
    println!("{}", style(format!("prompt: {}", image.revised_prompt)).dim());
    Ok(())
}

fn write_image(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
}
