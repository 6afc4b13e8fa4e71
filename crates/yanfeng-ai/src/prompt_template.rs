use include_dir::{include_dir, Dir};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tera::{Context, Error as TeraError, Tera};

static PROMPTS: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/prompts");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

/// Render a template file. A path that exists on disk wins over the bundled prompt of the same name.
pub fn load_prompt_file<T: Serialize>(
    template_file: impl Into<PathBuf>,
    context_data: &T,
) -> Result<String, TeraError> {
    let template_path = template_file.into();

    let template_content = if template_path.exists() {
        fs::read_to_string(&template_path)
            .map_err(|e| TeraError::chain("Failed to read template file", e))?
    } else {
        PROMPTS
            .get_file(&template_path)
            .and_then(|file| file.contents_utf8())
            .ok_or_else(|| {
                TeraError::msg(format!("Prompt template not found: {}", template_path.display()))
            })?
            .to_string()
    };
    load_prompt(&template_content, context_data)
}

/// The bundled home-assistant system prompt
pub fn default_system_prompt() -> &'static str {
    PROMPTS
        .get_file("system.md")
        .and_then(|file| file.contents_utf8())
        .unwrap_or_default()
        .trim()
}
