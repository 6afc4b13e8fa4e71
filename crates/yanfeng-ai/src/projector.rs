//! Projects the host chat log into the message list of a chat completion request.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tracing::{debug, error, warn};

use crate::errors::{BridgeError, BridgeResult};
use crate::models::content::Attachment;
use crate::models::message::{AssistantEntry, ConversationEntry, ToolResultEntry, UserEntry};
use crate::prompt_template::load_prompt_file;
use crate::providers::types::positional_call_id;

/// One field of a structured-output request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureField {
    pub name: String,
    pub kind: String,
    pub required: bool,
    pub description: Option<String>,
}

impl StructureField {
    pub fn new<N: Into<String>, K: Into<String>>(name: N, kind: K) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            required: false,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The JSON shape a data task wants back
#[derive(Debug, Clone, PartialEq)]
pub enum StructureSpec {
    /// A declared list of fields
    Fields(Vec<StructureField>),
    /// A plain mapping of field name to field info, or a JSON schema object
    Mapping(Value),
}

/// Read fields out of a JSON schema (`properties` + `required`) or a
/// `{name: info}` mapping where info is an object or a bare description.
pub fn fields_from_mapping(value: &Value) -> Option<Vec<StructureField>> {
    let object = value.as_object()?;

    if let Some(properties) = object.get("properties").and_then(|p| p.as_object()) {
        let required: Vec<&str> = object
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        return Some(
            properties
                .iter()
                .map(|(name, info)| StructureField {
                    name: name.clone(),
                    kind: info["type"].as_str().unwrap_or("string").to_string(),
                    required: required.contains(&name.as_str()),
                    description: info["description"].as_str().map(str::to_string),
                })
                .collect(),
        );
    }

    Some(
        object
            .iter()
            .map(|(name, info)| match info {
                Value::Object(info) => StructureField {
                    name: name.clone(),
                    kind: info
                        .get("type")
                        .and_then(|t| t.as_str())
                        .unwrap_or("string")
                        .to_string(),
                    required: info
                        .get("required")
                        .and_then(|r| r.as_bool())
                        .unwrap_or(false),
                    description: info
                        .get("description")
                        .and_then(|d| d.as_str())
                        .map(str::to_string),
                },
                Value::String(description) => StructureField {
                    name: name.clone(),
                    kind: "string".to_string(),
                    required: false,
                    description: Some(description.clone()).filter(|d| !d.is_empty()),
                },
                other => StructureField {
                    name: name.clone(),
                    kind: "string".to_string(),
                    required: false,
                    description: Some(other.to_string()),
                },
            })
            .collect(),
    )
}

#[derive(Serialize)]
struct StructureContext {
    fields: Vec<StructureField>,
    raw: Option<String>,
}

/// Render the instruction asking the model for the given JSON shape
pub fn format_structure_prompt(structure: &StructureSpec) -> BridgeResult<String> {
    let context = match structure {
        StructureSpec::Fields(fields) => StructureContext {
            fields: fields.clone(),
            raw: None,
        },
        StructureSpec::Mapping(value) => match fields_from_mapping(value) {
            Some(fields) => StructureContext { fields, raw: None },
            None => {
                // Unrecognized shapes still reach the model as a dump
                warn!("Unknown structure format: {}", value);
                StructureContext {
                    fields: Vec::new(),
                    raw: Some(value.to_string()),
                }
            }
        },
    };

    Ok(load_prompt_file("structure.md", &context)?.trim().to_string())
}

/// Attachment images read ahead of a run, base64 encoded and keyed by path.
///
/// The chat log only grows with assistant and tool entries during a run, so
/// the files are read once instead of on every request.
#[derive(Debug, Clone, Default)]
pub struct AttachmentImages {
    encoded: HashMap<PathBuf, String>,
}

impl AttachmentImages {
    /// Read every user attachment. Files that cannot be read are logged and left out.
    pub async fn load(entries: &[ConversationEntry]) -> Self {
        let mut encoded = HashMap::new();
        let attachments = entries.iter().flat_map(|entry| match entry {
            ConversationEntry::User(user) => user.attachments.as_slice(),
            _ => &[][..],
        });

        for attachment in attachments {
            if encoded.contains_key(&attachment.path) {
                continue;
            }
            match tokio::fs::read(&attachment.path).await {
                Ok(bytes) => {
                    debug!(
                        "Loaded image attachment: {} (mime: {})",
                        attachment.path.display(),
                        attachment.mime_type
                    );
                    encoded.insert(attachment.path.clone(), STANDARD.encode(bytes));
                }
                Err(e) => {
                    error!(
                        "Failed to read image attachment {}: {}",
                        attachment.path.display(),
                        e
                    );
                }
            }
        }

        Self { encoded }
    }

    pub fn len(&self) -> usize {
        self.encoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// The attachment as an `image_url` part, or `None` if it could not be read
    fn image_part(&self, attachment: &Attachment) -> Option<Value> {
        let data = self.encoded.get(&attachment.path)?;
        Some(json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:{};base64,{}", attachment.mime_type, data)
            }
        }))
    }
}

fn project_user(user: &UserEntry, images: &AttachmentImages) -> Value {
    if user.attachments.is_empty() {
        return json!({"role": "user", "content": user.text});
    }

    let mut parts = Vec::new();
    if !user.text.is_empty() {
        parts.push(json!({"type": "text", "text": user.text}));
    }
    parts.extend(
        user.attachments
            .iter()
            .filter_map(|attachment| images.image_part(attachment)),
    );
    json!({"role": "user", "content": parts})
}

fn project_assistant(assistant: &AssistantEntry, pending_ids: &mut VecDeque<String>) -> Value {
    let mut converted = json!({
        "role": "assistant",
        "content": assistant.text.clone().unwrap_or_default(),
    });

    if !assistant.tool_calls.is_empty() {
        pending_ids.clear();
        let calls: Vec<Value> = assistant
            .tool_calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    positional_call_id(index)
                } else {
                    call.id.clone()
                };
                pending_ids.push_back(id.clone());
                json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": call.tool_name,
                        "arguments": call.arguments.to_wire_string(),
                    }
                })
            })
            .collect();
        converted["tool_calls"] = json!(calls);
    }

    converted
}

fn project_tool_result(result: &ToolResultEntry, pending_ids: &mut VecDeque<String>) -> Value {
    let id = if result.tool_call_id.is_empty() {
        pending_ids
            .pop_front()
            .unwrap_or_else(|| positional_call_id(0))
    } else {
        if let Some(position) = pending_ids.iter().position(|id| *id == result.tool_call_id) {
            pending_ids.remove(position);
        }
        result.tool_call_id.clone()
    };

    json!({
        "role": "tool",
        "tool_call_id": id,
        "name": result.tool_name,
        "content": result.result_text(),
    })
}

/// Convert the conversation into request messages, in order.
///
/// The system prompt is prepended only when the history has no system entry.
/// A structure instruction, when given, is appended last. User attachments are
/// taken from `images`; those missing there are skipped.
pub fn project(
    entries: &[ConversationEntry],
    images: &AttachmentImages,
    system_prompt: Option<&str>,
    structure: Option<&StructureSpec>,
) -> BridgeResult<Vec<Value>> {
    let mut messages = Vec::with_capacity(entries.len() + 2);

    let has_system = entries
        .iter()
        .any(|entry| matches!(entry, ConversationEntry::System { .. }));
    if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
        if !has_system {
            messages.push(json!({"role": "system", "content": prompt}));
        }
    }

    let mut pending_ids = VecDeque::new();
    for entry in entries {
        let message = match entry {
            ConversationEntry::System { text } => json!({"role": "system", "content": text}),
            ConversationEntry::User(user) => project_user(user, images),
            ConversationEntry::Assistant(assistant) => {
                project_assistant(assistant, &mut pending_ids)
            }
            ConversationEntry::ToolResult(result) => {
                project_tool_result(result, &mut pending_ids)
            }
        };
        messages.push(message);
    }

    if let Some(structure) = structure {
        messages.push(json!({
            "role": "system",
            "content": format_structure_prompt(structure)?,
        }));
    }

    if !messages.iter().any(|m| m["role"] == "user") {
        error!("No user message found in chat log");
        return Err(BridgeError::NoUserMessage);
    }

    Ok(messages)
}
