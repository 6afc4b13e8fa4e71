use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::Attachment;
use super::tool::ToolCallRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantEntry {
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultEntry {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: Value,
}

impl ToolResultEntry {
    /// The result as the text sent back to the model
    pub fn result_text(&self) -> String {
        match &self.result {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

/// One entry of a conversation, in temporal order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationEntry {
    System { text: String },
    User(UserEntry),
    Assistant(AssistantEntry),
    ToolResult(ToolResultEntry),
}

impl ConversationEntry {
    pub fn system<S: Into<String>>(text: S) -> Self {
        ConversationEntry::System { text: text.into() }
    }

    pub fn user<S: Into<String>>(text: S) -> Self {
        ConversationEntry::User(UserEntry {
            text: text.into(),
            attachments: Vec::new(),
        })
    }

    pub fn user_with_attachments<S: Into<String>>(text: S, attachments: Vec<Attachment>) -> Self {
        ConversationEntry::User(UserEntry {
            text: text.into(),
            attachments,
        })
    }

    pub fn assistant<S: Into<String>>(text: S) -> Self {
        ConversationEntry::Assistant(AssistantEntry {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        })
    }

    pub fn assistant_tool_calls(text: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        ConversationEntry::Assistant(AssistantEntry { text, tool_calls })
    }

    pub fn tool_result<I, N>(tool_call_id: I, tool_name: N, result: Value) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        ConversationEntry::ToolResult(ToolResultEntry {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result,
        })
    }

    pub fn as_assistant(&self) -> Option<&AssistantEntry> {
        if let ConversationEntry::Assistant(ref assistant) = self {
            Some(assistant)
        } else {
            None
        }
    }

    pub fn as_user(&self) -> Option<&UserEntry> {
        if let ConversationEntry::User(ref user) = self {
            Some(user)
        } else {
            None
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultEntry> {
        if let ConversationEntry::ToolResult(ref result) = self {
            Some(result)
        } else {
            None
        }
    }

    /// Get the assistant text if this is an assistant entry carrying text
    pub fn assistant_text(&self) -> Option<&str> {
        self.as_assistant().and_then(|a| a.text.as_deref())
    }
}

/// The host-owned conversation.
///
/// Entries are only ever appended; nothing in this crate removes or reorders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLog {
    pub conversation_id: String,
    entries: Vec<ConversationEntry>,
}

impl ChatLog {
    /// Create an empty chat log with a fresh conversation id
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id<S: Into<String>>(conversation_id: S) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn from_entries(entries: Vec<ConversationEntry>) -> Self {
        let mut log = Self::new();
        log.entries = entries;
        log
    }

    pub fn push(&mut self, entry: ConversationEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ConversationEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent user entry, if any
    pub fn last_user(&self) -> Option<&UserEntry> {
        self.entries.iter().rev().find_map(|entry| entry.as_user())
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_text() {
        let text = ToolResultEntry {
            tool_call_id: "call_1".into(),
            tool_name: "get_temperature".into(),
            result: json!("24.5°C"),
        };
        assert_eq!(text.result_text(), "24.5°C");
        assert!(!text.is_error());

        let structured = ToolResultEntry {
            tool_call_id: "call_1".into(),
            tool_name: "get_temperature".into(),
            result: json!({"error": "sensor offline"}),
        };
        assert_eq!(structured.result_text(), r#"{"error":"sensor offline"}"#);
        assert!(structured.is_error());
    }

    #[test]
    fn test_chat_log_last_user() {
        let mut log = ChatLog::with_id("conv-1");
        assert!(log.last_user().is_none());

        log.push(ConversationEntry::user("first"));
        log.push(ConversationEntry::assistant("reply"));
        log.push(ConversationEntry::user("second"));
        log.push(ConversationEntry::assistant("again"));

        assert_eq!(log.len(), 4);
        assert_eq!(log.last_user().unwrap().text, "second");
        assert_eq!(log.last().unwrap().assistant_text(), Some("again"));
    }

    #[test]
    fn test_entry_serialization_is_tagged() {
        let entry = ConversationEntry::system("be brief");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value, json!({"kind": "system", "text": "be brief"}));
    }
}
