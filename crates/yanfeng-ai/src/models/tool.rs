use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    /// The name of the tool, unique within one request
    pub name: String,
    /// A description of what the tool does
    #[serde(default)]
    pub description: String,
    /// Parameters that the tool accepts, as a JSON schema or a field mapping
    #[serde(default)]
    pub parameters: Value,
}

impl ToolSpec {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        ToolSpec {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Arguments of a tool call as the provider sent them.
///
/// Most providers send a JSON encoded string, some send the object directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolArguments {
    Raw(String),
    Structured(Value),
}

impl ToolArguments {
    /// The arguments as the string the wire format carries
    pub fn to_wire_string(&self) -> String {
        match self {
            ToolArguments::Raw(raw) => raw.clone(),
            ToolArguments::Structured(value) => value.to_string(),
        }
    }
}

impl From<Value> for ToolArguments {
    fn from(value: Value) -> Self {
        match value {
            Value::String(raw) => ToolArguments::Raw(raw),
            other => ToolArguments::Structured(other),
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    /// Provider assigned id, unique within one response
    pub id: String,
    pub tool_name: String,
    pub arguments: ToolArguments,
}

impl ToolCallRequest {
    pub fn new<I, N>(id: I, tool_name: N, arguments: impl Into<ToolArguments>) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
        }
    }
}
