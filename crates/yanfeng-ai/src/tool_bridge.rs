use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::{BridgeError, BridgeResult, ToolError};
use crate::models::message::ToolResultEntry;
use crate::models::tool::{ToolArguments, ToolCallRequest, ToolSpec};

const SCHEMA_TYPES: [&str; 7] = [
    "string", "number", "integer", "boolean", "array", "object", "null",
];

/// The host capability that actually runs tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run the named tool with structured arguments
    async fn call(&self, tool_name: &str, arguments: Value) -> Result<Value, ToolError>;
}

fn empty_parameters() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Expand a `{field: type | {type, description, required}}` shorthand into a JSON schema
fn expand_shorthand(fields: &Map<String, Value>) -> Result<Value, String> {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for (name, info) in fields {
        let property = match info {
            Value::String(kind) if SCHEMA_TYPES.contains(&kind.as_str()) => json!({"type": kind}),
            Value::Object(info) => {
                let mut property = info.clone();
                if property.remove("required").and_then(|r| r.as_bool()) == Some(true) {
                    required.push(name.clone());
                }
                property
                    .entry("type")
                    .or_insert_with(|| Value::String("string".to_string()));
                Value::Object(property)
            }
            other => return Err(format!("field '{}' has unsupported definition {}", name, other)),
        };
        properties.insert(name.clone(), property);
    }

    let mut schema = json!({"type": "object", "properties": properties});
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    Ok(schema)
}

fn parameters_schema(tool: &ToolSpec) -> Result<Value, String> {
    match &tool.parameters {
        Value::Null => Ok(empty_parameters()),
        Value::Object(object) if object.get("type").and_then(|t| t.as_str()) == Some("object") => {
            Ok(tool.parameters.clone())
        }
        Value::Object(object) if object.contains_key("properties") => {
            let mut schema = object.clone();
            schema.insert("type".to_string(), json!("object"));
            Ok(Value::Object(schema))
        }
        Value::Object(object) => expand_shorthand(object),
        other => Err(format!("expected an object, got {}", other)),
    }
}

/// Convert a tool into the function-calling format of the chat endpoint.
///
/// A schema that cannot be converted degrades to an empty parameter object.
pub fn to_schema(tool: &ToolSpec) -> Value {
    let parameters = parameters_schema(tool).unwrap_or_else(|reason| {
        warn!(
            "Failed to convert parameters of tool {}: {}; using empty parameters",
            tool.name, reason
        );
        empty_parameters()
    });

    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": parameters,
        }
    })
}

pub fn tools_to_provider_spec(tools: &[ToolSpec]) -> BridgeResult<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(BridgeError::DuplicateToolName(tool.name.clone()));
        }
        result.push(to_schema(tool));
    }

    Ok(result)
}

/// A tool call ready to hand to the executor
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorInput {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

pub fn to_executor_input(call: &ToolCallRequest) -> ExecutorInput {
    let arguments = match &call.arguments {
        ToolArguments::Structured(value @ Value::Object(_)) => value.clone(),
        ToolArguments::Raw(raw) if raw.trim().is_empty() => json!({}),
        ToolArguments::Raw(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => value,
            Ok(other) => {
                warn!(
                    "Tool {} arguments are not an object: {}",
                    call.tool_name, other
                );
                json!({})
            }
            Err(e) => {
                warn!(
                    "Failed to parse arguments of tool {}: {} ({})",
                    call.tool_name, e, raw
                );
                json!({})
            }
        },
        ToolArguments::Structured(other) => {
            warn!(
                "Tool {} arguments are not an object: {}",
                call.tool_name, other
            );
            json!({})
        }
    };

    ExecutorInput {
        tool_call_id: call.id.clone(),
        tool_name: call.tool_name.clone(),
        arguments,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "tool panicked".to_string()
    }
}

/// Runs tool calls against an optional executor, never failing the caller
#[derive(Clone, Default)]
pub struct ToolBridge {
    executor: Option<Arc<dyn ToolExecutor>>,
}

impl ToolBridge {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            executor: Some(executor),
        }
    }

    /// A bridge with nothing to call; every execution reports an error result
    pub fn disabled() -> Self {
        Self { executor: None }
    }

    pub async fn execute(&self, input: ExecutorInput) -> ToolResultEntry {
        info!("Calling tool {} with {}", input.tool_name, input.arguments);

        let outcome = match &self.executor {
            Some(executor) => {
                AssertUnwindSafe(executor.call(&input.tool_name, input.arguments.clone()))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(ToolError::Internal(panic_message(payload))))
            }
            None => Err(ToolError::ToolNotFound(input.tool_name.clone())),
        };

        let result = match outcome {
            Ok(value) => {
                debug!("Tool {} returned {}", input.tool_name, value);
                value
            }
            Err(e) => {
                warn!("Tool {} failed: {}", input.tool_name, e);
                json!({"error": e.to_string()})
            }
        };

        ToolResultEntry {
            tool_call_id: input.tool_call_id,
            tool_name: input.tool_name,
            result,
        }
    }
}

type ToolHandler = Arc<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;

/// A set of tools backed by plain closures
#[derive(Clone, Default)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Registering the same name twice is an error.
    pub fn register<F>(&mut self, spec: ToolSpec, handler: F) -> BridgeResult<()>
    where
        F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        if self.handlers.contains_key(&spec.name) {
            return Err(BridgeError::DuplicateToolName(spec.name));
        }
        self.handlers.insert(spec.name.clone(), Arc::new(handler));
        self.specs.push(spec);
        Ok(())
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn call(&self, tool_name: &str, arguments: Value) -> Result<Value, ToolError> {
        let handler = self
            .handlers
            .get(tool_name)
            .ok_or_else(|| ToolError::ToolNotFound(tool_name.to_string()))?;
        handler(arguments)
    }
}
