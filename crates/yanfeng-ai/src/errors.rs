use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("ModelScope API error: {status} - {body}")]
    Transport { status: u16, body: String },

    #[error("Failed to decode ModelScope response: {0}")]
    Decode(String),

    #[error("Invalid response from ModelScope API: {0}")]
    InvalidResponseFormat(String),

    #[error("File upload failed: {0}")]
    Upload(String),

    #[error("Empty response from ModelScope API")]
    EmptyResponse,

    #[error("No images generated")]
    EmptyResult,

    #[error("Image generation failed: {0}")]
    GenerationFailed(String),

    #[error("Image generation timeout after {0} seconds")]
    Timeout(u64),

    #[error("Unknown task status: {0}")]
    UnknownStatus(String),

    #[error("No user message found in conversation")]
    NoUserMessage,

    #[error("Model call failed on iteration {iteration}: {source}")]
    ModelCall {
        iteration: usize,
        #[source]
        source: Box<BridgeError>,
    },

    #[error("Duplicate tool name: {0}")]
    DuplicateToolName(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No prompt found for image generation")]
    NoPrompt,

    #[error("No response generated: {0}")]
    IncompleteResponse(String),

    #[error("Failed to parse JSON response: {0}")]
    InvalidJson(String),

    #[error("{model} requires an input image. Attach an image or include a public image URL in the prompt: {source}")]
    EditRequiresImage {
        model: String,
        #[source]
        source: Box<BridgeError>,
    },

    #[error("Failed to upload the image to edit: {source}. Alternatively, you can provide a public image URL in your prompt")]
    EditUploadFailed {
        #[source]
        source: Box<BridgeError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
}

impl BridgeError {
    /// Wrap an error with the orchestration iteration it happened on
    pub fn model_call(iteration: usize, source: BridgeError) -> Self {
        BridgeError::ModelCall {
            iteration,
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through iteration and edit wrappers
    pub fn root_cause(&self) -> &BridgeError {
        match self {
            BridgeError::ModelCall { source, .. } => source.root_cause(),
            BridgeError::EditRequiresImage { source, .. }
            | BridgeError::EditUploadFailed { source } => source.root_cause(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BridgeError::Decode(err.to_string())
        } else {
            BridgeError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Decode(err.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Failures raised by a tool executor. These never abort an orchestration run,
/// they are handed back to the model as an error payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
