use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    MissingConfiguration,
    SpawnFailed,
    AgentProcessExited,
    StreamError,
    SandboxApi,
    Internal,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "urn:sandbox-builder:error:invalid_request",
            Self::MissingConfiguration => "urn:sandbox-builder:error:missing_configuration",
            Self::SpawnFailed => "urn:sandbox-builder:error:spawn_failed",
            Self::AgentProcessExited => "urn:sandbox-builder:error:agent_process_exited",
            Self::StreamError => "urn:sandbox-builder:error:stream_error",
            Self::SandboxApi => "urn:sandbox-builder:error:sandbox_api",
            Self::Internal => "urn:sandbox-builder:error:internal",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid Request",
            Self::MissingConfiguration => "Missing Configuration",
            Self::SpawnFailed => "Spawn Failed",
            Self::AgentProcessExited => "Agent Process Exited",
            Self::StreamError => "Stream Error",
            Self::SandboxApi => "Sandbox API Error",
            Self::Internal => "Internal Server Error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::MissingConfiguration => 500,
            Self::SpawnFailed => 500,
            Self::AgentProcessExited => 500,
            Self::StreamError => 502,
            Self::SandboxApi => 502,
            Self::Internal => 500,
        }
    }
}

/// JSON body returned for failures that happen before a stream is committed.
///
/// `error` carries the human-readable message; browser clients read that
/// field directly.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProblemBody {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    pub error: String,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemBody {
    pub fn new(error_type: ErrorType, error: impl Into<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            error: error.into(),
            extensions: Map::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("Prompt is required")]
    MissingPrompt,
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("Missing API keys")]
    MissingApiKeys { missing: Vec<&'static str> },
    #[error("failed to start {command}: {message}")]
    SpawnFailed { command: String, message: String },
    #[error("agent process exited with code {exit_code:?}")]
    AgentProcessExited {
        exit_code: Option<i32>,
        stderr: Option<String>,
    },
    #[error("stream error: {message}")]
    StreamError { message: String },
    #[error("sandbox api error: {message}")]
    SandboxApi { message: String },
    #[error("{message}")]
    Internal { message: String },
}

impl BuilderError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::MissingPrompt | Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::MissingApiKeys { .. } => ErrorType::MissingConfiguration,
            Self::SpawnFailed { .. } => ErrorType::SpawnFailed,
            Self::AgentProcessExited { .. } => ErrorType::AgentProcessExited,
            Self::StreamError { .. } => ErrorType::StreamError,
            Self::SandboxApi { .. } => ErrorType::SandboxApi,
            Self::Internal { .. } => ErrorType::Internal,
        }
    }

    pub fn to_problem_body(&self) -> ProblemBody {
        let mut body = ProblemBody::new(self.error_type(), self.to_string());
        match self {
            Self::MissingApiKeys { missing } => {
                body.extensions.insert(
                    "missing".to_string(),
                    Value::Array(
                        missing
                            .iter()
                            .map(|key| Value::String((*key).to_string()))
                            .collect(),
                    ),
                );
            }
            Self::AgentProcessExited { exit_code, stderr } => {
                if let Some(code) = exit_code {
                    body.extensions.insert(
                        "exitCode".to_string(),
                        Value::Number(serde_json::Number::from(*code as i64)),
                    );
                }
                if let Some(stderr) = stderr {
                    body.extensions
                        .insert("stderr".to_string(), Value::String(stderr.clone()));
                }
            }
            Self::SpawnFailed { command, .. } => {
                body.extensions
                    .insert("command".to_string(), Value::String(command.clone()));
            }
            _ => {}
        }
        body
    }
}

impl From<BuilderError> for ProblemBody {
    fn from(value: BuilderError) -> Self {
        value.to_problem_body()
    }
}

impl From<&BuilderError> for ProblemBody {
    fn from(value: &BuilderError) -> Self {
        value.to_problem_body()
    }
}
