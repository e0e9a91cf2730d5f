use serde::Serialize;
use serde_json::Value;

/// Event emitted by the agent or synthesized by the relay.
///
/// Serializes to the JSON shapes browser clients consume. `ToolResult` is
/// tracked internally but never reaches a client, and `Done` is rendered as
/// the literal `[DONE]` frame rather than JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "claude_message")]
    TextMessage { content: Value },
    #[serde(rename = "tool_use")]
    ToolInvocation { name: String, input: Value },
    #[serde(rename = "tool_result")]
    ToolResult { content: Value },
    #[serde(rename = "progress")]
    ProgressLine { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "complete")]
    Complete {
        #[serde(rename = "sandboxId")]
        sandbox_id: Option<String>,
        #[serde(rename = "previewUrl")]
        preview_url: String,
    },
    #[serde(rename = "done")]
    Done,
}

impl AgentEvent {
    pub fn progress(message: impl Into<String>) -> Self {
        Self::ProgressLine {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_client_visible(&self) -> bool {
        !matches!(self, Self::ToolResult { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextMessage { .. } => "claude_message",
            Self::ToolInvocation { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::ProgressLine { .. } => "progress",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
            Self::Done => "done",
        }
    }

    /// Payload of the `data:` line for this event, or `None` when the event
    /// is never shown to clients.
    pub fn sse_data(&self) -> Option<String> {
        match self {
            Self::ToolResult { .. } => None,
            Self::Done => Some("[DONE]".to_string()),
            other => Some(
                serde_json::to_string(other)
                    .unwrap_or_else(|_| r#"{"type":"error","message":"unserializable event"}"#.to_string()),
            ),
        }
    }
}
