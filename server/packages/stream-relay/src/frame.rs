use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the structured helper channel: a JSON object with a `kind`
/// discriminator, written one per line to the helper's stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HelperFrame {
    AssistantMessage {
        content: Value,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        content: Value,
    },
    Progress {
        message: String,
    },
    SandboxCreated {
        sandbox_id: String,
    },
    PreviewReady {
        preview_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Error {
        message: String,
    },
}

const FRAME_KINDS: [&str; 7] = [
    "assistant_message",
    "tool_use",
    "tool_result",
    "progress",
    "sandbox_created",
    "preview_ready",
    "error",
];

#[derive(Debug, Clone, PartialEq)]
pub enum FrameParse {
    Frame(HelperFrame),
    /// The line names a known `kind` but its fields do not decode.
    Malformed(String),
    /// Not JSON, or JSON without a known `kind`; treated as plain text.
    NotAFrame,
}

impl HelperFrame {
    pub fn parse_line(line: &str) -> FrameParse {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return FrameParse::NotAFrame;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => return FrameParse::NotAFrame,
        };
        let known = value
            .get("kind")
            .and_then(Value::as_str)
            .is_some_and(|kind| FRAME_KINDS.contains(&kind));
        if !known {
            return FrameParse::NotAFrame;
        }

        match serde_json::from_value(value) {
            Ok(frame) => FrameParse::Frame(frame),
            Err(err) => FrameParse::Malformed(err.to_string()),
        }
    }

    /// Serializes the frame as a single line, newline included.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|err| {
            format!(
                r#"{{"kind":"error","message":{}}}"#,
                Value::String(format!("unserializable frame: {err}"))
            )
        });
        line.push('\n');
        line
    }
}
