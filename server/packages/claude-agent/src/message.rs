use serde::Deserialize;
use serde_json::Value;

/// Typed view of one Claude Code stream-json message. Unknown message and
/// block types are tolerated so newer CLI versions keep working.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        message: MessageBody,
    },
    User {
        message: MessageBody,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

impl StreamMessage {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Assistant { .. } => "assistant",
            Self::User { .. } => "user",
            Self::Result { .. } => "result",
            Self::Unknown => "unknown",
        }
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            Self::Assistant { message } | Self::User { message } => match &message.content {
                MessageContent::Blocks(blocks) => blocks,
                MessageContent::Text(_) => &[],
            },
            _ => &[],
        }
    }

    /// Concatenated text of an assistant message, if it has any.
    pub fn assistant_text(&self) -> Option<String> {
        let Self::Assistant { message } = self else {
            return None;
        };
        let text = match &message.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_assistant_with_mixed_blocks() {
        let line = r#"{"type":"assistant","message":{"id":"msg_1","content":[
            {"type":"text","text":"I'll create the page."},
            {"type":"tool_use","id":"toolu_1","name":"Write","input":{"file_path":"app/page.tsx"}},
            {"type":"thinking","thinking":"..."}
        ]},"session_id":"s1"}"#;
        let message = StreamMessage::parse_line(&line.replace('\n', "")).expect("parse");
        assert_eq!(message.kind(), "assistant");
        assert_eq!(message.assistant_text().as_deref(), Some("I'll create the page."));
        assert_eq!(message.blocks().len(), 3);
        assert_eq!(
            message.blocks()[1],
            ContentBlock::ToolUse {
                id: Some("toolu_1".to_string()),
                name: "Write".to_string(),
                input: json!({"file_path": "app/page.tsx"}),
            }
        );
        assert_eq!(message.blocks()[2], ContentBlock::Other);
    }

    #[test]
    fn parses_result_and_unknown_types() {
        let result = StreamMessage::from_value(&json!({
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "num_turns": 4,
            "result": "Done"
        }))
        .expect("result");
        assert!(matches!(
            result,
            StreamMessage::Result {
                num_turns: Some(4),
                is_error: false,
                ..
            }
        ));

        let unknown = StreamMessage::from_value(&json!({"type": "stream_event", "x": 1}))
            .expect("unknown tolerated");
        assert_eq!(unknown, StreamMessage::Unknown);
    }

    #[test]
    fn user_message_may_carry_plain_text() {
        let message = StreamMessage::from_value(&json!({
            "type": "user",
            "message": {"role": "user", "content": "hello"}
        }))
        .expect("user");
        assert!(message.blocks().is_empty());
        assert_eq!(message.assistant_text(), None);
    }
}
