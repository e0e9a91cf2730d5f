use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

use crate::message::{ContentBlock, StreamMessage};
use crate::query::ClaudeQuery;

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    pub messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolUseSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Runs a query to completion and keeps every message.
pub async fn collect_generation(query: &ClaudeQuery, prompt: &str) -> GenerationResult {
    let mut stream = match query.start(prompt) {
        Ok(stream) => stream,
        Err(err) => {
            return GenerationResult {
                success: false,
                messages: Vec::new(),
                error: Some(err.to_string()),
            }
        }
    };

    let mut messages = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => messages.push(message),
            Err(err) => {
                tracing::error!(error = %err, "agent generation failed");
                return GenerationResult {
                    success: false,
                    messages: Vec::new(),
                    error: Some(err.to_string()),
                };
            }
        }
    }

    GenerationResult {
        success: true,
        messages,
        error: None,
    }
}

/// Lists the tool calls made across a transcript, with the most telling
/// input field (file path, command, or search pattern) as the target.
pub fn summarize_tool_uses(messages: &[Value]) -> Vec<ToolUseSummary> {
    messages
        .iter()
        .filter_map(StreamMessage::from_value)
        .flat_map(|message| {
            message
                .blocks()
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { name, input, .. } => Some(ToolUseSummary {
                        name: name.clone(),
                        target: tool_target(input),
                    }),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn tool_target(input: &Value) -> Option<String> {
    ["file_path", "command", "pattern", "path", "url"]
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summarizes_tool_calls_in_order() {
        let messages = vec![
            json!({"type": "system", "subtype": "init"}),
            json!({"type": "assistant", "message": {"content": [
                {"type": "text", "text": "Creating files"},
                {"type": "tool_use", "id": "t1", "name": "Write", "input": {"file_path": "tictactoe.html", "content": "<html>"}}
            ]}}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "ok"}
            ]}}),
            json!({"type": "assistant", "message": {"content": [
                {"type": "tool_use", "id": "t2", "name": "Bash", "input": {"command": "ls"}},
                {"type": "tool_use", "id": "t3", "name": "TodoWrite", "input": {"todos": []}}
            ]}}),
            json!({"type": "result", "subtype": "success"}),
        ];

        assert_eq!(
            summarize_tool_uses(&messages),
            vec![
                ToolUseSummary {
                    name: "Write".to_string(),
                    target: Some("tictactoe.html".to_string())
                },
                ToolUseSummary {
                    name: "Bash".to_string(),
                    target: Some("ls".to_string())
                },
                ToolUseSummary {
                    name: "TodoWrite".to_string(),
                    target: None
                },
            ]
        );
    }
}
