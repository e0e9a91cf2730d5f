use serde::Deserialize;
use serde_json::Value;

use crate::event::AgentEvent;
use crate::frame::{FrameParse, HelperFrame};

pub const CLAUDE_MESSAGE_MARKER: &str = "__CLAUDE_MESSAGE__";
pub const TOOL_USE_MARKER: &str = "__TOOL_USE__";
pub const TOOL_RESULT_MARKER: &str = "__TOOL_RESULT__";

const SENTINEL_MARKERS: [&str; 3] = [CLAUDE_MESSAGE_MARKER, TOOL_USE_MARKER, TOOL_RESULT_MARKER];

// Lines carrying any of these are helper-internal logging.
const DEBUG_MARKERS: [&str; 3] = ["[Claude]:", "[Tool]:", "__"];

const STDERR_SURFACED: [&str; 2] = ["Error", "Failed"];

#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    /// A structured agent event, ready to forward.
    Message(AgentEvent),
    /// Plain progress text; the caller forwards it and scans it for the
    /// sandbox handshake.
    Progress(String),
    /// Structured output that failed to decode. Never surfaced.
    Malformed {
        source: &'static str,
        error: String,
    },
    Skipped,
}

#[derive(Debug, Deserialize)]
struct ToolUsePayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    input: Value,
}

/// Classifies one complete stdout line.
///
/// Sentinel markers are checked first, anywhere in the raw line and in
/// priority order (assistant message, tool use, tool result), so a frame
/// cannot carry a tool result past the filter. Structured frames come next.
/// Whatever remains is progress text, unless it is blank or helper-internal
/// debug output.
pub fn classify_stdout_line(line: &str) -> LineClass {
    if line.trim().is_empty() {
        return LineClass::Skipped;
    }

    if !SENTINEL_MARKERS.iter().any(|marker| line.contains(marker)) {
        match HelperFrame::parse_line(line) {
            FrameParse::Frame(frame) => return classify_frame(frame),
            FrameParse::Malformed(error) => {
                return LineClass::Malformed {
                    source: "helper_frame",
                    error,
                }
            }
            FrameParse::NotAFrame => {}
        }
    }

    if let Some(payload) = payload_after(line, CLAUDE_MESSAGE_MARKER) {
        return match serde_json::from_str::<Value>(payload) {
            Ok(message) => LineClass::Message(AgentEvent::TextMessage {
                content: message.get("content").cloned().unwrap_or(Value::Null),
            }),
            Err(err) => LineClass::Malformed {
                source: CLAUDE_MESSAGE_MARKER,
                error: err.to_string(),
            },
        };
    }

    if let Some(payload) = payload_after(line, TOOL_USE_MARKER) {
        return match serde_json::from_str::<ToolUsePayload>(payload) {
            Ok(tool_use) => LineClass::Message(AgentEvent::ToolInvocation {
                name: tool_use.name,
                input: tool_use.input,
            }),
            Err(err) => LineClass::Malformed {
                source: TOOL_USE_MARKER,
                error: err.to_string(),
            },
        };
    }

    if let Some(payload) = payload_after(line, TOOL_RESULT_MARKER) {
        let content = serde_json::from_str::<Value>(payload).unwrap_or(Value::Null);
        return LineClass::Message(AgentEvent::ToolResult { content });
    }

    progress_text(line)
}

fn progress_text(text: &str) -> LineClass {
    let output = text.trim();
    if output.is_empty() || DEBUG_MARKERS.iter().any(|marker| output.contains(marker)) {
        return LineClass::Skipped;
    }
    LineClass::Progress(output.to_string())
}

/// Returns an `error` event for stderr lines worth showing to the client.
pub fn classify_stderr_line(line: &str) -> Option<AgentEvent> {
    let output = line.trim();
    if output.is_empty() {
        return None;
    }
    if STDERR_SURFACED.iter().any(|needle| output.contains(needle)) {
        return Some(AgentEvent::error(output));
    }
    None
}

fn classify_frame(frame: HelperFrame) -> LineClass {
    match frame {
        HelperFrame::AssistantMessage { content } => {
            LineClass::Message(AgentEvent::TextMessage { content })
        }
        HelperFrame::ToolUse { name, input } => {
            LineClass::Message(AgentEvent::ToolInvocation { name, input })
        }
        HelperFrame::ToolResult { content } => {
            LineClass::Message(AgentEvent::ToolResult { content })
        }
        HelperFrame::Progress { message } => progress_text(&message),
        // Handshake frames are folded back into the progress text the
        // handshake scanner understands, so both channels validate alike.
        HelperFrame::SandboxCreated { sandbox_id } => {
            if is_sandbox_id(&sandbox_id) {
                LineClass::Progress(format!("Sandbox created: {sandbox_id}"))
            } else {
                LineClass::Malformed {
                    source: "sandbox_created",
                    error: format!("invalid sandbox id {sandbox_id:?}"),
                }
            }
        }
        HelperFrame::PreviewReady { preview_url, .. } => {
            if is_preview_url(&preview_url) {
                LineClass::Progress(format!("Preview URL: {preview_url}"))
            } else {
                LineClass::Malformed {
                    source: "preview_ready",
                    error: format!("invalid preview url {preview_url:?}"),
                }
            }
        }
        HelperFrame::Error { message } => LineClass::Message(AgentEvent::error(message)),
    }
}

fn is_sandbox_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c == '-' || c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn is_preview_url(value: &str) -> bool {
    value.len() > "https://".len()
        && value.starts_with("https://")
        && !value.chars().any(char::is_whitespace)
}

fn payload_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker)
        .map(|start| line[start + marker.len()..].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_sentinel_forwards_content() {
        let class = classify_stdout_line(
            r#"[Claude]: __CLAUDE_MESSAGE__ {"type":"assistant","content":"Creating the layout"}"#,
        );
        assert_eq!(
            class,
            LineClass::Message(AgentEvent::TextMessage {
                content: json!("Creating the layout")
            })
        );
    }

    #[test]
    fn tool_use_sentinel_forwards_name_and_input() {
        let class = classify_stdout_line(
            r#"__TOOL_USE__{"name":"Write","input":{"file_path":"app/page.tsx"}}"#,
        );
        assert_eq!(
            class,
            LineClass::Message(AgentEvent::ToolInvocation {
                name: "Write".to_string(),
                input: json!({"file_path": "app/page.tsx"}),
            })
        );
    }

    #[test]
    fn assistant_marker_takes_priority_over_tool_markers() {
        let class = classify_stdout_line(r#"__CLAUDE_MESSAGE__ {"content":"see __TOOL_USE__"}"#);
        assert!(matches!(
            class,
            LineClass::Message(AgentEvent::TextMessage { .. })
        ));
    }

    #[test]
    fn tool_result_sentinel_is_internal_only() {
        let class = classify_stdout_line(r#"__TOOL_RESULT__ {"content":"ok"}"#);
        match class {
            LineClass::Message(event) => assert!(!event.is_client_visible()),
            other => panic!("unexpected class: {other:?}"),
        }
        let garbage = classify_stdout_line("__TOOL_RESULT__ not json at all");
        match garbage {
            LineClass::Message(event) => assert!(!event.is_client_visible()),
            other => panic!("unexpected class: {other:?}"),
        }
    }

    #[test]
    fn malformed_sentinel_json_is_reported_not_emitted() {
        assert!(matches!(
            classify_stdout_line("__CLAUDE_MESSAGE__ {broken"),
            LineClass::Malformed {
                source: CLAUDE_MESSAGE_MARKER,
                ..
            }
        ));
        assert!(matches!(
            classify_stdout_line("__TOOL_USE__ [1, 2"),
            LineClass::Malformed {
                source: TOOL_USE_MARKER,
                ..
            }
        ));
    }

    #[test]
    fn debug_lines_and_blank_lines_are_skipped() {
        assert_eq!(classify_stdout_line("   "), LineClass::Skipped);
        assert_eq!(classify_stdout_line("[Tool]: Bash"), LineClass::Skipped);
        assert_eq!(
            classify_stdout_line("internal __marker__ line"),
            LineClass::Skipped
        );
    }

    #[test]
    fn plain_lines_become_trimmed_progress() {
        assert_eq!(
            classify_stdout_line("  Installing dependencies...\r"),
            LineClass::Progress("Installing dependencies...".to_string())
        );
    }

    #[test]
    fn handshake_frames_fold_into_progress_text() {
        assert_eq!(
            classify_stdout_line(r#"{"kind":"sandbox_created","sandbox_id":"abc-123"}"#),
            LineClass::Progress("Sandbox created: abc-123".to_string())
        );
        assert_eq!(
            classify_stdout_line(
                r#"{"kind":"preview_ready","preview_url":"https://3000-x.example.com"}"#
            ),
            LineClass::Progress("Preview URL: https://3000-x.example.com".to_string())
        );
    }

    #[test]
    fn progress_frames_pass_the_same_filters_as_text() {
        let hidden = classify_stdout_line(
            r#"{"kind":"progress","message":"__TOOL_RESULT__ {\"content\":\"secret\"}"}"#,
        );
        match hidden {
            LineClass::Message(event) => assert!(!event.is_client_visible()),
            other => panic!("unexpected class: {other:?}"),
        }
        assert_eq!(
            classify_stdout_line(r#"{"kind":"progress","message":"[Claude]: debug"}"#),
            LineClass::Skipped
        );
        assert_eq!(
            classify_stdout_line(r#"{"kind":"progress","message":"[Tool]: Bash"}"#),
            LineClass::Skipped
        );
        assert_eq!(
            classify_stdout_line(r#"{"kind":"progress","message":"  "}"#),
            LineClass::Skipped
        );
    }

    #[test]
    fn structured_frames_keep_double_underscores_in_payloads() {
        assert_eq!(
            classify_stdout_line(
                r#"{"kind":"tool_use","name":"Write","input":{"file_path":"pkg/__init__.py"}}"#
            ),
            LineClass::Message(AgentEvent::ToolInvocation {
                name: "Write".to_string(),
                input: json!({"file_path": "pkg/__init__.py"}),
            })
        );
    }

    #[test]
    fn invalid_handshake_frames_are_rejected() {
        for line in [
            r#"{"kind":"preview_ready","preview_url":"https://3000-x.example.com/a b"}"#,
            r#"{"kind":"preview_ready","preview_url":"http://3000-x.example.com"}"#,
            r#"{"kind":"sandbox_created","sandbox_id":"abc 123"}"#,
            r#"{"kind":"sandbox_created","sandbox_id":""}"#,
        ] {
            assert!(
                matches!(classify_stdout_line(line), LineClass::Malformed { .. }),
                "{line}"
            );
        }
    }

    #[test]
    fn json_with_unknown_kind_is_plain_progress() {
        let line = r#"{"kind":"telemetry","step":3}"#;
        assert_eq!(
            classify_stdout_line(line),
            LineClass::Progress(line.to_string())
        );
    }

    #[test]
    fn stderr_only_surfaces_errors_and_failures() {
        assert_eq!(
            classify_stderr_line("Error: sandbox quota exceeded\n"),
            Some(AgentEvent::error("Error: sandbox quota exceeded"))
        );
        assert_eq!(
            classify_stderr_line("Failed to start dev server"),
            Some(AgentEvent::error("Failed to start dev server"))
        );
        assert_eq!(classify_stderr_line("npm WARN deprecated glob@7"), None);
        assert_eq!(classify_stderr_line("error: lowercase is noise"), None);
    }
}
