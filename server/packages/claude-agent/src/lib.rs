//! Claude Code invocation.
//!
//! The agent runs as the `claude` CLI in print mode with
//! `--output-format stream-json`; every stdout line is one JSON message.

pub mod collect;
pub mod message;
pub mod options;
pub mod query;

pub use collect::{collect_generation, summarize_tool_uses, GenerationResult, ToolUseSummary};
pub use message::{ContentBlock, MessageBody, MessageContent, StreamMessage};
pub use options::{shell_quote, AgentOptions, DEFAULT_ALLOWED_TOOLS, DEFAULT_MAX_TURNS};
pub use query::{AbortHandle, AgentError, ClaudeQuery, QueryStream};
