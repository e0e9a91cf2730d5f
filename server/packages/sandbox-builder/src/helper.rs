//! The sandbox generation helper: the process the relay spawns per request.
//!
//! It provisions a Daytona sandbox, runs Claude Code inside it, starts the
//! generated site's dev server and reports everything on stdout as
//! [`HelperFrame`] lines. Logs go to stderr.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use sandbox_builder_claude_agent::{AgentOptions, ContentBlock, StreamMessage};
use sandbox_builder_daytona::{
    CreateSandboxRequest, DaytonaClient, DaytonaError, ExecuteRequest, PreviewLink,
};
use sandbox_builder_error::BuilderError;
use sandbox_builder_stream_relay::HelperFrame;
use serde_json::Value;
use thiserror::Error;

use crate::config::{AppConfig, ANTHROPIC_API_KEY_ENV};
use crate::remote::{self, DevServerStatus, RemoteError, DEV_SERVER_PORT, PROJECT_NAME};

const CLAUDE_CODE_PACKAGE: &str = "@anthropic-ai/claude-code";

#[derive(Debug, Error)]
pub enum HelperError {
    #[error(transparent)]
    Config(#[from] BuilderError),
    #[error(transparent)]
    Daytona(#[from] DaytonaError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("could not write to stdout: {0}")]
    Io(#[from] std::io::Error),
    #[error("Claude Code run ended with an error: {0}")]
    AgentFailed(String),
}

#[derive(Debug, Clone)]
pub struct HelperOptions {
    pub start_timeout: Duration,
    pub poll_interval: Duration,
    pub dev_server_warmup: Duration,
    pub install_timeout_secs: u64,
    pub agent_timeout_secs: u64,
}

impl Default for HelperOptions {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            dev_server_warmup: Duration::from_secs(8),
            install_timeout_secs: 600,
            agent_timeout_secs: 1800,
        }
    }
}

/// Writes one frame per line and flushes so the relay sees it immediately.
pub struct FrameWriter<W: Write> {
    out: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn emit(&mut self, frame: &HelperFrame) -> std::io::Result<()> {
        self.out.write_all(frame.to_line().as_bytes())?;
        self.out.flush()
    }

    pub fn progress(&mut self, message: impl Into<String>) -> std::io::Result<()> {
        self.emit(&HelperFrame::Progress {
            message: message.into(),
        })
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Frames recovered from a finished Claude Code stream-json transcript.
#[derive(Debug, Default, PartialEq)]
pub struct AgentTranscript {
    pub frames: Vec<HelperFrame>,
    pub failure: Option<String>,
    pub num_turns: Option<u32>,
}

impl AgentTranscript {
    pub fn from_stream_json(output: &str) -> Self {
        let mut transcript = Self::default();
        for line in output.lines().filter(|line| !line.trim().is_empty()) {
            let Some(message) = StreamMessage::parse_line(line) else {
                tracing::debug!(line, "skipping non stream-json agent output");
                continue;
            };
            match &message {
                StreamMessage::Assistant { .. } => {
                    if let Some(text) = message.assistant_text() {
                        transcript.frames.push(HelperFrame::AssistantMessage {
                            content: Value::String(text),
                        });
                    }
                    for block in message.blocks() {
                        if let ContentBlock::ToolUse { name, input, .. } = block {
                            transcript.frames.push(HelperFrame::ToolUse {
                                name: name.clone(),
                                input: input.clone(),
                            });
                        }
                    }
                }
                StreamMessage::User { .. } => {
                    for block in message.blocks() {
                        if let ContentBlock::ToolResult { content, .. } = block {
                            transcript.frames.push(HelperFrame::ToolResult {
                                content: content.clone(),
                            });
                        }
                    }
                }
                StreamMessage::Result {
                    is_error,
                    result,
                    subtype,
                    num_turns,
                    ..
                } => {
                    transcript.num_turns = *num_turns;
                    if *is_error {
                        transcript.failure = Some(
                            result
                                .clone()
                                .or_else(|| subtype.clone())
                                .unwrap_or_else(|| "unknown error".to_string()),
                        );
                    }
                }
                StreamMessage::System { .. } | StreamMessage::Unknown => {}
            }
        }
        transcript
    }
}

/// Runs the whole sandbox flow and returns the preview link it reported.
pub async fn generate_in_sandbox<W: Write>(
    config: &AppConfig,
    prompt: &str,
    options: &HelperOptions,
    frames: &mut FrameWriter<W>,
) -> Result<PreviewLink, HelperError> {
    let (anthropic_key, daytona) = config.require_sandbox_keys()?;
    let client = DaytonaClient::new(daytona)?;

    frames.progress("Creating Daytona sandbox...")?;
    let sandbox = client
        .create_sandbox(&CreateSandboxRequest {
            public: true,
            ..CreateSandboxRequest::default()
        })
        .await?;
    let sandbox_id = sandbox.id;
    frames.emit(&HelperFrame::SandboxCreated {
        sandbox_id: sandbox_id.clone(),
    })?;

    client
        .wait_until_started(&sandbox_id, options.start_timeout, options.poll_interval)
        .await?;
    let root_dir = client.project_dir(&sandbox_id).await?;
    let project_dir = format!("{}/{}", root_dir.trim_end_matches('/'), PROJECT_NAME);
    tracing::info!(sandbox_id = %sandbox_id, project_dir = %project_dir, "sandbox ready");

    remote::run_checked(
        &client,
        &sandbox_id,
        "creating project directory",
        ExecuteRequest::new(format!("mkdir -p {PROJECT_NAME}")).cwd(root_dir.as_str()),
    )
    .await?;

    frames.progress("Installing Claude Code in the sandbox...")?;
    remote::run_checked(
        &client,
        &sandbox_id,
        "installing Claude Code",
        ExecuteRequest::new(format!("npm install -g {CLAUDE_CODE_PACKAGE}"))
            .cwd(root_dir.as_str())
            .timeout_secs(options.install_timeout_secs),
    )
    .await?;

    frames.progress("Running Claude Code...")?;
    let remote_agent = AgentOptions {
        program: PathBuf::from("claude"),
        working_dir: None,
        ..config.agent.clone()
    };
    let output = client
        .execute_command(
            &sandbox_id,
            &ExecuteRequest::new(remote_agent.shell_command(prompt))
                .cwd(project_dir.as_str())
                .timeout_secs(options.agent_timeout_secs)
                .env(ANTHROPIC_API_KEY_ENV, anthropic_key),
        )
        .await?;
    let transcript = AgentTranscript::from_stream_json(&output.result);
    for frame in &transcript.frames {
        frames.emit(frame)?;
    }
    if let Some(failure) = transcript.failure {
        return Err(HelperError::AgentFailed(failure));
    }
    if !output.success() {
        return Err(RemoteError::CommandFailed {
            step: "running Claude Code",
            exit_code: output.exit_code,
            output: String::new(),
        }
        .into());
    }
    tracing::info!(
        sandbox_id = %sandbox_id,
        turns = transcript.num_turns.unwrap_or(0),
        frames = transcript.frames.len(),
        "agent run finished"
    );

    frames.progress("Installing dependencies...")?;
    remote::run_checked(
        &client,
        &sandbox_id,
        "npm install",
        ExecuteRequest::new("npm install")
            .cwd(project_dir.as_str())
            .timeout_secs(options.install_timeout_secs),
    )
    .await?;

    frames.progress("Starting development server...")?;
    let status =
        remote::start_dev_server(&client, &sandbox_id, &project_dir, options.dev_server_warmup)
            .await?;
    if status == DevServerStatus::NotReady {
        frames.progress("Server might still be starting...")?;
    }

    let link = client.preview_link(&sandbox_id, DEV_SERVER_PORT).await?;
    frames.emit(&HelperFrame::PreviewReady {
        preview_url: link.url.clone(),
        token: link.token.clone(),
    })?;
    Ok(link)
}
