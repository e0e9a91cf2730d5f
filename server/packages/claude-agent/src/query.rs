use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::message::StreamMessage;
use crate::options::AgentOptions;

const STDERR_TAIL_LINES: usize = 20;
const QUERY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent `{command}`: {error}")]
    Spawn {
        command: String,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to capture agent stdout")]
    MissingStdout,
    #[error("failed to capture agent stderr")]
    MissingStderr,
    #[error("failed reading agent output: {0}")]
    Read(std::io::Error),
    #[error("agent exited with code {code:?}")]
    ProcessExited { code: Option<i32>, stderr: String },
    #[error("agent query aborted")]
    Aborted,
}

/// Runs Claude Code for one prompt per call.
#[derive(Debug, Clone)]
pub struct ClaudeQuery {
    options: AgentOptions,
    api_key: String,
}

impl ClaudeQuery {
    pub fn new(options: AgentOptions, api_key: impl Into<String>) -> Self {
        Self {
            options,
            api_key: api_key.into(),
        }
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn command(&self, prompt: &str) -> Command {
        let mut command = Command::new(&self.options.program);
        command
            .args(self.options.cli_args(prompt))
            .env("ANTHROPIC_API_KEY", &self.api_key)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.options.working_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Spawns the agent and returns its messages as they arrive.
    ///
    /// Each item is one stream-json message, unmodified. A failed run ends
    /// the stream with an `Err`.
    pub fn start(&self, prompt: &str) -> Result<QueryStream, AgentError> {
        let started = Instant::now();
        let command_line = format!("{} -p <prompt>", self.options.program.display());
        let mut child = self.command(prompt).spawn().map_err(|error| {
            tracing::error!(command = %command_line, error = %error, "failed to spawn agent");
            AgentError::Spawn {
                command: command_line.clone(),
                error,
            }
        })?;

        tracing::info!(
            pid = child.id().unwrap_or(0),
            max_turns = self.options.max_turns,
            "agent process spawned"
        );

        let stdout = child.stdout.take().ok_or(AgentError::MissingStdout)?;
        let stderr = child.stderr.take().ok_or(AgentError::MissingStderr)?;

        let (sender, receiver) = mpsc::channel(QUERY_CHANNEL_CAPACITY);
        let (abort_tx, abort_rx) = watch::channel(false);
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        let stderr_task = spawn_stderr_loop(stderr, stderr_tail.clone());
        tokio::spawn(drive_query(
            child,
            stdout,
            sender,
            abort_rx,
            StderrTail {
                lines: stderr_tail,
                task: stderr_task,
            },
            started,
        ));

        Ok(QueryStream {
            inner: ReceiverStream::new(receiver),
            abort: AbortHandle {
                sender: Arc::new(abort_tx),
            },
        })
    }
}

/// Stops a running query. Cloneable so it can outlive the stream borrow.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.sender.borrow()
    }
}

pub struct QueryStream {
    inner: ReceiverStream<Result<Value, AgentError>>,
    abort: AbortHandle,
}

impl QueryStream {
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

impl Stream for QueryStream {
    type Item = Result<Value, AgentError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

async fn drive_query(
    mut child: Child,
    stdout: ChildStdout,
    sender: mpsc::Sender<Result<Value, AgentError>>,
    mut abort: watch::Receiver<bool>,
    stderr_tail: StderrTail,
    started: Instant,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut message_count: u64 = 0;

    loop {
        tokio::select! {
            changed = abort.changed() => {
                if changed.is_err() || *abort.borrow() {
                    tracing::info!(messages = message_count, "agent query aborted; killing process");
                    let _ = child.kill().await;
                    let _ = sender.send(Err(AgentError::Aborted)).await;
                    return;
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let value = match serde_json::from_str::<Value>(trimmed) {
                            Ok(value) => value,
                            Err(err) => {
                                tracing::warn!(error = %err, "agent stdout: skipping non-JSON line");
                                continue;
                            }
                        };
                        message_count += 1;
                        log_message(message_count, &value);
                        if sender.send(Ok(value)).await.is_err() {
                            tracing::info!(messages = message_count, "agent consumer dropped; killing process");
                            let _ = child.kill().await;
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = child.kill().await;
                        let _ = sender.send(Err(AgentError::Read(err))).await;
                        return;
                    }
                }
            }
        }
    }

    let status = child.wait().await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match status {
        Ok(status) if status.success() => {
            tracing::info!(messages = message_count, elapsed_ms, "agent query complete");
        }
        Ok(status) => {
            let stderr = stderr_tail.collect().await;
            tracing::error!(code = status.code(), elapsed_ms, "agent exited with failure");
            let _ = sender
                .send(Err(AgentError::ProcessExited {
                    code: status.code(),
                    stderr,
                }))
                .await;
        }
        Err(err) => {
            let _ = sender.send(Err(AgentError::Read(err))).await;
        }
    }
}

fn log_message(count: u64, value: &Value) {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("<none>");
    tracing::debug!(message = count, kind = kind, "agent message");
    match StreamMessage::from_value(value) {
        Some(message @ StreamMessage::Assistant { .. }) => {
            for block in message.blocks() {
                if let crate::message::ContentBlock::ToolUse { name, .. } = block {
                    tracing::info!(tool = %name, "agent tool use");
                }
            }
        }
        Some(StreamMessage::Result { subtype, .. }) => {
            tracing::info!(subtype = subtype.as_deref().unwrap_or("<none>"), "agent result");
        }
        _ => {}
    }
}

struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    task: JoinHandle<()>,
}

impl StderrTail {
    /// Waits for stderr to close, then joins the retained lines.
    async fn collect(self) -> String {
        let _ = self.task.await;
        let guard = self.lines.lock().await;
        guard.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

fn spawn_stderr_loop(stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::warn!("agent stderr: {}", line);
            let mut guard = tail.lock().await;
            guard.push_back(line);
            while guard.len() > STDERR_TAIL_LINES {
                guard.pop_front();
            }
        }
    })
}
