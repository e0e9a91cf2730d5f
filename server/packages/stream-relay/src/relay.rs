use std::time::Instant;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::classify::{classify_stderr_line, classify_stdout_line, LineClass};
use crate::event::AgentEvent;
use crate::handshake::SandboxHandshakeState;
use crate::launch::HelperLaunch;
use crate::line_buffer::LineBuffer;

const READ_CHUNK_SIZE: usize = 8 * 1024;
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed reading helper {stream}: {error}")]
    Read {
        stream: &'static str,
        #[source]
        error: std::io::Error,
    },
}

/// How the helper process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTermination {
    /// The process exited; `code` is `None` when it was killed by a signal.
    Exited { code: Option<i32> },
    /// The process could not be spawned, read, or awaited.
    Failed { message: String },
}

/// Per-request relay state: line buffers for both pipes plus the sandbox
/// handshake. Nothing here is shared between requests.
#[derive(Debug, Default)]
pub struct Relay {
    stdout: LineBuffer,
    stderr: LineBuffer,
    handshake: SandboxHandshakeState,
    stdout_lines: u64,
    stderr_lines: u64,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stdout(&mut self, chunk: &[u8]) -> Vec<AgentEvent> {
        let lines = self.stdout.push(chunk);
        lines
            .iter()
            .filter_map(|line| self.stdout_line(line))
            .collect()
    }

    pub fn push_stderr(&mut self, chunk: &[u8]) -> Vec<AgentEvent> {
        let lines = self.stderr.push(chunk);
        lines
            .iter()
            .filter_map(|line| self.stderr_line(line))
            .collect()
    }

    /// Processes whatever unterminated tails remain once both pipes closed.
    pub fn flush(&mut self) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        if let Some(line) = self.stdout.finish() {
            events.extend(self.stdout_line(&line));
        }
        if let Some(line) = self.stderr.finish() {
            events.extend(self.stderr_line(&line));
        }
        events
    }

    pub fn handshake(&self) -> &SandboxHandshakeState {
        &self.handshake
    }

    /// Produces the closing events. Consuming `self` freezes the handshake.
    pub fn finish(self, termination: RelayTermination) -> Vec<AgentEvent> {
        let outcome = match termination {
            RelayTermination::Exited { code: Some(0) } => {
                match self.handshake.preview_url() {
                    Some(preview_url) => AgentEvent::Complete {
                        sandbox_id: self.handshake.sandbox_id().map(str::to_string),
                        preview_url: preview_url.to_string(),
                    },
                    None => AgentEvent::error("Failed to get preview URL"),
                }
            }
            RelayTermination::Exited { code: Some(code) } => {
                AgentEvent::error(format!("Process exited with code {code}"))
            }
            RelayTermination::Exited { code: None } => {
                AgentEvent::error("Process terminated by signal")
            }
            RelayTermination::Failed { message } => AgentEvent::error(message),
        };
        vec![outcome, AgentEvent::Done]
    }

    fn stdout_line(&mut self, line: &str) -> Option<AgentEvent> {
        self.stdout_lines += 1;
        match classify_stdout_line(line) {
            LineClass::Message(event) => Some(event),
            LineClass::Progress(message) => {
                let update = self.handshake.observe(&message);
                if update.sandbox_id {
                    tracing::info!(
                        sandbox_id = self.handshake.sandbox_id().unwrap_or_default(),
                        "relay: sandbox id captured"
                    );
                }
                if update.preview_url {
                    tracing::info!(
                        preview_url = self.handshake.preview_url().unwrap_or_default(),
                        "relay: preview url captured"
                    );
                }
                Some(AgentEvent::progress(message))
            }
            LineClass::Malformed { source, error } => {
                tracing::debug!(
                    source = source,
                    error = %error,
                    line_number = self.stdout_lines,
                    "relay: dropping malformed structured line"
                );
                None
            }
            LineClass::Skipped => None,
        }
    }

    fn stderr_line(&mut self, line: &str) -> Option<AgentEvent> {
        self.stderr_lines += 1;
        if !line.trim().is_empty() {
            tracing::warn!(line_number = self.stderr_lines, "helper stderr: {}", line.trim_end());
        }
        classify_stderr_line(line)
    }
}

/// Forwards client-visible events to the response channel.
///
/// Once the client has gone away the sink keeps accepting events and drops
/// them, so the helper's pipes are still drained to completion.
#[derive(Debug)]
pub struct EventSink {
    sender: mpsc::Sender<AgentEvent>,
    closed: bool,
}

impl EventSink {
    pub fn new(sender: mpsc::Sender<AgentEvent>) -> Self {
        Self {
            sender,
            closed: false,
        }
    }

    pub async fn send(&mut self, event: AgentEvent) {
        if !event.is_client_visible() {
            tracing::trace!(kind = event.kind(), "relay: suppressing internal event");
            return;
        }
        if self.closed {
            return;
        }
        if self.sender.send(event).await.is_err() {
            self.closed = true;
            tracing::info!("relay: client disconnected, draining helper output");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Sequentially consumes both pipes until each reaches EOF, forwarding
/// events as lines complete.
pub async fn relay_streams<O, E>(
    mut stdout: O,
    mut stderr: E,
    relay: &mut Relay,
    sink: &mut EventSink,
) -> Result<(), RelayError>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut stdout_buf = vec![0u8; READ_CHUNK_SIZE];
    let mut stderr_buf = vec![0u8; READ_CHUNK_SIZE];
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            read = stdout.read(&mut stdout_buf), if stdout_open => {
                let read = read.map_err(|error| RelayError::Read { stream: "stdout", error })?;
                if read == 0 {
                    stdout_open = false;
                } else {
                    for event in relay.push_stdout(&stdout_buf[..read]) {
                        sink.send(event).await;
                    }
                }
            }
            read = stderr.read(&mut stderr_buf), if stderr_open => {
                let read = read.map_err(|error| RelayError::Read { stream: "stderr", error })?;
                if read == 0 {
                    stderr_open = false;
                } else {
                    for event in relay.push_stderr(&stderr_buf[..read]) {
                        sink.send(event).await;
                    }
                }
            }
        }
    }

    for event in relay.flush() {
        sink.send(event).await;
    }
    Ok(())
}

/// Spawns the helper for `prompt` and returns the stream of client-visible
/// events. The stream always ends with [`AgentEvent::Done`].
pub fn start_relay(launch: HelperLaunch, prompt: String) -> ReceiverStream<AgentEvent> {
    let (sender, receiver) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    tokio::spawn(run_helper(launch, prompt, sender));
    ReceiverStream::new(receiver)
}

async fn run_helper(launch: HelperLaunch, prompt: String, sender: mpsc::Sender<AgentEvent>) {
    let started = Instant::now();
    let mut sink = EventSink::new(sender);
    let mut relay = Relay::new();

    tracing::info!(command = %launch.display(), "spawning helper process");

    let termination = match launch.command(&prompt).spawn() {
        Ok(child) => drive_child(child, &mut relay, &mut sink).await,
        Err(err) => {
            tracing::error!(command = %launch.display(), error = %err, "failed to spawn helper process");
            RelayTermination::Failed {
                message: format!("failed to spawn helper `{}`: {err}", launch.display()),
            }
        }
    };

    tracing::info!(
        termination = ?termination,
        has_preview_url = relay.handshake().is_complete(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        client_connected = !sink.is_closed(),
        "helper process finished"
    );

    for event in relay.finish(termination) {
        sink.send(event).await;
    }
    // Dropping the sink closes the response stream.
}

async fn drive_child(
    mut child: Child,
    relay: &mut Relay,
    sink: &mut EventSink,
) -> RelayTermination {
    tracing::info!(pid = child.id().unwrap_or(0), "helper process spawned");

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill().await;
        return RelayTermination::Failed {
            message: "helper process pipes were not available".to_string(),
        };
    };

    if let Err(err) = relay_streams(stdout, stderr, relay, sink).await {
        tracing::error!(error = %err, "relay read failed; killing helper");
        let _ = child.kill().await;
        return RelayTermination::Failed {
            message: err.to_string(),
        };
    }

    match child.wait().await {
        Ok(status) => RelayTermination::Exited {
            code: status.code(),
        },
        Err(err) => RelayTermination::Failed {
            message: format!("failed to wait for helper process: {err}"),
        },
    }
}
