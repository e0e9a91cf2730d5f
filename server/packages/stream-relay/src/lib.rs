//! Converts a helper process's mixed stdout/stderr into client-facing events.
//!
//! The relay reads raw bytes in arbitrary chunks, reassembles whole lines,
//! classifies each line (structured helper frame, legacy sentinel payload, or
//! plain progress text) and forwards the result as [`AgentEvent`]s. Plain
//! progress lines are also scanned for the sandbox handshake, which decides
//! whether the run ends in `complete` or `error`.

pub mod classify;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod launch;
pub mod line_buffer;
pub mod relay;
pub mod sse;

pub use classify::{classify_stderr_line, classify_stdout_line, LineClass};
pub use event::AgentEvent;
pub use frame::{FrameParse, HelperFrame};
pub use handshake::SandboxHandshakeState;
pub use launch::HelperLaunch;
pub use line_buffer::LineBuffer;
pub use relay::{relay_streams, start_relay, Relay, RelayError, RelayTermination};
pub use sse::{done_frame, event_stream_to_sse, json_frame, to_sse_event};
