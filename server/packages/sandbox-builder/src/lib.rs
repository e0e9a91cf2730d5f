//! Prompt-to-preview web builder: HTTP server, sandbox helper and CLI.

pub mod cli;
pub mod config;
pub mod helper;
pub mod remote;
pub mod router;
