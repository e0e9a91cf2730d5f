mod client;
mod types;

pub use client::{DaytonaClient, DaytonaConfig, DaytonaError, DEFAULT_API_URL};
pub use types::{
    CreateSandboxRequest, ExecuteRequest, ExecuteResponse, PreviewLink, ProjectDir, Sandbox,
    SandboxState,
};
