use std::path::PathBuf;

pub const DEFAULT_MAX_TURNS: u32 = 10;

pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &[
    "Read",
    "Write",
    "Edit",
    "MultiEdit",
    "Bash",
    "LS",
    "Glob",
    "Grep",
    "WebSearch",
    "WebFetch",
];

/// Fixed per-deployment agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    pub program: PathBuf,
    pub max_turns: u32,
    pub allowed_tools: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub model: Option<String>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("claude"),
            max_turns: DEFAULT_MAX_TURNS,
            allowed_tools: DEFAULT_ALLOWED_TOOLS
                .iter()
                .map(|tool| tool.to_string())
                .collect(),
            working_dir: None,
            model: None,
        }
    }
}

impl AgentOptions {
    /// Arguments for a single non-interactive stream-json run.
    pub fn cli_args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--max-turns".to_string(),
            self.max_turns.to_string(),
        ];
        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }

    /// The same invocation rendered as a POSIX shell command line, for
    /// running the agent on a remote machine.
    pub fn shell_command(&self, prompt: &str) -> String {
        let mut parts = vec![shell_quote(self.program.to_string_lossy().as_ref())];
        parts.extend(self.cli_args(prompt).iter().map(|arg| shell_quote(arg)));
        parts.join(" ")
    }
}

/// Wraps `value` in single quotes for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
