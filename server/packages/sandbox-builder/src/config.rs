use std::path::PathBuf;

use clap::Args;
use sandbox_builder_claude_agent::{AgentOptions, DEFAULT_ALLOWED_TOOLS, DEFAULT_MAX_TURNS};
use sandbox_builder_daytona::{DaytonaConfig, DaytonaError};
use sandbox_builder_error::BuilderError;
use sandbox_builder_stream_relay::HelperLaunch;
use thiserror::Error;

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const DAYTONA_API_KEY_ENV: &str = "DAYTONA_API_KEY";
pub const DAYTONA_API_URL_ENV: &str = "DAYTONA_API_URL";
pub const HELPER_SUBCOMMAND: &str = "generate-in-sandbox";

/// Settings shared by every subcommand. Flags win over environment
/// variables; `.env` is loaded before parsing.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(long, env = ANTHROPIC_API_KEY_ENV, hide_env_values = true, global = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = DAYTONA_API_KEY_ENV, hide_env_values = true, global = true)]
    pub daytona_api_key: Option<String>,

    #[arg(long, env = DAYTONA_API_URL_ENV, global = true)]
    pub daytona_api_url: Option<String>,

    /// Claude Code executable used for local generation.
    #[arg(long, env = "CLAUDE_CODE_BIN", default_value = "claude", global = true)]
    pub claude_bin: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_TURNS, global = true)]
    pub max_turns: u32,

    /// Tool the agent may use. Repeat to allow several; defaults to the
    /// standard file, shell and web tools.
    #[arg(long = "allowed-tool", global = true)]
    pub allowed_tools: Vec<String>,

    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Working directory for local generation.
    #[arg(long, global = true)]
    pub workdir: Option<PathBuf>,

    /// Executable spawned per sandbox generation. Defaults to this binary.
    #[arg(long, env = "SANDBOX_BUILDER_HELPER", global = true)]
    pub helper_bin: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to resolve current executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error(transparent)]
    Daytona(#[from] DaytonaError),
}

/// Everything a request needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub anthropic_api_key: Option<String>,
    pub daytona: Option<DaytonaConfig>,
    pub agent: AgentOptions,
    pub helper: HelperLaunch,
}

impl AppConfig {
    pub fn from_args(args: &ConfigArgs) -> Result<Self, ConfigError> {
        let allowed_tools = if args.allowed_tools.is_empty() {
            DEFAULT_ALLOWED_TOOLS
                .iter()
                .map(|tool| tool.to_string())
                .collect()
        } else {
            args.allowed_tools.clone()
        };
        let agent = AgentOptions {
            program: args.claude_bin.clone(),
            max_turns: args.max_turns,
            allowed_tools,
            working_dir: args.workdir.clone(),
            model: args.model.clone(),
        };

        let daytona = match non_empty(&args.daytona_api_key) {
            Some(key) => Some(DaytonaConfig::new(key, args.daytona_api_url.as_deref())?),
            None => None,
        };

        let program = match &args.helper_bin {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(ConfigError::CurrentExe)?,
        };

        Ok(Self {
            anthropic_api_key: non_empty(&args.anthropic_api_key).map(str::to_string),
            daytona,
            helper: default_helper(program, &agent),
            agent,
        })
    }

    pub fn require_agent_key(&self) -> Result<&str, BuilderError> {
        self.anthropic_api_key
            .as_deref()
            .ok_or_else(|| BuilderError::MissingApiKeys {
                missing: vec![ANTHROPIC_API_KEY_ENV],
            })
    }

    pub fn require_daytona(&self) -> Result<&DaytonaConfig, BuilderError> {
        self.daytona
            .as_ref()
            .ok_or_else(|| BuilderError::MissingApiKeys {
                missing: vec![DAYTONA_API_KEY_ENV],
            })
    }

    /// Both keys the sandbox flow needs, reporting every missing one.
    pub fn require_sandbox_keys(&self) -> Result<(&str, &DaytonaConfig), BuilderError> {
        match (self.anthropic_api_key.as_deref(), self.daytona.as_ref()) {
            (Some(key), Some(daytona)) => Ok((key, daytona)),
            (key, daytona) => {
                let mut missing = Vec::new();
                if daytona.is_none() {
                    missing.push(DAYTONA_API_KEY_ENV);
                }
                if key.is_none() {
                    missing.push(ANTHROPIC_API_KEY_ENV);
                }
                Err(BuilderError::MissingApiKeys { missing })
            }
        }
    }

    /// The helper launch with this deployment's secrets passed explicitly.
    pub fn helper_launch(&self) -> Result<HelperLaunch, BuilderError> {
        let (anthropic_key, daytona) = self.require_sandbox_keys()?;
        Ok(self
            .helper
            .clone()
            .env(ANTHROPIC_API_KEY_ENV, anthropic_key)
            .env(DAYTONA_API_KEY_ENV, daytona.api_key.as_str())
            .env(DAYTONA_API_URL_ENV, daytona.api_url.as_str()))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn default_helper(program: PathBuf, agent: &AgentOptions) -> HelperLaunch {
    let mut launch = HelperLaunch::new(program)
        .arg(HELPER_SUBCOMMAND)
        .arg("--max-turns")
        .arg(agent.max_turns.to_string());
    for tool in &agent.allowed_tools {
        launch = launch.arg("--allowed-tool").arg(tool.clone());
    }
    if let Some(model) = &agent.model {
        launch = launch.arg("--model").arg(model.clone());
    }
    // The prompt is appended after this, so it is never read as a flag.
    launch.arg("--")
}
