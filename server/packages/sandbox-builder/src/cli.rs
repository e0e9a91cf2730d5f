use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use sandbox_builder_claude_agent::{
    collect_generation, summarize_tool_uses, AgentError, ClaudeQuery,
};
use sandbox_builder_daytona::{DaytonaClient, DaytonaError};
use sandbox_builder_error::BuilderError;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, ConfigArgs, ConfigError};
use crate::helper::{self, FrameWriter, HelperError, HelperOptions};
use crate::remote::{self, DevServerStatus, RemoteError, DEV_SERVER_PORT, PROJECT_NAME};
use crate::router::{build_router_with_state, AppState};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEV_SERVER_WARMUP: Duration = Duration::from_secs(8);

#[derive(Parser, Debug)]
#[command(name = "sandbox-builder", bin_name = "sandbox-builder")]
#[command(about = "Generate websites from a prompt in Daytona sandboxes", version)]
#[command(arg_required_else_help = true)]
pub struct SandboxBuilderCli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server.
    Server(ServerArgs),
    /// Generate a site in a fresh sandbox, writing progress frames to stdout.
    GenerateInSandbox(GenerateInSandboxArgs),
    /// Run Claude Code locally for one prompt.
    Generate(GenerateArgs),
    /// Inspect and manage Daytona sandboxes.
    Sandbox(SandboxArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, short = 'H', default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long = "cors-allow-origin", short = 'O')]
    cors_allow_origin: Vec<String>,

    #[arg(long = "cors-allow-method", short = 'M')]
    cors_allow_method: Vec<String>,

    #[arg(long = "cors-allow-header", short = 'A')]
    cors_allow_header: Vec<String>,

    #[arg(long = "cors-allow-credentials", short = 'C')]
    cors_allow_credentials: bool,
}

#[derive(Args, Debug)]
pub struct GenerateInSandboxArgs {
    prompt: String,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    prompt: String,

    /// Wait for the run to finish and print a summary of tool uses.
    #[arg(long)]
    collect: bool,
}

#[derive(Args, Debug)]
pub struct SandboxArgs {
    #[command(subcommand)]
    command: SandboxCommand,
}

#[derive(Subcommand, Debug)]
pub enum SandboxCommand {
    /// List sandboxes.
    List,
    /// Remove a sandbox.
    Remove { sandbox_id: String },
    /// Print the preview URL for a port of a sandbox.
    PreviewUrl {
        sandbox_id: String,
        #[arg(long, default_value_t = DEV_SERVER_PORT)]
        port: u16,
    },
    /// Restart the dev server of a generated project.
    StartDevServer {
        sandbox_id: String,
        #[arg(long, default_value = PROJECT_NAME)]
        project: String,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid cors origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("invalid cors method: {0}")]
    InvalidCorsMethod(String),
    #[error("invalid cors header: {0}")]
    InvalidCorsHeader(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error(transparent)]
    Daytona(#[from] DaytonaError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("generation failed: {0}")]
    Generation(String),
    // Already reported on stderr in the format the relay watches for.
    #[error("sandbox generation did not complete")]
    Helper(#[source] HelperError),
}

pub fn run_sandbox_builder() -> Result<(), CliError> {
    // Populate the environment before clap reads `env = ...` defaults.
    let _ = dotenvy::dotenv();
    let cli = SandboxBuilderCli::parse();
    if let Err(err) = init_logging() {
        eprintln!("failed to init logging: {err}");
        return Err(err);
    }
    let config = AppConfig::from_args(&cli.config)?;
    run_command(&cli.command, config)
}

pub fn init_logging() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .init();
    Ok(())
}

pub fn run_command(command: &Command, config: AppConfig) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Server(err.to_string()))?;

    match command {
        Command::Server(args) => runtime.block_on(run_server(config, args)),
        Command::GenerateInSandbox(args) => {
            runtime.block_on(run_generate_in_sandbox(&config, &args.prompt))
        }
        Command::Generate(args) => runtime.block_on(run_generate(&config, args)),
        Command::Sandbox(args) => runtime.block_on(run_sandbox(&config, &args.command)),
    }
}

async fn run_server(config: AppConfig, server: &ServerArgs) -> Result<(), CliError> {
    if config.anthropic_api_key.is_none() {
        tracing::warn!("ANTHROPIC_API_KEY is not set; generation requests will be rejected");
    }
    if config.daytona.is_none() {
        tracing::warn!("DAYTONA_API_KEY is not set; sandbox generation requests will be rejected");
    }

    let state = Arc::new(AppState::new(config));
    let (mut router, _state) = build_router_with_state(state);
    if !server.cors_allow_origin.is_empty() {
        router = router.layer(build_cors_layer(server)?);
    }

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|err| CliError::Server(err.to_string()))
}

async fn run_generate_in_sandbox(config: &AppConfig, prompt: &str) -> Result<(), CliError> {
    let mut frames = FrameWriter::new(std::io::stdout());
    match helper::generate_in_sandbox(config, prompt, &HelperOptions::default(), &mut frames).await
    {
        Ok(link) => {
            tracing::info!(preview_url = %link.url, "sandbox generation complete");
            Ok(())
        }
        Err(err) => {
            write_stderr_line(&format!("Failed to generate: {err}"))?;
            Err(CliError::Helper(err))
        }
    }
}

async fn run_generate(config: &AppConfig, args: &GenerateArgs) -> Result<(), CliError> {
    let query = ClaudeQuery::new(config.agent.clone(), config.require_agent_key()?);

    if args.collect {
        let result = collect_generation(&query, &args.prompt).await;
        if !result.success {
            return Err(CliError::Generation(
                result.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        let tool_uses = summarize_tool_uses(&result.messages);
        write_stdout_line(&format!(
            "Generation completed: {} messages",
            result.messages.len()
        ))?;
        write_stdout_line(&format!("Tool uses: {}", tool_uses.len()))?;
        for tool_use in tool_uses {
            match tool_use.target {
                Some(target) => write_stdout_line(&format!("- {} {}", tool_use.name, target))?,
                None => write_stdout_line(&format!("- {}", tool_use.name))?,
            }
        }
        return Ok(());
    }

    let mut messages = query.start(&args.prompt)?;
    while let Some(item) = messages.next().await {
        write_stdout_line(&item?.to_string())?;
    }
    Ok(())
}

async fn run_sandbox(config: &AppConfig, command: &SandboxCommand) -> Result<(), CliError> {
    let client = DaytonaClient::new(config.require_daytona()?)?;
    match command {
        SandboxCommand::List => {
            let sandboxes = client.list_sandboxes().await?;
            write_stdout_line(&serde_json::to_string_pretty(&sandboxes)?)?;
        }
        SandboxCommand::Remove { sandbox_id } => {
            client.remove_sandbox(sandbox_id).await?;
            write_stdout_line(&format!("Removed sandbox {sandbox_id}"))?;
        }
        SandboxCommand::PreviewUrl { sandbox_id, port } => {
            let sandbox = client.find_sandbox(sandbox_id).await?;
            let link = client.preview_link(&sandbox.id, *port).await?;
            write_stdout_line(&format!("Preview URL: {}", link.url))?;
            if let Some(token) = link.token {
                write_stdout_line(&format!("Access Token: {token}"))?;
            }
        }
        SandboxCommand::StartDevServer {
            sandbox_id,
            project,
        } => {
            let sandbox = client.find_sandbox(sandbox_id).await?;
            let root_dir = client.project_dir(&sandbox.id).await?;
            remote::ensure_project_exists(&client, &sandbox.id, &root_dir, project).await?;
            let project_dir = format!("{}/{}", root_dir.trim_end_matches('/'), project);

            let status =
                remote::start_dev_server(&client, &sandbox.id, &project_dir, DEV_SERVER_WARMUP)
                    .await?;
            match status {
                DevServerStatus::Running => {
                    let link = client.preview_link(&sandbox.id, DEV_SERVER_PORT).await?;
                    write_stdout_line("Server is running")?;
                    write_stdout_line(&format!("Preview URL: {}", link.url))?;
                    if let Some(token) = link.token {
                        write_stdout_line(&format!("Access Token: {token}"))?;
                    }
                }
                DevServerStatus::NotReady => {
                    write_stdout_line("Server might still be starting.")?;
                    write_stdout_line(&format!("Check the log at {project}/dev-server.log"))?;
                }
            }
        }
    }
    Ok(())
}

fn build_cors_layer(server: &ServerArgs) -> Result<CorsLayer, CliError> {
    let mut cors = CorsLayer::new();

    let mut origins = Vec::new();
    for origin in &server.cors_allow_origin {
        let value = origin
            .parse()
            .map_err(|_| CliError::InvalidCorsOrigin(origin.clone()))?;
        origins.push(value);
    }
    cors = cors.allow_origin(origins);

    if server.cors_allow_method.is_empty() {
        cors = cors.allow_methods(Any);
    } else {
        let mut methods = Vec::new();
        for method in &server.cors_allow_method {
            let parsed = method
                .parse()
                .map_err(|_| CliError::InvalidCorsMethod(method.clone()))?;
            methods.push(parsed);
        }
        cors = cors.allow_methods(methods);
    }

    if server.cors_allow_header.is_empty() {
        cors = cors.allow_headers(Any);
    } else {
        let mut headers = Vec::new();
        for header in &server.cors_allow_header {
            let parsed = header
                .parse()
                .map_err(|_| CliError::InvalidCorsHeader(header.clone()))?;
            headers.push(parsed);
        }
        cors = cors.allow_headers(headers);
    }

    if server.cors_allow_credentials {
        cors = cors.allow_credentials(true);
    }

    Ok(cors)
}

fn write_stdout_line(text: &str) -> Result<(), CliError> {
    let mut out = std::io::stdout();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn write_stderr_line(text: &str) -> Result<(), CliError> {
    let mut out = std::io::stderr();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
