//! Commands run inside a Daytona sandbox, shared by the helper process and
//! the `sandbox` utilities.

use std::time::Duration;

use sandbox_builder_claude_agent::shell_quote;
use sandbox_builder_daytona::{DaytonaClient, DaytonaError, ExecuteRequest, ExecuteResponse};
use thiserror::Error;

pub const PROJECT_NAME: &str = "website-project";
pub const DEV_SERVER_PORT: u16 = 3000;

const OUTPUT_TAIL_CHARS: usize = 400;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Daytona(#[from] DaytonaError),
    #[error("{step} failed with exit code {exit_code}: {output}")]
    CommandFailed {
        step: &'static str,
        exit_code: i32,
        output: String,
    },
    #[error("Project directory {0} not found in sandbox")]
    ProjectMissing(String),
}

/// Runs a command and turns a non-zero exit into an error.
pub async fn run_checked(
    client: &DaytonaClient,
    sandbox_id: &str,
    step: &'static str,
    request: ExecuteRequest,
) -> Result<ExecuteResponse, RemoteError> {
    tracing::info!(sandbox_id, step, command = %request.command, "running sandbox command");
    let output = client.execute_command(sandbox_id, &request).await?;
    if !output.success() {
        return Err(RemoteError::CommandFailed {
            step,
            exit_code: output.exit_code,
            output: output_tail(&output.result),
        });
    }
    Ok(output)
}

pub async fn ensure_project_exists(
    client: &DaytonaClient,
    sandbox_id: &str,
    root_dir: &str,
    project: &str,
) -> Result<(), RemoteError> {
    let check = client
        .execute_command(
            sandbox_id,
            &ExecuteRequest::new(format!(
                "test -d {} && echo exists || echo missing",
                shell_quote(project)
            ))
            .cwd(root_dir),
        )
        .await?;
    if check.result.trim() != "exists" {
        return Err(RemoteError::ProjectMissing(project.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevServerStatus {
    Running,
    /// The probe did not get a 200; the server may still be compiling.
    NotReady,
}

/// Stops any previous dev server, starts `npm run dev` in the background,
/// waits `warmup`, and probes it over HTTP from inside the sandbox.
pub async fn start_dev_server(
    client: &DaytonaClient,
    sandbox_id: &str,
    project_dir: &str,
    warmup: Duration,
) -> Result<DevServerStatus, RemoteError> {
    client
        .execute_command(
            sandbox_id,
            &ExecuteRequest::new("pkill -f 'npm run dev' || true").cwd(project_dir),
        )
        .await?;

    run_checked(
        client,
        sandbox_id,
        "starting dev server",
        ExecuteRequest::new("nohup npm run dev > dev-server.log 2>&1 &")
            .cwd(project_dir)
            .env("PORT", DEV_SERVER_PORT.to_string()),
    )
    .await?;

    tokio::time::sleep(warmup).await;
    probe_dev_server(client, sandbox_id, project_dir).await
}

pub async fn probe_dev_server(
    client: &DaytonaClient,
    sandbox_id: &str,
    project_dir: &str,
) -> Result<DevServerStatus, RemoteError> {
    let probe = client
        .execute_command(
            sandbox_id,
            &ExecuteRequest::new(format!(
                "curl -s -o /dev/null -w '%{{http_code}}' http://localhost:{DEV_SERVER_PORT} || echo 'failed'"
            ))
            .cwd(project_dir),
        )
        .await?;
    let code = probe.result.trim();
    tracing::info!(sandbox_id, http_code = code, "dev server probe");
    Ok(if code == "200" {
        DevServerStatus::Running
    } else {
        DevServerStatus::NotReady
    })
}

fn output_tail(output: &str) -> String {
    let trimmed = output.trim();
    let count = trimmed.chars().count();
    if count <= OUTPUT_TAIL_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - OUTPUT_TAIL_CHARS).collect()
}
