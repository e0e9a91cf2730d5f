use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

use crate::types::{
    CreateSandboxRequest, ExecuteRequest, ExecuteResponse, PreviewLink, ProjectDir, Sandbox,
    SandboxState,
};

pub const DEFAULT_API_URL: &str = "https://app.daytona.io/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
// Added on top of the remote command timeout so the server reports the
// timeout before the HTTP request gives up.
const EXECUTE_TIMEOUT_SLACK: Duration = Duration::from_secs(30);
const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(600);
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Error)]
pub enum DaytonaError {
    #[error("invalid Daytona API url `{url}`: {error}")]
    InvalidUrl {
        url: String,
        #[source]
        error: url::ParseError,
    },
    #[error("Daytona request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Daytona API returned {status} for {path}: {body}")]
    Status {
        status: StatusCode,
        path: String,
        body: String,
    },
    #[error("Sandbox {id} not found")]
    NotFound { id: String },
    #[error("sandbox {id} entered state {state:?}")]
    SandboxFailed { id: String, state: SandboxState },
    #[error("sandbox {id} did not start within {waited_secs}s")]
    StartTimeout { id: String, waited_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaytonaConfig {
    pub api_key: String,
    pub api_url: Url,
}

impl DaytonaConfig {
    pub fn new(api_key: impl Into<String>, api_url: Option<&str>) -> Result<Self, DaytonaError> {
        let raw = api_url.unwrap_or(DEFAULT_API_URL);
        let api_url = Url::parse(raw).map_err(|error| DaytonaError::InvalidUrl {
            url: raw.to_string(),
            error,
        })?;
        Ok(Self {
            api_key: api_key.into(),
            api_url,
        })
    }
}

/// Thin client over the Daytona sandbox and toolbox endpoints.
#[derive(Debug, Clone)]
pub struct DaytonaClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl DaytonaClient {
    pub fn new(config: &DaytonaConfig) -> Result<Self, DaytonaError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.api_key)
    }

    pub async fn create_sandbox(
        &self,
        request: &CreateSandboxRequest,
    ) -> Result<Sandbox, DaytonaError> {
        let response = self
            .request(Method::POST, "/sandbox")
            .timeout(REQUEST_TIMEOUT)
            .json(request)
            .send()
            .await?;
        let sandbox: Sandbox = read_json(response, "/sandbox").await?;
        tracing::info!(sandbox_id = %sandbox.id, public = sandbox.public, "sandbox created");
        Ok(sandbox)
    }

    pub async fn get_sandbox(&self, id: &str) -> Result<Sandbox, DaytonaError> {
        let path = format!("/sandbox/{id}");
        let response = self
            .request(Method::GET, &path)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DaytonaError::NotFound { id: id.to_string() });
        }
        read_json(response, &path).await
    }

    pub async fn list_sandboxes(&self) -> Result<Vec<Sandbox>, DaytonaError> {
        let response = self
            .request(Method::GET, "/sandbox")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        read_json(response, "/sandbox").await
    }

    /// Lists sandboxes and picks the one with `id`.
    pub async fn find_sandbox(&self, id: &str) -> Result<Sandbox, DaytonaError> {
        self.list_sandboxes()
            .await?
            .into_iter()
            .find(|sandbox| sandbox.id == id)
            .ok_or_else(|| DaytonaError::NotFound { id: id.to_string() })
    }

    pub async fn remove_sandbox(&self, id: &str) -> Result<(), DaytonaError> {
        let path = format!("/sandbox/{id}");
        let response = self
            .request(Method::DELETE, &path)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DaytonaError::NotFound { id: id.to_string() });
        }
        ensure_success(response, &path).await?;
        tracing::info!(sandbox_id = %id, "sandbox removed");
        Ok(())
    }

    /// Polls the sandbox until it reports `started`.
    pub async fn wait_until_started(
        &self,
        id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Sandbox, DaytonaError> {
        let deadline = Instant::now() + timeout;
        loop {
            let sandbox = self.get_sandbox(id).await?;
            match sandbox.state {
                Some(SandboxState::Started) => return Ok(sandbox),
                Some(state) if state.is_failed() => {
                    return Err(DaytonaError::SandboxFailed {
                        id: id.to_string(),
                        state,
                    })
                }
                state => {
                    tracing::debug!(sandbox_id = %id, state = ?state, "waiting for sandbox");
                }
            }
            if Instant::now() + poll_interval > deadline {
                return Err(DaytonaError::StartTimeout {
                    id: id.to_string(),
                    waited_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn preview_link(&self, id: &str, port: u16) -> Result<PreviewLink, DaytonaError> {
        let path = format!("/sandbox/{id}/ports/{port}/preview-url");
        let response = self
            .request(Method::GET, &path)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DaytonaError::NotFound { id: id.to_string() });
        }
        read_json(response, &path).await
    }

    /// Working directory of the sandbox user.
    pub async fn project_dir(&self, id: &str) -> Result<String, DaytonaError> {
        let path = format!("/toolbox/{id}/toolbox/project-dir");
        let response = self
            .request(Method::GET, &path)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let dir: ProjectDir = read_json(response, &path).await?;
        Ok(dir.dir)
    }

    /// Runs a shell command in the sandbox and waits for it to finish.
    ///
    /// A non-zero exit code is returned as data, not as an error.
    pub async fn execute_command(
        &self,
        id: &str,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse, DaytonaError> {
        let path = format!("/toolbox/{id}/toolbox/process/execute");
        let remote_timeout = request
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXECUTE_TIMEOUT);
        let started = Instant::now();
        let response = self
            .request(Method::POST, &path)
            .timeout(remote_timeout + EXECUTE_TIMEOUT_SLACK)
            .json(request)
            .send()
            .await?;
        let output: ExecuteResponse = read_json(response, &path).await?;
        tracing::debug!(
            sandbox_id = %id,
            exit_code = output.exit_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sandbox command finished"
        );
        Ok(output)
    }
}

async fn ensure_success(response: Response, path: &str) -> Result<Response, DaytonaError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    tracing::warn!(status = %status, path, "Daytona API error");
    Err(DaytonaError::Status {
        status,
        path: path.to_string(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, DaytonaError> {
    let response = ensure_success(response, path).await?;
    Ok(response.json::<T>().await?)
}
