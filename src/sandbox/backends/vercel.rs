use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::FutureExt;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::types::VercelConfig;
use crate::error::{Result, SandpitError};
use crate::sandbox::traits::{
    BackendCapabilities, CommandOutput, CommandRequest, CreateSandboxRequest, FileEntry,
    OutputChannel, SandboxBackend, SandboxHandle,
};

const TEAM_ID_ENV: &str = "VERCEL_TEAM_ID";
const PROJECT_ID_ENV: &str = "VERCEL_PROJECT_ID";
const TOKEN_ENV: &str = "VERCEL_TOKEN";
const OIDC_TOKEN_ENV: &str = "VERCEL_OIDC_TOKEN";

/// Timeout for a single HTTP request that does not wait on a command.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials for the Vercel Sandbox API.
#[derive(Clone, PartialEq, Eq)]
pub enum VercelCredentials {
    /// Access token scoped to a team and project
    Team {
        team_id: String,
        project_id: String,
        token: String,
    },
    /// Ambient OIDC token of a Vercel deployment
    Oidc { token: String },
}

impl VercelCredentials {
    /// Pick credentials from the environment.
    ///
    /// The full team/project/token triple wins over the OIDC token.
    pub fn from_env<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let (Some(team_id), Some(project_id), Some(token)) = (
            non_empty(TEAM_ID_ENV),
            non_empty(PROJECT_ID_ENV),
            non_empty(TOKEN_ENV),
        ) {
            return Some(Self::Team {
                team_id,
                project_id,
                token,
            });
        }

        non_empty(OIDC_TOKEN_ENV).map(|token| Self::Oidc { token })
    }

    fn token(&self) -> &str {
        match self {
            Self::Team { token, .. } | Self::Oidc { token } => token,
        }
    }

    fn team_id(&self) -> Option<&str> {
        match self {
            Self::Team { team_id, .. } => Some(team_id),
            Self::Oidc { .. } => None,
        }
    }

    fn project_id(&self) -> Option<&str> {
        match self {
            Self::Team { project_id, .. } => Some(project_id),
            Self::Oidc { .. } => None,
        }
    }

    /// Short label for logs; never the token itself.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Team { .. } => "team",
            Self::Oidc { .. } => "oidc",
        }
    }
}

impl std::fmt::Debug for VercelCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VercelCredentials")
            .field("kind", &self.kind())
            .field("team_id", &self.team_id())
            .finish_non_exhaustive()
    }
}

/// Thin REST client shared by the backend and its sandboxes.
struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: VercelCredentials,
}

impl ApiClient {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(self.credentials.token());
        if let Some(team_id) = self.credentials.team_id() {
            request = request.query(&[("teamId", team_id)]);
        }
        request
    }

    /// Turn non-2xx responses into `Backend` errors carrying status and body.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SandpitError::Backend {
            message: format!("Status code {} is not ok: {}", status.as_u16(), body.trim()),
            status: Some(status.as_u16()),
        })
    }

    async fn command_logs(&self, sandbox_id: &str, cmd_id: &str) -> Result<Vec<LogLine>> {
        let response = self
            .request(
                Method::GET,
                &format!("/v1/sandboxes/{}/cmd/{}/logs", sandbox_id, cmd_id),
            )
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;
        Ok(parse_logs(&body))
    }
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    sandbox: SandboxMeta,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct SandboxMeta {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Route {
    port: u16,
    subdomain: String,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    command: CommandMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandMeta {
    id: String,
    #[serde(default)]
    exit_code: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct LogLine {
    stream: String,
    #[serde(default)]
    data: String,
}

/// Parse an NDJSON log stream, skipping lines that do not decode.
fn parse_logs(body: &str) -> Vec<LogLine> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

fn collect_stream(lines: &[LogLine], stream: &str) -> String {
    lines
        .iter()
        .filter(|line| line.stream == stream)
        .map(|line| line.data.as_str())
        .collect()
}

/// Pack files into a gzipped tarball. Paths become relative to `/`.
fn pack_files(files: &[FileEntry]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for file in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(file.content.len() as u64);
        header.set_mode(0o644);
        builder.append_data(
            &mut header,
            file.path.trim_start_matches('/'),
            file.content.as_slice(),
        )?;
    }
    let mut encoder = builder.into_inner()?;
    encoder.flush()?;
    Ok(encoder.finish()?)
}

/// Vercel Sandbox backend.
///
/// Talks to the Vercel REST API. Command output is fetched lazily from the
/// command log stream, so `deferred_output` is set.
pub struct VercelBackend {
    client: Option<Arc<ApiClient>>,
    vcpus: u8,
    workdir: String,
}

impl VercelBackend {
    /// Create the backend. Missing credentials are reported when a sandbox
    /// is created, not here.
    pub fn new(
        config: &VercelConfig,
        credentials: Option<VercelCredentials>,
        workdir: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sandpit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let client = credentials.map(|credentials| {
            debug!(credentials = credentials.kind(), "Vercel credentials resolved");
            Arc::new(ApiClient {
                http,
                base_url: config.api_url.clone(),
                credentials,
            })
        });

        Ok(Self {
            client,
            vcpus: config.vcpus,
            workdir: workdir.into(),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl SandboxBackend for VercelBackend {
    fn name(&self) -> &str {
        "vercel"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            bulk_writes: true,
            deferred_output: true,
        }
    }

    async fn create(&self, request: &CreateSandboxRequest) -> Result<Box<dyn SandboxHandle>> {
        let client = self.client.clone().ok_or_else(|| {
            SandpitError::Provisioning(format!(
                "Vercel credentials not found. Set {}, {} and {}, or {}",
                TOKEN_ENV, TEAM_ID_ENV, PROJECT_ID_ENV, OIDC_TOKEN_ENV
            ))
        })?;

        let mut body = json!({
            "runtime": request.runtime,
            "ports": request.ports,
            "timeout": request.timeout.as_millis() as u64,
            "resources": { "vcpus": self.vcpus },
        });
        if let Some(project_id) = client.credentials.project_id() {
            body["projectId"] = json!(project_id);
        }

        info!(runtime = %request.runtime, ports = ?request.ports, "Requesting Vercel sandbox");
        let response = client
            .request(Method::POST, "/v1/sandboxes")
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        let created: CreateResponse = ApiClient::check(response).await?.json().await?;

        info!(sandbox_id = %created.sandbox.id, "Vercel sandbox created");
        Ok(Box::new(VercelSandbox {
            client,
            id: created.sandbox.id,
            routes: created.routes,
            workdir: self.workdir.clone(),
        }))
    }
}

/// A sandbox provisioned through the Vercel API.
struct VercelSandbox {
    client: Arc<ApiClient>,
    id: String,
    routes: Vec<Route>,
    workdir: String,
}

impl VercelSandbox {
    /// Stdout and stderr channels backed by one shared fetch of the command log.
    fn deferred_output(&self, cmd_id: &str) -> (OutputChannel, OutputChannel) {
        let client = self.client.clone();
        let sandbox_id = self.id.clone();
        let cmd_id = cmd_id.to_string();
        let logs = async move {
            client
                .command_logs(&sandbox_id, &cmd_id)
                .await
                .map(Arc::new)
                .map_err(|e| e.to_string())
        }
        .boxed()
        .shared();

        let channel = |stream: &'static str| {
            let logs = logs.clone();
            OutputChannel::Deferred(Box::pin(async move {
                let lines = logs
                    .await
                    .map_err(|message| SandpitError::Backend { message, status: None })?;
                Ok::<_, SandpitError>(collect_stream(&lines, stream))
            }))
        };
        (channel("stdout"), channel("stderr"))
    }
}

#[async_trait]
impl SandboxHandle for VercelSandbox {
    fn sandbox_id(&self) -> &str {
        &self.id
    }

    fn workdir(&self) -> &str {
        &self.workdir
    }

    fn domain(&self, port: u16) -> Result<String> {
        self.routes
            .iter()
            .find(|route| route.port == port)
            .map(|route| format!("https://{}.vercel.run", route.subdomain))
            .ok_or_else(|| SandpitError::Backend {
                message: format!("No route exposed for port {}", port),
                status: None,
            })
    }

    async fn run_command(&self, request: CommandRequest) -> Result<CommandOutput> {
        let body = json!({
            "command": request.cmd,
            "args": request.args,
            "cwd": request.cwd,
            "env": request.env,
        });

        let response = self
            .client
            .request(Method::POST, &format!("/v1/sandboxes/{}/cmd", self.id))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        let started: CommandResponse = ApiClient::check(response).await?.json().await?;
        let cmd_id = started.command.id;
        debug!(sandbox_id = %self.id, cmd_id = %cmd_id, "Command started");

        // Waiting is bounded by the caller's deadline.
        let response = self
            .client
            .request(
                Method::GET,
                &format!("/v1/sandboxes/{}/cmd/{}", self.id, cmd_id),
            )
            .query(&[("wait", "true")])
            .send()
            .await?;
        let finished: CommandResponse = ApiClient::check(response).await?.json().await?;

        let (stdout, stderr) = self.deferred_output(&cmd_id);
        Ok(CommandOutput {
            exit_code: finished.command.exit_code,
            stdout,
            stderr,
        })
    }

    async fn write_files(&self, files: Vec<FileEntry>) -> Result<()> {
        let count = files.len();
        let archive = pack_files(&files)?;

        let response = self
            .client
            .request(Method::POST, &format!("/v1/sandboxes/{}/fs/write", self.id))
            .timeout(REQUEST_TIMEOUT)
            .header("content-type", "application/gzip")
            .header("x-cwd", "/")
            .body(archive)
            .send()
            .await?;
        ApiClient::check(response).await?;

        debug!(sandbox_id = %self.id, files = count, "Files uploaded");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let response = self
            .client
            .request(Method::POST, &format!("/v1/sandboxes/{}/stop", self.id))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        ApiClient::check(response).await?;
        info!(sandbox_id = %self.id, "Vercel sandbox stopped");
        Ok(())
    }
}
