//! Request handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SandpitError;
use crate::sandbox::{CommandResult, DevServerStatus, Readiness, SandboxProvider};
use crate::server::error::{ApiError, ApiResult};
use crate::server::state::AppState;

/// Map a provider error, dropping the provider from the registry on expiry.
fn provider_error(state: &AppState, provider: &Arc<dyn SandboxProvider>, e: SandpitError) -> ApiError {
    if matches!(e, SandpitError::SandboxExpired { .. }) && state.manager.clear_if_same(provider) {
        warn!(provider = %provider.name(), "Sandbox expired, cleared active provider");
    }
    e.into()
}

fn active_provider(state: &AppState) -> ApiResult<Arc<dyn SandboxProvider>> {
    state.manager.active().ok_or(ApiError::NoActiveSandbox)
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Sandbox lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSandboxResponse {
    pub success: bool,
    pub sandbox_id: String,
    pub url: String,
    pub provider: String,
    /// Readiness of the dev server; absent when no project was set up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_server_ready: Option<bool>,
    pub message: String,
}

pub async fn create_sandbox(State(state): State<AppState>) -> ApiResult<Json<CreateSandboxResponse>> {
    let creating = state.lock_create().await;
    let provider = state.provider_for_create()?;
    let info = provider
        .create_sandbox()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let replaced = state.manager.set_active(provider.clone());
    drop(creating);

    if let Some(replaced) = replaced.filter(|old| !Arc::ptr_eq(old, &provider)) {
        info!(provider = %replaced.name(), "Stopping replaced sandbox provider");
        if let Err(e) = replaced.terminate().await {
            warn!(error = %e, "Failed to stop replaced sandbox");
        }
    }

    let dev_server_ready =
        if state.config.dev_server.scaffold_on_create && provider.capabilities().dev_server {
            match provider.setup_project().await {
                Ok(readiness) => Some(readiness.is_ready()),
                Err(e) => {
                    warn!(sandbox_id = %info.sandbox_id, error = %e, "Project setup failed");
                    Some(false)
                }
            }
        } else {
            None
        };

    let message = match dev_server_ready {
        Some(false) => "Sandbox created, but the dev server is not confirmed ready",
        _ => "Sandbox created",
    };

    info!(sandbox_id = %info.sandbox_id, url = %info.url, "Sandbox ready for requests");
    Ok(Json(CreateSandboxResponse {
        success: true,
        sandbox_id: info.sandbox_id,
        url: info.url,
        provider: info.provider,
        dev_server_ready,
        message: message.to_string(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

pub async fn terminate_sandbox(State(state): State<AppState>) -> ApiResult<Json<MessageResponse>> {
    let Some(provider) = state.manager.clear() else {
        return Ok(Json(MessageResponse {
            success: true,
            message: "No active sandbox".to_string(),
        }));
    };

    provider.terminate().await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Sandbox terminated".to_string(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RunCommandRequest {
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    pub message: String,
}

impl From<CommandResult> for CommandResponse {
    fn from(result: CommandResult) -> Self {
        let message = if result.success() {
            "Command executed successfully"
        } else {
            "Command failed"
        };
        Self {
            success: result.success(),
            output: result.stdout().to_string(),
            error: result.stderr().to_string(),
            exit_code: result.exit_code(),
            message: message.to_string(),
        }
    }
}

pub async fn run_command(
    State(state): State<AppState>,
    Json(request): Json<RunCommandRequest>,
) -> ApiResult<Json<CommandResponse>> {
    let command = request.command.trim();
    if command.is_empty() {
        return Err(ApiError::BadRequest("Command is required".to_string()));
    }

    let provider = active_provider(&state)?;
    info!(command = %command, "Executing");
    let result = provider
        .run_command(command)
        .await
        .map_err(|e| provider_error(&state, &provider, e))?;
    Ok(Json(result.into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSandboxInfo {
    pub sandbox_id: String,
    pub url: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub files_tracked: Vec<String>,
    pub last_health_check: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxStatusResponse {
    pub success: bool,
    pub active: bool,
    pub healthy: bool,
    #[serde(default)]
    pub sandbox_info: Option<StatusSandboxInfo>,
    pub message: String,
}

pub async fn sandbox_status(State(state): State<AppState>) -> Json<SandboxStatusResponse> {
    let Some(provider) = state.manager.active() else {
        return Json(SandboxStatusResponse {
            success: true,
            active: false,
            healthy: false,
            sandbox_info: None,
            message: "No active sandbox".to_string(),
        });
    };

    let healthy = provider.health_check().await;
    let sandbox_info = provider.sandbox_info().map(|info| StatusSandboxInfo {
        sandbox_id: info.sandbox_id,
        url: info.url,
        provider: info.provider,
        created_at: info.created_at,
        files_tracked: provider.tracked_files(),
        last_health_check: Utc::now(),
    });

    // A health check that hit an expired sandbox already dropped its state.
    if !healthy && !provider.is_alive() && state.manager.clear_if_same(&provider) {
        warn!(provider = %provider.name(), "Sandbox is gone, cleared active provider");
    }

    let message = if healthy {
        "Sandbox is active and healthy"
    } else {
        "Sandbox exists but is not responding - may need recreation"
    };

    Json(SandboxStatusResponse {
        success: true,
        active: healthy,
        healthy,
        sandbox_info,
        message: message.to_string(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerStatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: DevServerStatus,
}

pub async fn dev_server_status(
    State(state): State<AppState>,
) -> ApiResult<Json<DevServerStatusResponse>> {
    let provider = active_provider(&state)?;
    let status = provider
        .dev_server_status()
        .await
        .map_err(|e| provider_error(&state, &provider, e))?;
    Ok(Json(DevServerStatusResponse {
        success: true,
        status,
    }))
}

#[derive(Debug, Serialize)]
pub struct RestartResponse {
    pub success: bool,
    pub readiness: Readiness,
}

pub async fn restart_dev_server(State(state): State<AppState>) -> ApiResult<Json<RestartResponse>> {
    let provider = active_provider(&state)?;
    let readiness = provider
        .restart_dev_server()
        .await
        .map_err(|e| provider_error(&state, &provider, e))?;
    Ok(Json(RestartResponse {
        success: readiness.is_ready(),
        readiness,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Files and packages
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub success: bool,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

pub async fn write_file(
    State(state): State<AppState>,
    Json(request): Json<WriteFileRequest>,
) -> ApiResult<Json<FileResponse>> {
    if request.path.trim().is_empty() {
        return Err(ApiError::BadRequest("Path is required".to_string()));
    }
    let provider = active_provider(&state)?;
    provider
        .write_file(&request.path, &request.content)
        .await
        .map_err(|e| provider_error(&state, &provider, e))?;
    Ok(Json(FileResponse {
        success: true,
        path: request.path,
        content: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReadFileQuery {
    #[serde(default)]
    pub path: String,
}

pub async fn read_file(
    State(state): State<AppState>,
    Query(query): Query<ReadFileQuery>,
) -> ApiResult<Json<FileResponse>> {
    if query.path.trim().is_empty() {
        return Err(ApiError::BadRequest("Path is required".to_string()));
    }
    let provider = active_provider(&state)?;
    let content = provider
        .read_file(&query.path)
        .await
        .map_err(|e| provider_error(&state, &provider, e))?;
    Ok(Json(FileResponse {
        success: true,
        path: query.path,
        content: Some(content),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    pub directory: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub success: bool,
    pub files: Vec<String>,
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListFilesQuery>,
) -> ApiResult<Json<ListFilesResponse>> {
    let provider = active_provider(&state)?;
    let files = provider
        .list_files(query.directory.as_deref())
        .await
        .map_err(|e| provider_error(&state, &provider, e))?;
    Ok(Json(ListFilesResponse {
        success: true,
        files,
    }))
}

#[derive(Debug, Deserialize)]
pub struct InstallPackagesRequest {
    #[serde(default)]
    pub packages: Vec<String>,
}

pub async fn install_packages(
    State(state): State<AppState>,
    Json(request): Json<InstallPackagesRequest>,
) -> ApiResult<Json<CommandResponse>> {
    if request.packages.is_empty() {
        return Err(ApiError::BadRequest("Packages are required".to_string()));
    }
    let provider = active_provider(&state)?;
    let result = provider
        .install_packages(&request.packages)
        .await
        .map_err(|e| provider_error(&state, &provider, e))?;
    Ok(Json(result.into()))
}
