use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::types::SandpitConfig;
use crate::error::{Result, SandpitError};
use crate::sandbox::dev_server::{last_lines, DevServerProbe, DevServerScripts, DevServerStatus};
use crate::sandbox::readiness::{Readiness, ReadinessPoller, ReadinessProbe};
use crate::sandbox::scaffold::starter_files;
use crate::sandbox::shell::{
    list_files_script, parent_dir, resolve_path, tokenize, write_file_script,
};
use crate::sandbox::traits::{
    BackendCapabilities, CommandRequest, CreateSandboxRequest, FileEntry, ProviderCapabilities,
    SandboxBackend, SandboxHandle, SandboxProvider,
};
use crate::sandbox::{CommandResult, SandboxInfo, SandboxState};

/// Lines of the log dumped when the dev server fails to come up.
const FAILURE_LOG_LINES: usize = 50;

/// Provider settings taken from the configuration.
#[derive(Debug, Clone)]
struct ProviderSettings {
    runtime: String,
    idle_timeout: Duration,
    command_timeout: Duration,
    package_manager: String,
    extra_flags: Vec<String>,
    auto_restart: bool,
}

/// Mutable state. Never held across an await point.
struct ProviderState {
    lifecycle: SandboxState,
    handle: Option<Arc<dyn SandboxHandle>>,
    info: Option<SandboxInfo>,
    files: HashSet<String>,
    readiness: Option<Readiness>,
}

impl ProviderState {
    fn is_current(&self, handle: &Arc<dyn SandboxHandle>) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.sandbox_id() == handle.sandbox_id())
    }

    fn discard(&mut self, lifecycle: SandboxState) -> Option<Arc<dyn SandboxHandle>> {
        self.lifecycle = lifecycle;
        self.info = None;
        self.files.clear();
        self.readiness = None;
        self.handle.take()
    }
}

/// Provider owning one sandbox on any [`SandboxBackend`].
///
/// Expiry detection and local state invalidation happen here so every caller
/// benefits. Mutating operations are serialized by an internal lock; every
/// backend call is bounded by the configured command timeout.
pub struct RemoteProvider {
    backend: Arc<dyn SandboxBackend>,
    capabilities: BackendCapabilities,
    settings: ProviderSettings,
    scripts: DevServerScripts,
    poller: ReadinessPoller,
    state: Mutex<ProviderState>,
    op_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl RemoteProvider {
    pub fn new(backend: Arc<dyn SandboxBackend>, config: &SandpitConfig) -> Self {
        let capabilities = backend.capabilities();
        let settings = ProviderSettings {
            runtime: config.sandbox.runtime.clone(),
            idle_timeout: config.sandbox.idle_timeout(),
            command_timeout: config.sandbox.command_timeout(),
            package_manager: config.packages.manager.clone(),
            extra_flags: config
                .packages
                .extra_flags
                .split_whitespace()
                .map(String::from)
                .collect(),
            auto_restart: config.packages.auto_restart_dev_server,
        };

        Self {
            backend,
            capabilities,
            settings,
            scripts: DevServerScripts::new(config.dev_server.clone()),
            poller: ReadinessPoller::for_dev_server(&config.dev_server),
            state: Mutex::new(ProviderState {
                lifecycle: SandboxState::Absent,
                handle: None,
                info: None,
                files: HashSet::new(),
                readiness: None,
            }),
            op_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_handle(&self) -> Result<Arc<dyn SandboxHandle>> {
        let state = self.lock_state();
        match (state.lifecycle, &state.handle) {
            (SandboxState::Ready, Some(handle)) => Ok(handle.clone()),
            (SandboxState::Terminated, _) => Err(SandpitError::ProviderTerminated),
            _ => Err(SandpitError::NoActiveSandbox),
        }
    }

    /// Apply the per-operation deadline to a backend call.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.command_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SandpitError::SandboxTimeout {
                seconds: self.settings.command_timeout.as_secs(),
            }),
        }
    }

    /// Drop local state for a sandbox the backend reclaimed.
    fn expire(&self, handle: &Arc<dyn SandboxHandle>, cause: &SandpitError) -> SandpitError {
        let sandbox_id = handle.sandbox_id().to_string();
        let mut state = self.lock_state();
        if state.is_current(handle) {
            state.discard(SandboxState::Stopped);
            warn!(sandbox_id = %sandbox_id, error = %cause, "Sandbox has stopped, marking as inactive");
        }
        SandpitError::SandboxExpired { sandbox_id }
    }

    fn track(&self, handle: &Arc<dyn SandboxHandle>, path: &str) {
        let mut state = self.lock_state();
        if state.is_current(handle) {
            state.files.insert(path.to_string());
        }
    }

    fn record_readiness(&self, handle: &Arc<dyn SandboxHandle>, readiness: &Readiness) {
        let mut state = self.lock_state();
        if state.is_current(handle) {
            state.readiness = Some(readiness.clone());
        }
    }

    /// Run a request and normalize its output.
    ///
    /// Expiry errors invalidate local state and come back as `SandboxExpired`;
    /// other backend errors are returned unchanged.
    async fn exec(
        &self,
        handle: &Arc<dyn SandboxHandle>,
        request: CommandRequest,
    ) -> Result<CommandResult> {
        let output = match self.bounded(handle.run_command(request)).await {
            Ok(output) => output,
            Err(e) if e.indicates_expiry() => return Err(self.expire(handle, &e)),
            Err(e) => return Err(e),
        };

        let limit = self.settings.command_timeout;
        let stdout = tokio::time::timeout(limit, output.stdout.resolve())
            .await
            .unwrap_or_default();
        let stderr = tokio::time::timeout(limit, output.stderr.resolve())
            .await
            .unwrap_or_default();

        Ok(CommandResult::new(stdout, stderr, output.exit_code.unwrap_or(0)))
    }

    /// Run a shell script, propagating every error.
    async fn run_script(
        &self,
        handle: &Arc<dyn SandboxHandle>,
        script: String,
        cwd: &str,
    ) -> Result<CommandResult> {
        self.exec(handle, CommandRequest::shell(script).cwd(cwd)).await
    }

    /// Stdout of a diagnostic script; failures other than expiry become text.
    async fn capture(&self, handle: &Arc<dyn SandboxHandle>, script: String) -> Result<String> {
        match self.run_script(handle, script, handle.workdir()).await {
            Ok(result) => Ok(result.stdout().to_string()),
            Err(e @ SandpitError::SandboxExpired { .. }) => Err(e),
            Err(e) => Ok(format!("Error: {}", e)),
        }
    }

    async fn write_file_unlocked(&self, path: &str, content: &str) -> Result<()> {
        let handle = self.current_handle()?;
        let full_path = resolve_path(handle.workdir(), path);

        if self.capabilities.bulk_writes {
            let entry = FileEntry {
                path: full_path.clone(),
                content: content.as_bytes().to_vec(),
            };
            match self.bounded(handle.write_files(vec![entry])).await {
                Ok(()) => {
                    debug!(path = %full_path, size = content.len(), "File written");
                    self.track(&handle, path);
                    return Ok(());
                }
                Err(e) if e.indicates_expiry() => return Err(self.expire(&handle, &e)),
                Err(e) => {
                    warn!(path = %full_path, error = %e, "Bulk write failed, falling back to shell write");
                }
            }
        }

        if let Some(dir) = parent_dir(&full_path) {
            let mkdir = CommandRequest::new("mkdir", vec!["-p".to_string(), dir.to_string()]);
            match self.exec(&handle, mkdir).await {
                Ok(result) if !result.success() => {
                    debug!(dir = %dir, stderr = %result.stderr(), "mkdir failed");
                }
                Err(e @ SandpitError::SandboxExpired { .. }) => return Err(e),
                Err(e) => debug!(dir = %dir, error = %e, "mkdir failed"),
                Ok(_) => {}
            }
        }

        let write = CommandRequest::shell(write_file_script(&full_path, content)).cwd(handle.workdir());
        match self.exec(&handle, write).await {
            Ok(result) if result.success() => {
                debug!(path = %full_path, size = content.len(), "File written via shell");
                self.track(&handle, path);
                Ok(())
            }
            Ok(result) => Err(SandpitError::FileWrite {
                path: path.to_string(),
                message: result.stderr().to_string(),
            }),
            Err(e @ SandpitError::SandboxExpired { .. }) => Err(e),
            Err(e) => Err(SandpitError::FileWrite {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Kill, relaunch detached and wait for the dev server.
    async fn launch_dev_server(
        &self,
        handle: &Arc<dyn SandboxHandle>,
        restart: bool,
    ) -> Result<Readiness> {
        let workdir = handle.workdir().to_string();
        self.run_script(handle, self.scripts.kill(), "/").await?;

        if restart {
            tokio::time::sleep(self.scripts.config().restart_grace()).await;
        } else {
            self.run_script(handle, self.scripts.clear_log(), &workdir)
                .await?;
        }

        info!(
            sandbox_id = %handle.sandbox_id(),
            command = %self.scripts.config().command,
            restart,
            "Starting dev server"
        );
        self.run_script(handle, self.scripts.launch(), &workdir)
            .await?;

        self.await_dev_server(handle).await
    }

    async fn await_dev_server(&self, handle: &Arc<dyn SandboxHandle>) -> Result<Readiness> {
        let probe = DevServerProbe::new(handle.clone(), self.scripts.clone());
        let cancel = self.shutdown.child_token();
        let readiness = self.poller.wait(&probe, &cancel).await;
        self.record_readiness(handle, &readiness);

        if readiness.is_ready() {
            info!(sandbox_id = %handle.sandbox_id(), "Dev server is ready");
        } else {
            let log = self
                .capture(handle, format!("cat {}", self.scripts.config().log_path))
                .await?;
            error!(
                sandbox_id = %handle.sandbox_id(),
                outcome = ?readiness,
                log = %last_lines(&log, FAILURE_LOG_LINES),
                "Dev server did not start properly"
            );
        }
        Ok(readiness)
    }

    async fn install_dependencies(&self, handle: &Arc<dyn SandboxHandle>) -> Result<()> {
        let workdir = handle.workdir().to_string();
        let manager = self.settings.package_manager.clone();
        let install = CommandRequest::new(manager.clone(), vec!["install".to_string()]).cwd(&workdir);

        match self.exec(handle, install).await {
            Ok(result) if result.success() => {
                info!(sandbox_id = %handle.sandbox_id(), "Dependencies installed");
                return Ok(());
            }
            Ok(result) => {
                warn!(stderr = %result.stderr(), "Dependency install had issues");
                return Ok(());
            }
            Err(e @ SandpitError::SandboxExpired { .. }) => return Err(e),
            Err(e) => warn!(error = %e, "Dependency install errored, retrying through the shell"),
        }

        let script = format!("cd {} && {} install", workdir, manager);
        match self.run_script(handle, script, &workdir).await {
            Ok(result) if !result.success() => {
                warn!(stderr = %result.stderr(), "Shell dependency install also had issues");
            }
            Err(e @ SandpitError::SandboxExpired { .. }) => return Err(e),
            Err(e) => {
                warn!(error = %e, "Continuing without dependency install");
            }
            Ok(_) => info!(sandbox_id = %handle.sandbox_id(), "Dependencies installed"),
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxProvider for RemoteProvider {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            dev_server: true,
            active_health_check: true,
        }
    }

    async fn create_sandbox(&self) -> Result<SandboxInfo> {
        let _guard = self.op_lock.lock().await;

        let previous = {
            let mut state = self.lock_state();
            if state.lifecycle == SandboxState::Terminated {
                return Err(SandpitError::ProviderTerminated);
            }
            state.discard(SandboxState::Creating)
        };

        if let Some(previous) = previous {
            info!(sandbox_id = %previous.sandbox_id(), "Stopping existing sandbox");
            if let Err(e) = self.bounded(previous.stop()).await {
                error!(sandbox_id = %previous.sandbox_id(), error = %e, "Failed to stop existing sandbox");
            }
        }

        let port = self.scripts.config().port;
        let request = CreateSandboxRequest {
            timeout: self.settings.idle_timeout,
            ports: vec![port],
            runtime: self.settings.runtime.clone(),
        };

        info!(backend = %self.backend.name(), port, "Creating sandbox");
        let handle: Arc<dyn SandboxHandle> = match self.bounded(self.backend.create(&request)).await {
            Ok(handle) => Arc::from(handle),
            Err(e) => {
                self.lock_state().lifecycle = SandboxState::Absent;
                error!(backend = %self.backend.name(), error = %e, "Error creating sandbox");
                return Err(SandpitError::Provisioning(e.to_string()));
            }
        };

        let url = match handle.domain(port) {
            Ok(url) => url,
            Err(e) => {
                self.lock_state().lifecycle = SandboxState::Absent;
                let _ = self.bounded(handle.stop()).await;
                return Err(SandpitError::Provisioning(e.to_string()));
            }
        };

        let info = SandboxInfo {
            sandbox_id: handle.sandbox_id().to_string(),
            url,
            provider: self.backend.name().to_string(),
            created_at: Utc::now(),
        };

        let orphan = {
            let mut state = self.lock_state();
            if state.lifecycle == SandboxState::Creating {
                state.lifecycle = SandboxState::Ready;
                state.handle = Some(handle.clone());
                state.info = Some(info.clone());
                None
            } else {
                Some(handle)
            }
        };

        // Terminated while provisioning.
        if let Some(orphan) = orphan {
            let _ = self.bounded(orphan.stop()).await;
            return Err(SandpitError::ProviderTerminated);
        }

        info!(sandbox_id = %info.sandbox_id, url = %info.url, "Sandbox created");
        Ok(info)
    }

    async fn run_command(&self, command: &str) -> Result<CommandResult> {
        let _guard = self.op_lock.lock().await;
        let handle = self.current_handle()?;

        let tokens = tokenize(command);
        let Some((cmd, args)) = tokens.split_first() else {
            return Ok(CommandResult::new("", "Command is required", 1));
        };

        debug!(sandbox_id = %handle.sandbox_id(), command = %command, "Executing command");
        let request = CommandRequest::new(cmd.clone(), args.to_vec()).cwd(handle.workdir());

        match self.exec(&handle, request).await {
            Ok(result) => {
                debug!(
                    exit_code = result.exit_code(),
                    stdout_len = result.stdout().len(),
                    stderr_len = result.stderr().len(),
                    "Command completed"
                );
                Ok(result)
            }
            Err(e @ SandpitError::SandboxExpired { .. }) => Err(e),
            Err(e) => {
                warn!(command = %command, error = %e, "Command failed");
                Ok(CommandResult::new("", e.to_string(), 1))
            }
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.write_file_unlocked(path, content).await
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let handle = self.current_handle()?;
        let full_path = resolve_path(handle.workdir(), path);
        let request = CommandRequest::new("cat", vec![full_path]).cwd(handle.workdir());

        match self.exec(&handle, request).await {
            Ok(result) if result.success() => Ok(result.stdout().to_string()),
            Ok(result) => Err(SandpitError::FileRead {
                path: path.to_string(),
                message: result.stderr().to_string(),
            }),
            Err(e @ SandpitError::SandboxExpired { .. }) => Err(e),
            Err(e) => Err(SandpitError::FileRead {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn list_files(&self, directory: Option<&str>) -> Result<Vec<String>> {
        let handle = self.current_handle()?;
        let directory = directory
            .map(|d| resolve_path(handle.workdir(), d))
            .unwrap_or_else(|| handle.workdir().to_string());

        match self.run_script(&handle, list_files_script(&directory), "/").await {
            Ok(result) if result.success() => Ok(result
                .stdout()
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect()),
            Ok(result) => {
                debug!(directory = %directory, stderr = %result.stderr(), "File listing failed");
                Ok(Vec::new())
            }
            Err(e @ SandpitError::SandboxExpired { .. }) => Err(e),
            Err(e) => {
                warn!(directory = %directory, error = %e, "File listing failed");
                Ok(Vec::new())
            }
        }
    }

    async fn install_packages(&self, packages: &[String]) -> Result<CommandResult> {
        let _guard = self.op_lock.lock().await;
        let handle = self.current_handle()?;

        let mut args = vec!["install".to_string()];
        args.extend(self.settings.extra_flags.iter().cloned());
        args.extend(packages.iter().cloned());

        info!(sandbox_id = %handle.sandbox_id(), packages = ?packages, "Installing packages");
        let request =
            CommandRequest::new(self.settings.package_manager.clone(), args).cwd(handle.workdir());

        let result = match self.exec(&handle, request).await {
            Ok(result) => result,
            Err(e @ SandpitError::SandboxExpired { .. }) => return Err(e),
            Err(e) => CommandResult::new("", e.to_string(), 1),
        };

        if result.success() && self.settings.auto_restart {
            match self.launch_dev_server(&handle, true).await {
                Ok(readiness) if !readiness.is_ready() => {
                    warn!(outcome = ?readiness, "Dev server not ready after package install");
                }
                Err(e) => warn!(error = %e, "Dev server restart after install failed"),
                Ok(_) => {}
            }
        }

        Ok(result)
    }

    async fn terminate(&self) -> Result<()> {
        let handle = self.lock_state().discard(SandboxState::Terminated);
        self.shutdown.cancel();

        if let Some(handle) = handle {
            info!(sandbox_id = %handle.sandbox_id(), "Terminating sandbox");
            if let Err(e) = self.bounded(handle.stop()).await {
                error!(sandbox_id = %handle.sandbox_id(), error = %e, "Failed to terminate sandbox");
            }
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        let state = self.lock_state();
        state.handle.is_some() && state.info.is_some()
    }

    fn state(&self) -> SandboxState {
        self.lock_state().lifecycle
    }

    fn sandbox_info(&self) -> Option<SandboxInfo> {
        self.lock_state().info.clone()
    }

    fn tracked_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.lock_state().files.iter().cloned().collect();
        files.sort();
        files
    }

    async fn health_check(&self) -> bool {
        let Ok(handle) = self.current_handle() else {
            return false;
        };
        let request =
            CommandRequest::new("echo", vec!["health_check".to_string()]).cwd(handle.workdir());

        match self.exec(&handle, request).await {
            Ok(result) => result.success(),
            Err(e) => {
                warn!(sandbox_id = %handle.sandbox_id(), error = %e, "Health check failed");
                false
            }
        }
    }

    async fn setup_project(&self) -> Result<Readiness> {
        let _guard = self.op_lock.lock().await;
        let handle = self.current_handle()?;
        let workdir = handle.workdir().to_string();

        info!(sandbox_id = %handle.sandbox_id(), "Setting up starter project");
        self.exec(
            &handle,
            CommandRequest::new("mkdir", vec!["-p".to_string(), format!("{}/src", workdir)]),
        )
        .await?;

        for (path, content) in starter_files(self.scripts.config().port) {
            self.write_file_unlocked(path, &content).await?;
        }

        self.install_dependencies(&handle).await?;
        self.launch_dev_server(&handle, false).await
    }

    async fn restart_dev_server(&self) -> Result<Readiness> {
        let _guard = self.op_lock.lock().await;
        let handle = self.current_handle()?;
        info!(sandbox_id = %handle.sandbox_id(), "Restarting dev server");
        self.launch_dev_server(&handle, true).await
    }

    async fn dev_server_status(&self) -> Result<DevServerStatus> {
        let handle = self.current_handle()?;
        let probe = DevServerProbe::new(handle.clone(), self.scripts.clone());
        let vite_ready = probe.port_listening().await;

        let log = self
            .capture(&handle, format!("cat {}", self.scripts.config().log_path))
            .await?;
        let logs = if log.trim().is_empty() {
            "No logs available".to_string()
        } else {
            last_lines(&log, crate::sandbox::dev_server::STATUS_LOG_LINES)
        };

        let process_status = self.capture(&handle, self.scripts.process_list()).await?;
        let port_status = self.capture(&handle, self.scripts.port_status()).await?;

        Ok(DevServerStatus {
            vite_ready,
            logs,
            process_status: non_empty_or(process_status, "No dev server processes found"),
            port_status: non_empty_or(port_status, "Port check failed"),
            sandbox_info: self.sandbox_info(),
        })
    }

    fn last_readiness(&self) -> Option<Readiness> {
        self.lock_state().readiness.clone()
    }
}

fn non_empty_or(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}
