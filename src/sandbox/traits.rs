use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::{Result, SandpitError};
use crate::sandbox::dev_server::DevServerStatus;
use crate::sandbox::readiness::Readiness;
use crate::sandbox::{CommandResult, SandboxInfo, SandboxState};

// ============================================================================
// Provisioning boundary (what a backend must offer)
// ============================================================================

/// Capability flags indicating what the backend supports.
///
/// Resolved once when the backend is constructed; callers branch on these
/// instead of probing the handle.
#[derive(Debug, Clone, Default)]
pub struct BackendCapabilities {
    /// Accepts bulk file uploads through `write_files`
    pub bulk_writes: bool,
    /// Command output must be fetched in a separate step
    pub deferred_output: bool,
}

/// Parameters of a provisioning request.
#[derive(Debug, Clone)]
pub struct CreateSandboxRequest {
    /// Idle time after which the backend may reclaim the sandbox
    pub timeout: Duration,
    /// Ports exposed to the outside world
    pub ports: Vec<u16>,
    /// Runtime image
    pub runtime: String,
}

/// A single command invocation. `cmd` is executed directly, never through a shell.
#[derive(Debug, Clone, Default)]
pub struct CommandRequest {
    pub cmd: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
}

impl CommandRequest {
    pub fn new(cmd: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            ..Default::default()
        }
    }

    /// `sh -c <script>`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", vec!["-c".to_string(), script.into()])
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// One output stream of a finished command.
pub enum OutputChannel {
    /// Already materialized by the backend
    Text(String),
    /// Fetched on demand
    Deferred(BoxFuture<'static, Result<String>>),
}

impl OutputChannel {
    /// Resolve to a plain string; unreadable output becomes empty.
    pub async fn resolve(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Deferred(fetch) => match fetch.await {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to fetch command output");
                    String::new()
                }
            },
        }
    }
}

impl fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Raw outcome of a backend command.
#[derive(Debug)]
pub struct CommandOutput {
    /// `None` when the backend did not report one
    pub exit_code: Option<i32>,
    pub stdout: OutputChannel,
    pub stderr: OutputChannel,
}

impl CommandOutput {
    pub fn text(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: OutputChannel::Text(stdout.into()),
            stderr: OutputChannel::Text(stderr.into()),
        }
    }
}

/// A file to upload in a bulk write.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute path inside the sandbox
    pub path: String,
    pub content: Vec<u8>,
}

/// Trait for sandbox provisioning backends.
///
/// This trait abstracts the remote service, allowing different backends
/// (Vercel Sandbox, local processes, etc.) to be used interchangeably.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Returns the backend name (e.g., "vercel", "local")
    fn name(&self) -> &str;

    /// Returns the capabilities of this backend
    fn capabilities(&self) -> BackendCapabilities;

    /// Provision a new sandbox
    async fn create(&self, request: &CreateSandboxRequest) -> Result<Box<dyn SandboxHandle>>;
}

/// A provisioned remote sandbox.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Backend identifier of the sandbox
    fn sandbox_id(&self) -> &str;

    /// Fixed root directory relative paths resolve against
    fn workdir(&self) -> &str;

    /// Externally reachable URL for an exposed port
    fn domain(&self, port: u16) -> Result<String>;

    /// Run a single command
    async fn run_command(&self, request: CommandRequest) -> Result<CommandOutput>;

    /// Upload files in one call
    async fn write_files(&self, files: Vec<FileEntry>) -> Result<()>;

    /// Stop the sandbox
    async fn stop(&self) -> Result<()>;
}

// ============================================================================
// Provider surface (what callers use)
// ============================================================================

/// Optional operations a provider supports.
#[derive(Debug, Clone, Default)]
pub struct ProviderCapabilities {
    /// Supports project scaffolding and dev server management
    pub dev_server: bool,
    /// `health_check` contacts the sandbox rather than checking local state
    pub active_health_check: bool,
}

/// Owner of exactly one remote sandbox.
///
/// Implementations are shared behind `Arc` and use interior mutability.
/// Callers should not issue overlapping commands against one provider;
/// `RemoteProvider` serializes its mutating operations internally.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Returns the provider name (e.g., "vercel")
    fn name(&self) -> &str;

    /// Returns the optional operations this provider supports
    fn capabilities(&self) -> ProviderCapabilities;

    /// Provision a sandbox, stopping any sandbox already held
    async fn create_sandbox(&self) -> Result<SandboxInfo>;

    /// Run a command; a non-zero exit is a normal result, not an error
    async fn run_command(&self, command: &str) -> Result<CommandResult>;

    /// Write a file, tracking its path on success
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Read a file
    async fn read_file(&self, path: &str) -> Result<String>;

    /// Regular files under `directory` (the sandbox root when `None`)
    async fn list_files(&self, directory: Option<&str>) -> Result<Vec<String>>;

    /// Install packages with the configured package manager
    async fn install_packages(&self, packages: &[String]) -> Result<CommandResult>;

    /// Stop the sandbox and discard local state
    async fn terminate(&self) -> Result<()>;

    /// Whether a sandbox is held. Never performs I/O.
    fn is_alive(&self) -> bool;

    /// Current lifecycle state
    fn state(&self) -> SandboxState;

    /// Metadata of the held sandbox
    fn sandbox_info(&self) -> Option<SandboxInfo>;

    /// Paths written into the current sandbox, sorted
    fn tracked_files(&self) -> Vec<String>;

    /// Check that the sandbox answers commands.
    /// Default implementation tries a simple echo command.
    async fn health_check(&self) -> bool {
        match self.run_command("echo health_check").await {
            Ok(result) => result.success(),
            Err(_) => false,
        }
    }

    /// URL of the dev server port
    fn sandbox_url(&self) -> Option<String> {
        self.sandbox_info().map(|info| info.url)
    }

    /// Write the starter project and start the dev server
    async fn setup_project(&self) -> Result<Readiness> {
        Err(self.unsupported("project setup"))
    }

    /// Kill and relaunch the dev server, then wait for it
    async fn restart_dev_server(&self) -> Result<Readiness> {
        Err(self.unsupported("dev server restart"))
    }

    /// Snapshot of the dev server process, port and logs
    async fn dev_server_status(&self) -> Result<DevServerStatus> {
        Err(self.unsupported("dev server status"))
    }

    /// Outcome of the most recent readiness wait
    fn last_readiness(&self) -> Option<Readiness> {
        None
    }

    #[doc(hidden)]
    fn unsupported(&self, operation: &str) -> SandpitError {
        SandpitError::Unsupported {
            provider: self.name().to_string(),
            operation: operation.to_string(),
        }
    }
}
