pub mod backends;
pub mod dev_server;
mod factory;
pub mod manager;
mod provider;
pub mod readiness;
pub mod scaffold;
pub mod shell;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use backends::{LocalBackend, VercelBackend, VercelCredentials};
pub use dev_server::DevServerStatus;
pub use factory::{available_backends, create_backend, create_provider, BackendInfo};
pub use manager::SandboxManager;
pub use provider::RemoteProvider;
pub use readiness::{Readiness, ReadinessPoller, ReadinessProbe, ReadySignal};
pub use traits::{
    BackendCapabilities, CommandOutput, CommandRequest, CreateSandboxRequest, FileEntry,
    OutputChannel, ProviderCapabilities, SandboxBackend, SandboxHandle, SandboxProvider,
};

/// Result of executing a command in the sandbox.
///
/// `success` is derived from the exit code at construction and never
/// changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    stdout: String,
    stderr: String,
    exit_code: i32,
    success: bool,
    #[serde(default)]
    needs_recreation: bool,
}

impl CommandResult {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            success: exit_code == 0,
            needs_recreation: false,
        }
    }

    /// Terminal failure telling the caller the sandbox must be recreated.
    pub fn recreation_needed(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: 1,
            success: false,
            needs_recreation: true,
        }
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn needs_recreation(&self) -> bool {
        self.needs_recreation
    }
}

/// Identity of a live sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfo {
    /// Opaque backend identifier
    pub sandbox_id: String,
    /// Externally reachable URL of the dev server port
    pub url: String,
    /// Backend tag (e.g. "vercel")
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of the sandbox owned by a provider instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    /// No backing sandbox.
    Absent,
    /// Provisioning request in flight.
    Creating,
    /// Sandbox is ready for commands.
    Ready,
    /// Reclaimed by the backend out of band.
    Stopped,
    /// Shut down by the caller; the provider is finished.
    Terminated,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "Absent"),
            Self::Creating => write!(f, "Creating"),
            Self::Ready => write!(f, "Ready"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}
