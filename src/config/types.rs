use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SandpitConfig {
    pub sandbox: SandboxConfig,
    pub vercel: VercelConfig,
    pub local: LocalConfig,
    pub dev_server: DevServerConfig,
    pub packages: PackageConfig,
    pub server: ServerConfig,
}

/// The type of provisioning backend to use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Vercel Sandbox microVMs (requires credentials)
    #[default]
    Vercel,
    /// Host processes in a scratch directory (development only)
    Local,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vercel => "vercel",
            Self::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Which backend provisions sandboxes
    pub backend: BackendType,
    /// Fixed working directory inside the sandbox
    pub workdir: String,
    /// Runtime image requested from the backend
    pub runtime: String,
    /// Idle timeout after which the provider reclaims the sandbox
    pub idle_timeout_secs: u64,
    /// Deadline for any single remote operation
    pub command_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            workdir: "/vercel/sandbox".to_string(),
            runtime: "node22".to_string(),
            idle_timeout_secs: 300,
            command_timeout_secs: 300,
        }
    }
}

impl SandboxConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Vercel-specific configuration. Credentials come from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VercelConfig {
    /// Base URL of the Vercel REST API
    pub api_url: String,
    /// vCPUs requested per sandbox
    pub vcpus: u8,
}

impl Default for VercelConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.vercel.com".to_string(),
            vcpus: 2,
        }
    }
}

/// Local backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory holding one subdirectory per sandbox (defaults to the data dir)
    pub root: Option<PathBuf>,
}

/// Dev server process and readiness polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevServerConfig {
    /// Port the dev server listens on and the backend exposes
    pub port: u16,
    /// Command that starts the dev server
    pub command: String,
    /// Pattern passed to `pkill -f` / `ps | grep` to find the process
    pub process_pattern: String,
    /// Combined stdout/stderr of the detached process
    pub log_path: String,
    /// Pid of the detached process
    pub pid_path: String,
    pub poll_interval_ms: u64,
    /// Upper bound on the readiness wait
    pub ready_timeout_ms: u64,
    /// Pause between killing and relaunching on restart
    pub restart_grace_ms: u64,
    /// Lines of log inspected per readiness tick
    pub log_tail_lines: usize,
    /// Write the starter project and start the dev server on creation
    pub scaffold_on_create: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            port: 5173,
            command: "npm run dev".to_string(),
            process_pattern: "vite".to_string(),
            log_path: "/tmp/vite.log".to_string(),
            pid_path: "/tmp/vite.pid".to_string(),
            poll_interval_ms: 1000,
            ready_timeout_ms: 15000,
            restart_grace_ms: 3000,
            log_tail_lines: 10,
            scaffold_on_create: true,
        }
    }
}

impl DevServerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }
}

/// Package installation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Package manager executable
    pub manager: String,
    /// Extra flags appended to every install (whitespace separated)
    pub extra_flags: String,
    /// Restart the dev server after a successful install
    pub auto_restart_dev_server: bool,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            manager: "npm".to_string(),
            extra_flags: String::new(),
            auto_restart_dev_server: false,
        }
    }
}

/// HTTP boundary configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address `sandpit serve` binds to
    pub bind_addr: String,
    /// Base URL the CLI client talks to
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".to_string(),
            url: "http://127.0.0.1:3100".to_string(),
        }
    }
}
