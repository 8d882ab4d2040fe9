use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SandpitError};
use crate::sandbox::traits::{
    BackendCapabilities, CommandOutput, CommandRequest, CreateSandboxRequest, FileEntry,
    OutputChannel, SandboxBackend, SandboxHandle,
};

/// Local process backend.
///
/// Each sandbox is a scratch directory under `root`; commands run as host
/// processes with that directory as working directory. There is no
/// isolation, so this is for development and tests only.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Check if the local backend is available on this system.
    ///
    /// Returns true if a POSIX shell can be spawned.
    pub fn is_available() -> bool {
        match std::process::Command::new("sh")
            .args(["-c", "true"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SandboxBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            bulk_writes: true,
            deferred_output: false,
        }
    }

    async fn create(&self, request: &CreateSandboxRequest) -> Result<Box<dyn SandboxHandle>> {
        let id = sandbox_id();
        let dir = self.root.join(&id);
        let provisioning_error = |e: std::io::Error| {
            SandpitError::Provisioning(format!(
                "Failed to create sandbox directory {}: {}",
                dir.display(),
                e
            ))
        };
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(provisioning_error)?;
        // Never adopt an existing directory.
        tokio::fs::create_dir(&dir).await.map_err(provisioning_error)?;

        info!(sandbox_id = %id, dir = %dir.display(), ports = ?request.ports, "Local sandbox created");
        Ok(Box::new(LocalSandbox {
            workdir: dir.display().to_string(),
            id,
            dir,
        }))
    }
}

struct LocalSandbox {
    id: String,
    dir: PathBuf,
    workdir: String,
}

impl LocalSandbox {
    /// Fail like a reclaimed remote sandbox once the directory is gone.
    async fn ensure_present(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(());
        }
        Err(SandpitError::Backend {
            message: format!(
                "sandbox_stopped: sandbox {} is no longer available",
                self.id
            ),
            status: Some(410),
        })
    }
}

#[async_trait]
impl SandboxHandle for LocalSandbox {
    fn sandbox_id(&self) -> &str {
        &self.id
    }

    fn workdir(&self) -> &str {
        &self.workdir
    }

    fn domain(&self, port: u16) -> Result<String> {
        Ok(format!("http://localhost:{}", port))
    }

    async fn run_command(&self, request: CommandRequest) -> Result<CommandOutput> {
        self.ensure_present().await?;
        debug!(sandbox_id = %self.id, cmd = %request.cmd, args = ?request.args, "Spawning local command");

        let cwd = request
            .cwd
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.dir.clone());

        let mut cmd = Command::new(&request.cmd);
        cmd.args(&request.args)
            .current_dir(&cwd)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && cwd.is_dir() => {
                // Same exit status a shell reports for an unknown command.
                return Ok(CommandOutput::text(
                    "",
                    format!("{}: command not found", request.cmd),
                    127,
                ));
            }
            Err(e) => {
                return Err(SandpitError::Backend {
                    message: format!("Failed to spawn {}: {}", request.cmd, e),
                    status: None,
                })
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: OutputChannel::Text(
                String::from_utf8_lossy(&output.stdout).into_owned(),
            ),
            stderr: OutputChannel::Text(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ),
        })
    }

    async fn write_files(&self, files: Vec<FileEntry>) -> Result<()> {
        self.ensure_present().await?;
        for file in files {
            let path = Path::new(&file.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, &file.content).await?;
            debug!(path = %file.path, size = file.content.len(), "File written");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(sandbox_id = %self.id, "Local sandbox removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(sandbox_id = %self.id, error = %e, "Failed to remove sandbox directory");
                Err(e.into())
            }
        }
    }
}

fn sandbox_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("local-{}", &uuid[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> CreateSandboxRequest {
        CreateSandboxRequest {
            timeout: Duration::from_secs(300),
            ports: vec![5173],
            runtime: "node22".to_string(),
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let a = sandbox_id();
        assert_eq!(a.len(), "local-".len() + 12);
        assert_ne!(a, sandbox_id());
    }

    #[tokio::test]
    async fn test_create_makes_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b");
        let handle = LocalBackend::new(&nested).create(&request()).await.unwrap();
        assert!(nested.join(handle.sandbox_id()).is_dir());
    }

    #[tokio::test]
    async fn test_create_fails_when_root_is_a_file() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("occupied");
        std::fs::write(&file, "x").unwrap();

        let err = LocalBackend::new(&file).create(&request()).await.err().unwrap();
        assert!(matches!(err, SandpitError::Provisioning(_)));
    }

    #[tokio::test]
    async fn test_run_command_in_sandbox_dir() {
        let root = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(root.path());
        let handle = backend.create(&request()).await.unwrap();

        assert!(handle.sandbox_id().starts_with("local-"));
        assert_eq!(handle.domain(5173).unwrap(), "http://localhost:5173");

        let output = handle
            .run_command(CommandRequest::new("pwd", Vec::new()).cwd(handle.workdir()))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
        let stdout = output.stdout.resolve().await;
        assert!(stdout.trim().ends_with(handle.sandbox_id()));
    }

    #[tokio::test]
    async fn test_exit_codes_and_missing_commands() {
        let root = tempfile::tempdir().unwrap();
        let handle = LocalBackend::new(root.path())
            .create(&request())
            .await
            .unwrap();

        let output = handle
            .run_command(CommandRequest::shell("echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr.resolve().await, "oops\n");

        let output = handle
            .run_command(CommandRequest::new("definitely-not-a-command-xyz", Vec::new()))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(127));
    }

    #[tokio::test]
    async fn test_write_files_creates_parents() {
        let root = tempfile::tempdir().unwrap();
        let handle = LocalBackend::new(root.path())
            .create(&request())
            .await
            .unwrap();

        let path = format!("{}/src/deep/App.jsx", handle.workdir());
        handle
            .write_files(vec![FileEntry {
                path: path.clone(),
                content: b"hello".to_vec(),
            }])
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_stopped_sandbox_reports_expiry() {
        let root = tempfile::tempdir().unwrap();
        let handle = LocalBackend::new(root.path())
            .create(&request())
            .await
            .unwrap();

        handle.stop().await.unwrap();
        handle.stop().await.unwrap();

        let err = handle
            .run_command(CommandRequest::new("true", Vec::new()))
            .await
            .unwrap_err();
        assert!(err.indicates_expiry());
        assert!(matches!(err, SandpitError::Backend { status: Some(410), .. }));
    }

    #[test]
    fn test_is_available() {
        assert!(LocalBackend::is_available());
    }
}
