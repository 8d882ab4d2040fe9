//! End-to-end scenarios against the local backend, using a real `sh`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use sandpit::config::types::BackendType;
use sandpit::config::SandpitConfig;
use sandpit::sandbox::{
    BackendCapabilities, CreateSandboxRequest, LocalBackend, RemoteProvider, SandboxBackend,
    SandboxHandle, SandboxProvider, SandboxState,
};
use sandpit::{Result, SandpitError};

/// Local backend that only supports the shell write path.
struct ShellWritesOnly(LocalBackend);

#[async_trait]
impl SandboxBackend for ShellWritesOnly {
    fn name(&self) -> &str {
        "local-shell"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            bulk_writes: false,
            deferred_output: false,
        }
    }

    async fn create(&self, request: &CreateSandboxRequest) -> Result<Box<dyn SandboxHandle>> {
        self.0.create(request).await
    }
}

fn config(root: &Path) -> SandpitConfig {
    let mut config = SandpitConfig::default();
    config.sandbox.backend = BackendType::Local;
    config.sandbox.command_timeout_secs = 30;
    config.local.root = Some(root.to_path_buf());
    config
}

fn local_provider(root: &Path) -> RemoteProvider {
    RemoteProvider::new(Arc::new(LocalBackend::new(root)), &config(root))
}

const TRICKY: &str = "export const App = () => `Hello ${name}`;\n\
const home = \"$HOME\";\n\
const re = /\\d+\\n/;\n\
// 100% done, no trailing newline";

#[tokio::test]
async fn test_write_and_read_back_via_bulk_write() {
    let root = tempfile::tempdir().unwrap();
    let provider = local_provider(root.path());
    provider.create_sandbox().await.unwrap();

    provider.write_file("src/App.jsx", TRICKY).await.unwrap();
    assert_eq!(provider.read_file("src/App.jsx").await.unwrap(), TRICKY);
    assert_eq!(provider.tracked_files(), vec!["src/App.jsx"]);

    provider.terminate().await.unwrap();
}

#[tokio::test]
async fn test_write_and_read_back_via_shell_fallback() {
    let root = tempfile::tempdir().unwrap();
    let backend = ShellWritesOnly(LocalBackend::new(root.path()));
    let provider = RemoteProvider::new(Arc::new(backend), &config(root.path()));
    provider.create_sandbox().await.unwrap();

    provider.write_file("src/App.jsx", TRICKY).await.unwrap();
    assert_eq!(provider.read_file("src/App.jsx").await.unwrap(), TRICKY);

    let with_backslash = "path\\to\\file\nline \"two\"\n";
    provider.write_file("notes.txt", with_backslash).await.unwrap();
    assert_eq!(provider.read_file("notes.txt").await.unwrap(), with_backslash);

    provider.terminate().await.unwrap();
}

#[tokio::test]
async fn test_shell_write_keeps_special_characters_in_path() {
    let root = tempfile::tempdir().unwrap();
    let backend = ShellWritesOnly(LocalBackend::new(root.path()));
    let provider = RemoteProvider::new(Arc::new(backend), &config(root.path()));
    let info = provider.create_sandbox().await.unwrap();

    for path in ["app/routes/$id.jsx", "app/routes/`x`.jsx", "app/it's \"q\".txt"] {
        provider.write_file(path, "x").await.unwrap();
        assert_eq!(provider.read_file(path).await.unwrap(), "x");
        assert!(root.path().join(&info.sandbox_id).join(path).is_file());
    }
    assert!(!root
        .path()
        .join(&info.sandbox_id)
        .join("app/routes/.jsx")
        .exists());

    let files = provider.list_files(Some("app")).await.unwrap();
    assert!(files.contains(&"routes/$id.jsx".to_string()));
    assert!(files.contains(&"routes/`x`.jsx".to_string()));

    provider.terminate().await.unwrap();
}

#[tokio::test]
async fn test_false_is_a_failed_result() {
    let root = tempfile::tempdir().unwrap();
    let provider = local_provider(root.path());
    provider.create_sandbox().await.unwrap();

    let result = provider.run_command("false").await.unwrap();
    assert!(!result.success());
    assert_eq!(result.exit_code(), 1);

    let result = provider.run_command("sh -c \"echo a b | wc -w\"").await.unwrap();
    assert!(result.success());
    assert_eq!(result.stdout().trim(), "2");
}

#[tokio::test]
async fn test_list_files_skips_dependencies() {
    let root = tempfile::tempdir().unwrap();
    let provider = local_provider(root.path());
    provider.create_sandbox().await.unwrap();

    provider.write_file("src/main.jsx", "main").await.unwrap();
    provider
        .write_file("node_modules/react/index.js", "react")
        .await
        .unwrap();

    let files = provider.list_files(None).await.unwrap();
    assert!(files.iter().any(|f| f.ends_with("src/main.jsx")));
    assert!(!files.iter().any(|f| f.contains("node_modules")));
}

#[tokio::test]
async fn test_expiry_marks_provider_dead() {
    let root = tempfile::tempdir().unwrap();
    let provider = local_provider(root.path());
    let info = provider.create_sandbox().await.unwrap();
    assert!(provider.is_alive());

    // Reclaimed out of band.
    std::fs::remove_dir_all(root.path().join(&info.sandbox_id)).unwrap();
    assert!(provider.is_alive());

    let err = provider.run_command("ls").await.unwrap_err();
    assert!(matches!(err, SandpitError::SandboxExpired { .. }));
    assert!(!provider.is_alive());
    assert_eq!(provider.state(), SandboxState::Stopped);
    assert!(provider.sandbox_info().is_none());
    assert!(!provider.health_check().await);

    // A fresh sandbox can be provisioned on the same provider.
    provider.create_sandbox().await.unwrap();
    assert!(provider.health_check().await);
}

#[tokio::test]
async fn test_terminate_removes_sandbox_directory() {
    let root = tempfile::tempdir().unwrap();
    let provider = local_provider(root.path());
    let info = provider.create_sandbox().await.unwrap();
    let dir = root.path().join(&info.sandbox_id);
    assert!(dir.exists());

    provider.terminate().await.unwrap();
    assert!(!dir.exists());
    assert_eq!(provider.state(), SandboxState::Terminated);
    assert!(matches!(
        provider.run_command("ls").await,
        Err(SandpitError::ProviderTerminated)
    ));
}
