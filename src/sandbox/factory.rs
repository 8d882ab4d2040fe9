use std::path::PathBuf;
use std::sync::Arc;

use crate::config::loader::get_data_dir;
use crate::config::types::{BackendType, SandpitConfig};
use crate::error::Result;
use crate::sandbox::backends::{LocalBackend, VercelBackend, VercelCredentials};
use crate::sandbox::provider::RemoteProvider;
use crate::sandbox::traits::{SandboxBackend, SandboxProvider};

/// Create the provisioning backend selected in the configuration.
///
/// `env` looks up environment variables; it is injected so credential
/// selection can be exercised without touching the process environment.
pub fn create_backend<F>(config: &SandpitConfig, env: F) -> Result<Arc<dyn SandboxBackend>>
where
    F: Fn(&str) -> Option<String>,
{
    match config.sandbox.backend {
        BackendType::Vercel => {
            let credentials = VercelCredentials::from_env(env);
            let backend =
                VercelBackend::new(&config.vercel, credentials, config.sandbox.workdir.clone())?;
            Ok(Arc::new(backend))
        }
        BackendType::Local => Ok(Arc::new(LocalBackend::new(local_root(config)))),
    }
}

/// Create a provider over the configured backend.
pub fn create_provider<F>(config: &SandpitConfig, env: F) -> Result<Arc<dyn SandboxProvider>>
where
    F: Fn(&str) -> Option<String>,
{
    let backend = create_backend(config, env)?;
    Ok(Arc::new(RemoteProvider::new(backend, config)))
}

fn local_root(config: &SandpitConfig) -> PathBuf {
    config
        .local
        .root
        .clone()
        .unwrap_or_else(|| get_data_dir().join("sandboxes"))
}

/// Get information about available backends on this system.
pub fn available_backends<F>(env: F) -> Vec<BackendInfo>
where
    F: Fn(&str) -> Option<String>,
{
    let credentials = VercelCredentials::from_env(env);
    let local = LocalBackend::is_available();

    vec![
        BackendInfo {
            name: "vercel",
            available: credentials.is_some(),
            description: "Vercel Sandbox microVMs",
            unavailable_reason: if credentials.is_some() {
                None
            } else {
                Some("Set VERCEL_TOKEN, VERCEL_TEAM_ID and VERCEL_PROJECT_ID, or VERCEL_OIDC_TOKEN")
            },
        },
        BackendInfo {
            name: "local",
            available: local,
            description: "Host processes in a scratch directory (no isolation)",
            unavailable_reason: if local { None } else { Some("No POSIX shell found") },
        },
    ]
}

/// Information about a sandbox backend.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackendInfo {
    pub name: &'static str,
    pub available: bool,
    pub description: &'static str,
    pub unavailable_reason: Option<&'static str>,
}
