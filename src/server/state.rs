//! Application state shared across handlers.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::SandpitConfig;
use crate::error::Result;
use crate::sandbox::{create_provider, SandboxManager, SandboxProvider, SandboxState};

/// Builds a fresh provider when none is usable.
pub type ProviderFactory = Arc<dyn Fn() -> Result<Arc<dyn SandboxProvider>> + Send + Sync>;

/// Context passed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Registry of the active provider.
    pub manager: Arc<SandboxManager>,

    /// Loaded configuration.
    pub config: Arc<SandpitConfig>,

    factory: ProviderFactory,

    /// Serializes sandbox creation so concurrent requests never race on the registry.
    create_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// State whose providers use the configured backend and the process environment.
    pub fn new(config: SandpitConfig) -> Self {
        let config = Arc::new(config);
        let factory_config = config.clone();
        let factory: ProviderFactory =
            Arc::new(move || create_provider(&factory_config, |key| std::env::var(key).ok()));
        Self::with_factory(config, factory)
    }

    pub fn with_factory(config: Arc<SandpitConfig>, factory: ProviderFactory) -> Self {
        Self {
            manager: Arc::new(SandboxManager::new()),
            config,
            factory,
            create_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Held from provider selection until the new provider is registered.
    pub async fn lock_create(&self) -> MutexGuard<'_, ()> {
        self.create_lock.lock().await
    }

    /// The active provider if it can still provision, otherwise a new one.
    pub fn provider_for_create(&self) -> Result<Arc<dyn SandboxProvider>> {
        match self.manager.active() {
            Some(provider) if provider.state() != SandboxState::Terminated => Ok(provider),
            _ => (self.factory)(),
        }
    }
}
