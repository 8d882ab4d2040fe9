use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::sandbox::traits::SandboxProvider;

/// Holds the provider currently serving requests.
///
/// Replacement is a single pointer swap: readers see the old provider or
/// the new one, never anything in between.
#[derive(Default)]
pub struct SandboxManager {
    active: RwLock<Option<Arc<dyn SandboxProvider>>>,
}

impl SandboxManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active provider, if any
    pub fn active(&self) -> Option<Arc<dyn SandboxProvider>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `provider`, returning the one it replaced.
    pub fn set_active(&self, provider: Arc<dyn SandboxProvider>) -> Option<Arc<dyn SandboxProvider>> {
        info!(provider = %provider.name(), "Setting active sandbox provider");
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(provider)
    }

    pub fn clear(&self) -> Option<Arc<dyn SandboxProvider>> {
        debug!("Clearing active sandbox provider");
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Clear only if `provider` is still the active one.
    ///
    /// Returns whether it was cleared.
    pub fn clear_if_same(&self, provider: &Arc<dyn SandboxProvider>) -> bool {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(current) if Arc::ptr_eq(current, provider) => {
                *active = None;
                debug!("Cleared expired sandbox provider");
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandpitConfig;
    use crate::sandbox::testing::FakeBackend;
    use crate::sandbox::RemoteProvider;

    fn provider() -> Arc<dyn SandboxProvider> {
        Arc::new(RemoteProvider::new(
            Arc::new(FakeBackend::new()),
            &SandpitConfig::default(),
        ))
    }

    #[test]
    fn test_set_and_replace() {
        let manager = SandboxManager::new();
        assert!(manager.active().is_none());

        let first = provider();
        assert!(manager.set_active(first.clone()).is_none());
        assert!(Arc::ptr_eq(&manager.active().unwrap(), &first));

        let second = provider();
        let replaced = manager.set_active(second.clone()).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&manager.active().unwrap(), &second));

        assert!(manager.clear().is_some());
        assert!(manager.active().is_none());
    }

    #[test]
    fn test_clear_if_same_ignores_replaced_provider() {
        let manager = SandboxManager::new();
        let stale = provider();
        let current = provider();
        manager.set_active(stale.clone());
        manager.set_active(current.clone());

        assert!(!manager.clear_if_same(&stale));
        assert!(manager.active().is_some());
        assert!(manager.clear_if_same(&current));
        assert!(manager.active().is_none());
    }
}
