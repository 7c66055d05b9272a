//! Module registry: stores registered module instances and metadata.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use modhost_core::error::{AppError, AppResult};
use modhost_core::traits::{Module, ModuleInfo};

/// Registry view of one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredModule {
    pub info: ModuleInfo,
    pub registered_at: DateTime<Utc>,
}

/// Name-keyed registry of live modules.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    /// Module name → module instance.
    modules: RwLock<HashMap<String, Arc<dyn Module>>>,
    /// Module name → metadata.
    metadata: RwLock<HashMap<String, RegisteredModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module under `name`.
    ///
    /// Fails with `NameAlreadyRegistered` if the name is taken; the existing
    /// module is left untouched.
    pub async fn register(&self, name: &str, module: Arc<dyn Module>) -> AppResult<()> {
        let info = module.info();

        let mut modules = self.modules.write().await;
        let mut metadata = self.metadata.write().await;

        if modules.contains_key(name) {
            return Err(AppError::name_already_registered(name));
        }

        info!(module = %name, version = %info.version, "Registering module");

        modules.insert(name.to_string(), module);
        metadata.insert(
            name.to_string(),
            RegisteredModule {
                info,
                registered_at: Utc::now(),
            },
        );

        Ok(())
    }

    /// Removes a module. Returns `None` if it was not registered.
    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Module>> {
        let mut modules = self.modules.write().await;
        let mut metadata = self.metadata.write().await;

        let module = modules.remove(name)?;
        metadata.remove(name);

        info!(module = %name, "Module unregistered");
        Some(module)
    }

    /// Removes `name` only while it still refers to `module`.
    pub async fn unregister_instance(&self, name: &str, module: &Arc<dyn Module>) -> bool {
        let mut modules = self.modules.write().await;
        let mut metadata = self.metadata.write().await;

        if !modules.get(name).is_some_and(|current| Arc::ptr_eq(current, module)) {
            return false;
        }
        modules.remove(name);
        metadata.remove(name);

        info!(module = %name, "Module unregistered");
        true
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.modules.read().await.contains_key(name)
    }

    /// Lists registered modules, oldest registration first.
    pub async fn list(&self) -> Vec<RegisteredModule> {
        let metadata = self.metadata.read().await;
        let mut entries: Vec<RegisteredModule> = metadata.values().cloned().collect();
        entries.sort_by_key(|entry| entry.registered_at);
        entries
    }

    pub async fn names(&self) -> Vec<String> {
        self.list()
            .await
            .into_iter()
            .map(|entry| entry.info.name)
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.modules.read().await.len()
    }
}
