//! Catalog of compiled-in module constructors.
//!
//! Modules are linked into the host binary and listed here by kind; the
//! broker instantiates them on demand from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use modhost_core::config::BrokerConfig;
use modhost_core::error::{AppError, AppResult};
use modhost_core::traits::Module;

/// Builds a module instance named `name`.
pub type ModuleFactory = Arc<dyn Fn(&str, &BrokerConfig) -> Arc<dyn Module> + Send + Sync>;

/// Kind → constructor table.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, ModuleFactory>,
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the constructor for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F) -> &mut Self
    where
        F: Fn(&str, &BrokerConfig) -> Arc<dyn Module> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Builds a fresh, unregistered module.
    pub fn create(&self, kind: &str, name: &str, config: &BrokerConfig) -> AppResult<Arc<dyn Module>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            AppError::invalid_config(format!(
                "Unknown module kind '{kind}' for module '{name}' (known: {})",
                self.kinds().join(", ")
            ))
        })?;
        Ok(factory(name, config))
    }
}
