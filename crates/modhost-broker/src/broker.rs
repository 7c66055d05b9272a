//! Broker: registry, catalog, and relay behind one handle.

use std::sync::{Arc, RwLock};

use futures::FutureExt;
use futures::future::join_all;
use tracing::{error, info, warn};

use modhost_core::config::{BrokerConfig, ModuleEntry};
use modhost_core::error::{AppError, AppResult};
use modhost_core::events::Event;
use modhost_core::traits::{Module, ModuleInfo};
use modhost_core::types::{ListenerId, ModuleState};

use crate::catalog::ModuleCatalog;
use crate::proxy::ClientProxy;
use crate::registry::ModuleRegistry;
use crate::relay::{CloseHook, EventListener, EventRelay};

#[derive(Debug)]
pub(crate) struct BrokerInner {
    registry: ModuleRegistry,
    relay: EventRelay,
    catalog: RwLock<ModuleCatalog>,
    config: BrokerConfig,
}

/// Process-wide module broker. Cheap to clone.
///
/// Must be used from within a Tokio runtime: every registration spawns the
/// module's relay worker.
#[derive(Debug, Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_catalog(config, ModuleCatalog::new())
    }

    pub fn with_catalog(config: BrokerConfig, catalog: ModuleCatalog) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                registry: ModuleRegistry::new(),
                relay: EventRelay::new(&config),
                catalog: RwLock::new(catalog),
                config,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<BrokerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<BrokerInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }

    /// Adds a constructor to the catalog.
    pub fn register_kind<F>(&self, kind: &str, factory: F)
    where
        F: Fn(&str, &BrokerConfig) -> Arc<dyn Module> + Send + Sync + 'static,
    {
        self.inner
            .catalog
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register(kind, factory);
    }

    /// Registers a module and connects it to a fresh relay channel.
    ///
    /// `name` must match the module's own name, since events are routed by
    /// their source.
    pub async fn register(&self, name: &str, module: Arc<dyn Module>) -> AppResult<()> {
        let info = module.info();
        if info.name != name {
            return Err(AppError::invalid_config(format!(
                "Module reports name '{}' but was registered as '{name}'",
                info.name
            )));
        }

        self.reap(name).await;
        self.inner.registry.register(name, module.clone()).await?;
        let sink = self
            .inner
            .relay
            .open_with_hook(name, Some(self.reap_on_close(name, &module)));
        module.attach(sink);
        Ok(())
    }

    /// Unregisters `module` once its relay channel closes, if it closed
    /// because the module was torn down without going through the broker.
    fn reap_on_close(&self, name: &str, module: &Arc<dyn Module>) -> CloseHook {
        let broker = self.downgrade();
        let owner = Arc::downgrade(module);
        let name = name.to_string();
        Box::new(move || {
            async move {
                let (Some(inner), Some(module)) = (broker.upgrade(), owner.upgrade()) else {
                    return;
                };
                if module.state() != ModuleState::TornDown {
                    return;
                }
                if inner.registry.unregister_instance(&name, &module).await {
                    info!(module = %name, "Reaped module torn down outside the broker");
                }
            }
            .boxed()
        })
    }

    /// Builds a module of `kind` from the catalog and registers it.
    pub async fn instantiate(&self, name: &str, kind: &str) -> AppResult<Arc<dyn Module>> {
        if self.get(name).await.is_some() {
            return Err(AppError::name_already_registered(name));
        }
        let module = self
            .inner
            .catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .create(kind, name, &self.inner.config)?;
        self.register(name, module.clone()).await?;
        Ok(module)
    }

    /// Instantiates, initializes, and optionally starts configured modules.
    ///
    /// Stops at the first failure; the failing module is torn down, modules
    /// brought up before it stay registered.
    pub async fn bootstrap(&self, entries: &[ModuleEntry]) -> AppResult<Vec<String>> {
        let mut started = Vec::new();
        for entry in entries.iter().filter(|entry| entry.enabled) {
            let module = self.instantiate(&entry.name, &entry.kind).await?;

            let brought_up = async {
                module.initialize(entry.config.clone()).await?;
                if entry.auto_start {
                    module.start().await?;
                }
                Ok::<(), AppError>(())
            }
            .await;

            if let Err(e) = brought_up {
                error!(module = %entry.name, kind = %entry.kind, error = %e, "Module bootstrap failed");
                let _ = self.teardown_module(&entry.name).await;
                return Err(e);
            }

            info!(
                module = %entry.name,
                kind = %entry.kind,
                state = %module.state(),
                "Module ready"
            );
            started.push(entry.name.clone());
        }
        Ok(started)
    }

    /// Removes a module from the registry and closes its relay channel.
    /// Events already queued are still delivered. Idempotent.
    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Module>> {
        let module = self.inner.registry.unregister(name).await;
        self.inner.relay.close(name);
        module
    }

    /// Queues an event for the listeners of its source module.
    pub fn dispatch(&self, event: Arc<Event>) -> bool {
        self.inner.relay.dispatch(event)
    }

    /// Attaches a listener to the events of `name`.
    pub async fn subscribe_to_events(
        &self,
        name: &str,
        listener: Arc<dyn EventListener>,
    ) -> AppResult<ListenerId> {
        if self.get(name).await.is_none() {
            return Err(AppError::module_not_found(name));
        }
        self.inner.relay.add_listener(name, listener)
    }

    /// Detaches a listener. Returns `false` if it was not attached.
    pub fn unsubscribe(&self, name: &str, listener: ListenerId) -> bool {
        self.inner.relay.remove_listener(name, listener)
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.inner.relay.listener_count(name)
    }

    /// Looks up a live module. A module torn down directly and not yet
    /// reaped by its relay worker is unregistered here.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        if self.reap(name).await {
            return None;
        }
        self.inner.registry.get(name).await
    }

    async fn reap(&self, name: &str) -> bool {
        let torn_down = self
            .inner
            .registry
            .get(name)
            .await
            .is_some_and(|module| module.state() == ModuleState::TornDown);
        if torn_down {
            info!(module = %name, "Reaping torn-down module");
            self.unregister(name).await;
        }
        torn_down
    }

    pub async fn modules(&self) -> Vec<ModuleInfo> {
        self.inner
            .registry
            .list()
            .await
            .into_iter()
            .map(|entry| entry.info)
            .collect()
    }

    /// Tears a module down and unregisters it.
    pub async fn teardown_module(&self, name: &str) -> AppResult<()> {
        let module = self
            .inner
            .registry
            .get(name)
            .await
            .ok_or_else(|| AppError::module_not_found(name))?;
        module.teardown().await;
        self.unregister(name).await;
        Ok(())
    }

    /// Tears down every registered module.
    pub async fn shutdown(&self) {
        let names = self.inner.registry.names().await;
        let results = join_all(names.iter().map(|name| self.teardown_module(name))).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!(module = %name, error = %e, "Module teardown during shutdown failed");
            }
        }
        info!(modules = names.len(), "Broker shut down");
    }

    /// Returns a by-name handle for invoking module operations.
    pub fn proxy(&self) -> ClientProxy {
        ClientProxy::new(self)
    }
}
