//! Catalog registration for the Waku module.

use std::sync::Arc;

use modhost_broker::Broker;
use modhost_core::traits::Module;

use crate::ffi::WakuBindings;
use crate::module::WakuModule;

/// Catalog kind under which Waku modules are built.
pub const MODULE_KIND: &str = "waku";

/// Makes `kind = "waku"` module entries buildable by `broker`.
///
/// Every instance shares `bindings`; each gets its own node context.
pub fn register_waku(broker: &Broker, bindings: Arc<dyn WakuBindings>) {
    broker.register_kind(MODULE_KIND, move |name, config| {
        Arc::new(WakuModule::new(name, bindings.clone(), config)) as Arc<dyn Module>
    });
    tracing::debug!(kind = MODULE_KIND, "Waku module kind registered");
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use modhost_core::config::{BrokerConfig, ModuleEntry};
    use modhost_core::types::ModuleState;
    use serde_json::json;

    use crate::ffi::{Delivery, MockWaku};

    #[tokio::test]
    async fn test_bootstrap_builds_waku_modules() {
        let mock = Arc::new(MockWaku::with_delivery(Delivery::Inline));
        let broker = Broker::new(BrokerConfig::default());
        register_waku(&broker, mock.clone());

        let entries = vec![
            ModuleEntry::new("alpha", MODULE_KIND).with_config(json!({ "port": 60010 })),
            ModuleEntry {
                auto_start: false,
                ..ModuleEntry::new("beta", MODULE_KIND)
            },
        ];
        let ready = broker.bootstrap(&entries).await.unwrap();

        assert_eq!(ready, vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(mock.created_count(), 2);
        let alpha = broker.get("alpha").await.unwrap();
        let beta = broker.get("beta").await.unwrap();
        assert_eq!(alpha.state(), ModuleState::Started);
        assert_eq!(beta.state(), ModuleState::Initialized);

        broker.shutdown().await;
        assert_eq!(mock.release_count(), 2);
    }
}
