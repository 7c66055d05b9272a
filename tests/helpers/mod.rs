//! Shared helpers for the host integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use modhost_broker::{Broker, ChannelListener, ModuleClient};
use modhost_core::config::BrokerConfig;
use modhost_core::events::{Event, EventKind};
use modhost_core::traits::Module;
use plugin_waku::ffi::{Delivery, MockWaku};

pub const TOPIC_A: &str = "/waku/2/rs/16/32";
pub const TOPIC_B: &str = "/waku/2/rs/16/64";
pub const CHAT: &str = "/modhost/1/chat/proto";

/// A broker with the Waku kind registered against one shared mock network.
pub struct TestHost {
    pub broker: Broker,
    pub mock: Arc<MockWaku>,
}

impl TestHost {
    /// Callbacks arrive on a background thread, as with the real library.
    pub fn new() -> Self {
        Self::with_delivery(Delivery::Worker)
    }

    pub fn with_delivery(delivery: Delivery) -> Self {
        Self::with_config(BrokerConfig::default(), delivery)
    }

    pub fn with_config(config: BrokerConfig, delivery: Delivery) -> Self {
        let mock = Arc::new(MockWaku::with_delivery(delivery));
        let broker = Broker::new(config);
        plugin_waku::register_waku(&broker, mock.clone());
        Self { broker, mock }
    }

    /// Instantiates and initializes a module without starting it.
    pub async fn add_initialized(&self, name: &str) -> Arc<dyn Module> {
        let module = self
            .broker
            .instantiate(name, plugin_waku::MODULE_KIND)
            .await
            .expect("instantiate");
        module
            .initialize(json!({ "port": 60000 }))
            .await
            .expect("initialize");
        module
    }

    /// Instantiates, initializes, and starts a module.
    pub async fn add_started(&self, name: &str) -> Arc<dyn Module> {
        let module = self.add_initialized(name).await;
        module.start().await.expect("start");
        module
    }

    pub async fn client(&self, name: &str) -> ModuleClient {
        self.broker.proxy().client(name).await.expect("client")
    }

    /// Attaches a channel listener to a module.
    pub async fn listen(&self, name: &str) -> UnboundedReceiver<Arc<Event>> {
        let (listener, rx) = ChannelListener::new(&format!("test-{name}"));
        self.client(name)
            .await
            .on_event(listener)
            .await
            .expect("attach listener");
        rx
    }
}

/// Next event within `within`, if any.
pub async fn next_event(rx: &mut UnboundedReceiver<Arc<Event>>, within: Duration) -> Option<Arc<Event>> {
    tokio::time::timeout(within, rx.recv()).await.ok().flatten()
}

/// Next event of `kind` within `within`, skipping others.
pub async fn next_of_kind(
    rx: &mut UnboundedReceiver<Arc<Event>>,
    kind: EventKind,
    within: Duration,
) -> Option<Arc<Event>> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv()).await.ok().flatten()?;
        if event.kind == kind {
            return Some(event);
        }
    }
}

/// Every event that arrives within `window`.
pub async fn drain_for(rx: &mut UnboundedReceiver<Arc<Event>>, window: Duration) -> Vec<Arc<Event>> {
    let deadline = tokio::time::Instant::now() + window;
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        events.push(event);
    }
    events
}

/// Polls `check` until it holds, panicking after `within`.
pub async fn wait_until<F, Fut>(within: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {within:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
