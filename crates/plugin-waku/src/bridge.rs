//! Cross-module message forwarding.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use modhost_broker::proxy::ClientProxy;
use modhost_broker::relay::EventListener;
use modhost_core::events::{Event, EventKind};
use modhost_core::types::PublishRequest;

/// Republishes messages received by one module onto a topic of another.
///
/// Attach it to the source module with
/// [`ModuleClient::on_event`](modhost_broker::proxy::ModuleClient::on_event).
/// The target is reached through the [`ClientProxy`], by name.
#[derive(Debug)]
pub struct RelayBridge {
    name: String,
    proxy: ClientProxy,
    source_topic: Option<String>,
    target_module: String,
    target_topic: String,
    forwarded: AtomicUsize,
    failed: AtomicUsize,
}

impl RelayBridge {
    pub fn new(proxy: ClientProxy, target_module: &str, target_topic: &str) -> Self {
        Self {
            name: format!("bridge->{target_module}:{target_topic}"),
            proxy,
            source_topic: None,
            target_module: target_module.to_string(),
            target_topic: target_topic.to_string(),
            forwarded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Only forward messages received on `topic`.
    pub fn from_topic(mut self, topic: &str) -> Self {
        self.source_topic = Some(topic.to_string());
        self
    }

    pub fn into_listener(self) -> Arc<dyn EventListener> {
        Arc::new(self)
    }

    /// Messages handed to the target module so far.
    pub fn forwarded(&self) -> usize {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventListener for RelayBridge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: Arc<Event>) {
        if event.kind != EventKind::MessageReceived {
            return;
        }
        let Some(message) = event.payload.as_message() else {
            return;
        };
        if self
            .source_topic
            .as_deref()
            .is_some_and(|topic| topic != message.topic)
        {
            return;
        }

        let request = PublishRequest::new(
            self.target_topic.as_str(),
            message.content_topic.as_str(),
            message.payload.clone(),
        );
        let args = match serde_json::to_value(&request) {
            Ok(args) => args,
            Err(e) => {
                warn!(bridge = %self.name, error = %e, "Cannot encode forwarded message");
                self.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.proxy.invoke(&self.target_module, "publish", args).await {
            Ok(_) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    bridge = %self.name,
                    source = %event.source,
                    hash = ?message.hash,
                    "Message forwarded"
                );
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(bridge = %self.name, source = %event.source, error = %e, "Forwarding failed");
            }
        }
    }
}
