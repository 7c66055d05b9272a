//! Listener trait and the two stock listener implementations.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use modhost_core::events::Event;

/// Receives the events of one module, in production order.
///
/// Each listener runs on its own task, so a slow listener only delays
/// itself.
#[async_trait]
pub trait EventListener: Send + Sync + std::fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &str {
        "listener"
    }

    /// Handles one event.
    async fn on_event(&self, event: Arc<Event>);
}

type BoxedHandler =
    Arc<dyn Fn(Arc<Event>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A closure-based listener for quick listener creation.
pub struct ClosureListener {
    name: String,
    handler: BoxedHandler,
}

impl std::fmt::Debug for ClosureListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureListener")
            .field("name", &self.name)
            .field("handler", &"<closure>")
            .finish()
    }
}

impl ClosureListener {
    pub fn new<F, Fut>(name: &str, handler: F) -> Arc<Self>
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            handler: Arc::new(move |event| Box::pin(handler(event))),
        })
    }
}

#[async_trait]
impl EventListener for ClosureListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: Arc<Event>) {
        (self.handler)(event).await
    }
}

/// Forwards every event into an unbounded channel.
#[derive(Debug)]
pub struct ChannelListener {
    name: String,
    tx: mpsc::UnboundedSender<Arc<Event>>,
}

impl ChannelListener {
    pub fn new(name: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Arc<Event>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                name: name.to_string(),
                tx,
            }),
            rx,
        )
    }
}

#[async_trait]
impl EventListener for ChannelListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: Arc<Event>) {
        let _ = self.tx.send(event);
    }
}
