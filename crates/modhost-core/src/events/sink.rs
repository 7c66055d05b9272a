//! Channel a module uses to hand events to the broker's relay worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::Event;

/// Message drained by a module's relay worker.
#[derive(Debug)]
pub enum RelayMessage {
    Event(Arc<Event>),
    /// The module was torn down. The worker drains what is queued and exits.
    Closed,
}

/// Producer half of a module's ordered event path.
///
/// Sending never blocks, so it is safe to call from a library callback
/// thread or from inside a listener.
#[derive(Debug, Clone)]
pub struct EventSink {
    module: String,
    tx: mpsc::UnboundedSender<RelayMessage>,
}

impl EventSink {
    pub fn new(module: impl Into<String>, tx: mpsc::UnboundedSender<RelayMessage>) -> Self {
        Self {
            module: module.into(),
            tx,
        }
    }

    /// Creates a sink with its receiving end, for hosting a module without a broker.
    pub fn channel(module: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<RelayMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(module, tx), rx)
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Queues an event. Returns `false` if the relay is gone.
    pub fn emit(&self, event: Arc<Event>) -> bool {
        match self.tx.send(RelayMessage::Event(event)) {
            Ok(()) => true,
            Err(mpsc::error::SendError(RelayMessage::Event(event))) => {
                warn!(
                    module = %self.module,
                    kind = ?event.kind,
                    "Relay closed; event discarded"
                );
                false
            }
            Err(_) => false,
        }
    }

    /// Tells the relay that the module is gone.
    pub fn close(&self) {
        let _ = self.tx.send(RelayMessage::Closed);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
