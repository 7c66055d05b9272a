//! Event relay workers.
//!
//! Every registered module gets one relay channel:
//!
//! - The module's [`EventSink`] feeds an unbounded queue drained by a single
//!   worker task, so events keep the order the library produced them in.
//! - The worker copies each event, in listener registration order, into a
//!   private queue per listener. Each listener drains its queue on its own
//!   task, bounded by the configured listener timeout.
//! - Dispatching only enqueues. Listeners may call back into any module,
//!   including the one whose event they are handling.
//! - When the channel closes, whether through [`EventRelay::close`] or the
//!   module closing its sink, the worker releases every listener once their
//!   queued events are handled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use modhost_core::config::BrokerConfig;
use modhost_core::error::{AppError, AppResult};
use modhost_core::events::{Event, EventSink, RelayMessage};
use modhost_core::types::ListenerId;

use super::listener::EventListener;

#[derive(Debug)]
struct ListenerEntry {
    id: ListenerId,
    name: String,
    tx: mpsc::UnboundedSender<Arc<Event>>,
    depth: Arc<AtomicUsize>,
}

/// Ordered listener list of one module.
#[derive(Debug, Default)]
struct ListenerSet {
    entries: RwLock<Vec<ListenerEntry>>,
}

impl ListenerSet {
    /// Queues the event for every listener. Returns how many accepted it.
    fn fan_out(&self, module: &str, event: &Arc<Event>, backlog_warn: usize) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            for entry in entries.iter() {
                let depth = entry.depth.fetch_add(1, Ordering::AcqRel) + 1;
                if depth == backlog_warn {
                    warn!(
                        module = %module,
                        listener = %entry.name,
                        depth,
                        "Listener is falling behind"
                    );
                }
                if entry.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(entry.id);
                }
            }
        }

        if !closed.is_empty() {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.retain(|entry| !closed.contains(&entry.id));
        }
        delivered
    }

    fn push(&self, entry: ListenerEntry) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drops every listener queue. Listener tasks finish what is queued.
    fn clear(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let count = entries.len();
        entries.clear();
        count
    }
}

/// Runs on the relay worker after its channel closed.
pub type CloseHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

type ChannelMap = RwLock<HashMap<String, RelayChannel>>;

#[derive(Debug)]
struct RelayChannel {
    tx: mpsc::UnboundedSender<RelayMessage>,
    listeners: Arc<ListenerSet>,
    worker: JoinHandle<()>,
}

/// Routes module events to their listeners.
#[derive(Debug)]
pub struct EventRelay {
    channels: Arc<ChannelMap>,
    listener_timeout: Duration,
    backlog_warn: usize,
}

impl EventRelay {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            listener_timeout: config.listener_timeout(),
            backlog_warn: config.listener_backlog_warn.max(1),
        }
    }

    /// Opens the relay channel of a module and returns the sink feeding it.
    ///
    /// Must be called from within a Tokio runtime. A stale channel under the
    /// same name is closed first.
    pub fn open(&self, module: &str) -> EventSink {
        self.open_with_hook(module, None)
    }

    /// Like [`open`](Self::open), running `on_closed` once the channel has
    /// closed and its listeners are released.
    pub fn open_with_hook(&self, module: &str, on_closed: Option<CloseHook>) -> EventSink {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = Arc::new(ListenerSet::default());

        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        let worker = tokio::spawn(run_worker(
            module.to_string(),
            rx,
            listeners.clone(),
            Arc::downgrade(&self.channels),
            on_closed,
            self.backlog_warn,
        ));

        let previous = channels.insert(
                module.to_string(),
                RelayChannel {
                    tx: tx.clone(),
                    listeners,
                    worker,
                },
            );
        drop(channels);
        if let Some(previous) = previous {
            let _ = previous.tx.send(RelayMessage::Closed);
        }

        debug!(module = %module, "Relay channel opened");
        EventSink::new(module, tx)
    }

    /// Closes the relay channel of a module. Queued events are still
    /// delivered. Idempotent.
    pub fn close(&self, module: &str) -> bool {
        let channel = self
            .channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(module);
        match channel {
            Some(channel) => {
                let _ = channel.tx.send(RelayMessage::Closed);
                debug!(module = %module, "Relay channel closed");
                true
            }
            None => false,
        }
    }

    /// Queues an event on the channel named by its source.
    ///
    /// Never waits on listeners. Returns `false` if the source has no
    /// open channel, in which case the event is dropped.
    pub fn dispatch(&self, event: Arc<Event>) -> bool {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        match channels.get(&event.source) {
            Some(channel) => channel.tx.send(RelayMessage::Event(event)).is_ok(),
            None => {
                warn!(
                    module = %event.source,
                    kind = ?event.kind,
                    "Dispatch for a module with no relay channel; event dropped"
                );
                false
            }
        }
    }

    /// Attaches a listener to a module. Delivery order among listeners
    /// follows attachment order.
    pub fn add_listener(
        &self,
        module: &str,
        listener: Arc<dyn EventListener>,
    ) -> AppResult<ListenerId> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        let channel = channels
            .get(module)
            .ok_or_else(|| AppError::module_not_found(module))?;

        let id = ListenerId::new();
        let name = listener.name().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_listener(
            module.to_string(),
            listener,
            rx,
            depth.clone(),
            self.listener_timeout,
        ));

        channel.listeners.push(ListenerEntry {
            id,
            name: name.clone(),
            tx,
            depth,
        });

        info!(module = %module, listener = %name, listener_id = %id, "Listener attached");
        Ok(id)
    }

    /// Detaches a listener. Events already queued for it are still handled.
    pub fn remove_listener(&self, module: &str, id: ListenerId) -> bool {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        let removed = channels
            .get(module)
            .map(|channel| channel.listeners.remove(id))
            .unwrap_or(false);
        if removed {
            info!(module = %module, listener_id = %id, "Listener detached");
        }
        removed
    }

    pub fn listener_count(&self, module: &str) -> usize {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels
            .get(module)
            .map(|channel| channel.listeners.len())
            .unwrap_or(0)
    }

    pub fn is_open(&self, module: &str) -> bool {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels
            .get(module)
            .map(|channel| !channel.worker.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for EventRelay {
    fn drop(&mut self) {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        for (_, channel) in channels.drain() {
            let _ = channel.tx.send(RelayMessage::Closed);
        }
    }
}

async fn run_worker(
    module: String,
    mut rx: mpsc::UnboundedReceiver<RelayMessage>,
    listeners: Arc<ListenerSet>,
    channels: Weak<ChannelMap>,
    on_closed: Option<CloseHook>,
    backlog_warn: usize,
) {
    while let Some(message) = rx.recv().await {
        match message {
            RelayMessage::Event(event) => {
                let delivered = listeners.fan_out(&module, &event, backlog_warn);
                if delivered == 0 {
                    warn!(
                        module = %module,
                        kind = ?event.kind,
                        status = event.status,
                        correlation_id = ?event.correlation_id,
                        "No listeners registered; event discarded"
                    );
                } else {
                    trace!(module = %module, kind = ?event.kind, delivered, "Event relayed");
                }
            }
            RelayMessage::Closed => break,
        }
    }

    // Forget this channel unless a newer one replaced it.
    if let Some(channels) = channels.upgrade() {
        let mut channels = channels.write().unwrap_or_else(|e| e.into_inner());
        if channels
            .get(&module)
            .is_some_and(|channel| Arc::ptr_eq(&channel.listeners, &listeners))
        {
            channels.remove(&module);
        }
    }
    let released = listeners.clear();
    debug!(module = %module, released, "Relay worker stopped");

    if let Some(on_closed) = on_closed {
        on_closed().await;
    }
}

async fn run_listener(
    module: String,
    listener: Arc<dyn EventListener>,
    mut rx: mpsc::UnboundedReceiver<Arc<Event>>,
    depth: Arc<AtomicUsize>,
    timeout: Duration,
) {
    while let Some(event) = rx.recv().await {
        depth.fetch_sub(1, Ordering::AcqRel);
        if tokio::time::timeout(timeout, listener.on_event(event))
            .await
            .is_err()
        {
            error!(
                module = %module,
                listener = %listener.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Listener timed out; skipping event"
            );
        }
    }
    trace!(module = %module, listener = %listener.name(), "Listener task finished");
}
