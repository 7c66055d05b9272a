//! The Waku module: one libwaku node behind the module capability interface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use modhost_broker::adapter::{CallbackAdapter, CallbackHandle, PendingRequest, RequestKind};
use modhost_broker::module_info;
use modhost_core::config::BrokerConfig;
use modhost_core::error::{AppError, AppResult, ErrorKind};
use modhost_core::events::{Event, EventSink};
use modhost_core::traits::{Module, ModuleInfo};
use modhost_core::types::{
    ContentFilter, CorrelationId, ModuleState, PublishRequest, QueryParams, SubscriptionId,
    encoding,
};

use crate::config::WakuConfig;
use crate::decoder::WakuDecoder;
use crate::error::WakuError;
use crate::ffi::{WakuBindings, WakuContext};
use crate::message::StoreQuery;
use crate::subscription::{LibraryAction, SubscriptionTable};

#[derive(Debug)]
struct Node {
    state: ModuleState,
    /// Set from `waku_new` until teardown.
    context: Option<Arc<WakuContext>>,
    config: Option<WakuConfig>,
}

/// A Waku node managed by the broker.
///
/// Protocol calls hold a read lock on the node for the duration of the
/// (non-blocking) library call, so teardown cannot free the context
/// underneath them. Lifecycle transitions are serialized separately and
/// only take the write lock to commit the new state.
#[derive(Debug)]
pub struct WakuModule {
    name: String,
    bindings: Arc<dyn WakuBindings>,
    adapter: CallbackAdapter,
    node: RwLock<Node>,
    subscriptions: Arc<RwLock<SubscriptionTable>>,
    /// Raised by the decoder when create/start fails asynchronously.
    faulted: Arc<AtomicBool>,
    transition: tokio::sync::Mutex<()>,
    lifecycle_timeout: Duration,
}

impl WakuModule {
    pub fn new(name: impl Into<String>, bindings: Arc<dyn WakuBindings>, broker: &BrokerConfig) -> Self {
        let name = name.into();
        let subscriptions = Arc::new(RwLock::new(SubscriptionTable::new()));
        let faulted = Arc::new(AtomicBool::new(false));
        let decoder = Arc::new(WakuDecoder::new(subscriptions.clone(), faulted.clone()));

        Self {
            adapter: CallbackAdapter::new(name.clone(), decoder, broker.completed_retention),
            name,
            bindings,
            node: RwLock::new(Node {
                state: ModuleState::Unloaded,
                context: None,
                config: None,
            }),
            subscriptions,
            faulted,
            transition: tokio::sync::Mutex::new(()),
            lifecycle_timeout: broker.request_timeout(),
        }
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Requests still waiting for their library callback.
    pub fn in_flight(&self) -> usize {
        self.adapter.in_flight()
    }

    fn read(&self) -> RwLockReadGuard<'_, Node> {
        self.node.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Node> {
        self.node.write().unwrap_or_else(|e| e.into_inner())
    }

    fn effective_state(&self, node: &Node) -> ModuleState {
        let faulted = self.faulted.load(Ordering::Acquire);
        match node.state {
            ModuleState::Initialized | ModuleState::Started | ModuleState::Stopped if faulted => {
                ModuleState::Failed
            }
            state => state,
        }
    }

    /// Precondition of every protocol operation.
    fn require_started(&self, node: &Node) -> AppResult<()> {
        match self.effective_state(node) {
            ModuleState::Started => Ok(()),
            ModuleState::Unloaded => Err(AppError::not_initialized(&self.name)),
            ModuleState::Initialized | ModuleState::Stopped => Err(AppError::not_started(&self.name)),
            ModuleState::Failed => Err(AppError::module_failed(&self.name)),
            ModuleState::TornDown => Err(AppError::disposed(&self.name)),
        }
    }

    /// Registers a request and hands it to the library. A synchronous
    /// refusal withdraws the request, so no event follows.
    fn submit<F>(&self, node: &Node, request: RequestKind, call: F) -> AppResult<PendingRequest>
    where
        F: FnOnce(&WakuContext, CallbackHandle) -> Result<(), WakuError>,
    {
        let context = node
            .context
            .as_deref()
            .ok_or_else(|| AppError::not_initialized(&self.name))?;
        let pending = self.adapter.begin(request)?;
        if let Err(e) = call(context, pending.handle) {
            self.adapter.abandon(&pending);
            warn!(module = %self.name, request = %request, error = %e, "libwaku refused request");
            return Err(e.into());
        }
        Ok(pending)
    }

    fn create_node(&self, config: &WakuConfig) -> AppResult<PendingRequest> {
        let pending = self.adapter.begin(RequestKind::Create)?;
        let context = match WakuContext::create(
            self.bindings.clone(),
            &config.to_library_json(),
            pending.handle,
        ) {
            Ok(context) => Arc::new(context),
            Err(e) => {
                self.adapter.abandon(&pending);
                return Err(e.into());
            }
        };
        context.set_event_callback(self.adapter.event_callback())?;

        let mut node = self.write();
        if node.state == ModuleState::TornDown {
            context.release();
            return Err(AppError::disposed(&self.name));
        }
        node.context = Some(context);
        Ok(pending)
    }

    fn lifecycle_request<F>(&self, request: RequestKind, call: F) -> AppResult<PendingRequest>
    where
        F: FnOnce(&WakuContext, CallbackHandle) -> Result<(), WakuError>,
    {
        let node = self.read();
        self.submit(&node, request, call)
    }

    fn commit(&self, state: ModuleState) -> AppResult<()> {
        let mut node = self.write();
        if node.state == ModuleState::TornDown {
            return Err(AppError::disposed(&self.name));
        }
        node.state = state;
        Ok(())
    }

    fn mark_failed(&self, error: &AppError) {
        let mut node = self.write();
        if node.state != ModuleState::TornDown {
            warn!(module = %self.name, previous = %node.state, error = %error, "Waku node failed");
            node.state = ModuleState::Failed;
        }
    }

    /// Returns the new subscription and, when the library was asked to
    /// subscribe, the request to watch for a late failure.
    fn submit_subscribe(
        &self,
        topic: &str,
        filter: Option<ContentFilter>,
    ) -> AppResult<(SubscriptionId, Option<CorrelationId>)> {
        let node = self.read();
        self.require_started(&node)?;
        require_non_empty("topic", topic)?;

        let (subscription, action) = self
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add(topic, filter)?;

        let submitted = match action {
            LibraryAction::RelaySubscribe => self
                .submit(&node, RequestKind::Subscribe, |ctx, cb| ctx.relay_subscribe(topic, cb))
                .map(|pending| Some(pending.correlation_id)),
            LibraryAction::FilterSubscribe => {
                let content_topics = subscription
                    .filter
                    .as_ref()
                    .map(|f| f.content_topics.clone())
                    .unwrap_or_default();
                self.submit(&node, RequestKind::Subscribe, |ctx, cb| {
                    ctx.filter_subscribe(topic, &content_topics, cb)
                })
                .map(|pending| Some(pending.correlation_id))
            }
            LibraryAction::None | LibraryAction::RelayUnsubscribe => Ok(None),
        };

        let request = match submitted {
            Ok(request) => request,
            Err(e) => {
                let _ = self
                    .subscriptions
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(subscription.id);
                return Err(e);
            }
        };

        debug!(
            module = %self.name,
            subscription = %subscription.id,
            topic,
            protocol = ?subscription.protocol,
            "Subscribed"
        );
        Ok((subscription.id, request))
    }

    /// Drops the subscriptions that relied on `anchor` if the library fails
    /// the subscribe request after accepting it.
    fn watch_subscribe(&self, anchor: SubscriptionId, request: CorrelationId) {
        let adapter = self.adapter.clone();
        let subscriptions = self.subscriptions.clone();
        let name = self.name.clone();
        let timeout = self.lifecycle_timeout;

        tokio::spawn(async move {
            match adapter.wait_for(request, timeout).await {
                Err(e) if e.kind == ErrorKind::Library => {
                    let dropped = subscriptions
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .revoke(anchor);
                    warn!(
                        module = %name,
                        subscription = %anchor,
                        dropped = dropped.len(),
                        error = %e,
                        "libwaku failed subscribe request"
                    );
                }
                Err(e) => debug!(module = %name, subscription = %anchor, error = %e, "Subscribe result not observed"),
                Ok(_) => {}
            }
        });
    }

    fn submit_unsubscribe(&self, id: SubscriptionId) -> AppResult<()> {
        let node = self.read();
        self.require_started(&node)?;

        let (subscription, action) = self
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)?;

        if action == LibraryAction::RelayUnsubscribe {
            let withdrawn = self.submit(&node, RequestKind::Unsubscribe, |ctx, cb| {
                ctx.relay_unsubscribe(&subscription.topic, cb)
            });
            if let Err(e) = withdrawn {
                self.subscriptions
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .restore(subscription);
                return Err(e);
            }
        }
        debug!(module = %self.name, subscription = %id, topic = %subscription.topic, "Unsubscribed");
        Ok(())
    }

    fn submit_publish(&self, request: &PublishRequest) -> AppResult<CorrelationId> {
        let node = self.read();
        self.require_started(&node)?;
        require_non_empty("topic", &request.topic)?;
        require_non_empty("content_topic", &request.content_topic)?;

        let max = node
            .config
            .as_ref()
            .map(|c| c.max_message_size)
            .unwrap_or_else(|| WakuConfig::default().max_message_size);
        if request.payload.len() > max {
            return Err(AppError::payload_too_large(request.payload.len(), max));
        }

        let payload = encoding::encode(&request.payload);
        let pending = self.submit(&node, RequestKind::Publish, |ctx, cb| {
            ctx.relay_publish(
                &request.topic,
                &payload,
                &request.content_topic,
                request.timeout_ms.unwrap_or(0),
                cb,
            )
        })?;
        Ok(pending.correlation_id)
    }

    fn submit_query(&self, params: &QueryParams) -> AppResult<CorrelationId> {
        let node = self.read();
        self.require_started(&node)?;

        let query = StoreQuery::from(params).to_json()?;
        let pending = self.submit(&node, RequestKind::Query, |ctx, cb| ctx.store_query(&query, cb))?;
        Ok(pending.correlation_id)
    }
}

fn require_non_empty(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        Err(AppError::invalid_config(format!("'{field}' must not be empty")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Module for WakuModule {
    fn info(&self) -> ModuleInfo {
        module_info!(
            name: self.name,
            version: env!("CARGO_PKG_VERSION"),
            description: "Waku relay, filter and store node"
        )
    }

    fn state(&self) -> ModuleState {
        self.effective_state(&self.read())
    }

    fn attach(&self, sink: EventSink) {
        self.adapter.attach(sink);
    }

    async fn initialize(&self, config: Value) -> AppResult<()> {
        let _transition = self.transition.lock().await;
        match self.state() {
            ModuleState::Unloaded => {}
            ModuleState::TornDown => return Err(AppError::disposed(&self.name)),
            ModuleState::Failed => return Err(AppError::module_failed(&self.name)),
            _ => {
                return Err(AppError::invalid_config(format!(
                    "Module '{}' is already initialized",
                    self.name
                )));
            }
        }

        let config = WakuConfig::from_value(config)?;
        let pending = self.create_node(&config)?;
        info!(module = %self.name, host = %config.host, port = config.port, "Creating Waku node");

        match self
            .adapter
            .wait_for(pending.correlation_id, self.lifecycle_timeout)
            .await
        {
            Ok(_) => {
                let mut node = self.write();
                if node.state == ModuleState::TornDown {
                    return Err(AppError::disposed(&self.name));
                }
                node.state = ModuleState::Initialized;
                node.config = Some(config);
                info!(module = %self.name, "Waku node initialized");
                Ok(())
            }
            Err(e) if e.kind == ErrorKind::Disposed => Err(e),
            Err(e) => {
                self.mark_failed(&e);
                Err(e)
            }
        }
    }

    async fn start(&self) -> AppResult<()> {
        let _transition = self.transition.lock().await;
        let pending = match self.state() {
            ModuleState::Started => return Ok(()),
            ModuleState::Initialized | ModuleState::Stopped => {
                self.lifecycle_request(RequestKind::Start, |ctx, cb| ctx.start(cb))?
            }
            ModuleState::Unloaded => return Err(AppError::not_initialized(&self.name)),
            ModuleState::Failed => return Err(AppError::module_failed(&self.name)),
            ModuleState::TornDown => return Err(AppError::disposed(&self.name)),
        };

        match self
            .adapter
            .wait_for(pending.correlation_id, self.lifecycle_timeout)
            .await
        {
            Ok(_) => {
                self.commit(ModuleState::Started)?;
                info!(module = %self.name, "Waku node started");
                Ok(())
            }
            Err(e) => {
                if e.kind == ErrorKind::Library {
                    self.mark_failed(&e);
                }
                Err(e)
            }
        }
    }

    async fn stop(&self) -> AppResult<()> {
        let _transition = self.transition.lock().await;
        let pending = match self.state() {
            ModuleState::Stopped => return Ok(()),
            ModuleState::Started => self.lifecycle_request(RequestKind::Stop, |ctx, cb| ctx.stop(cb))?,
            ModuleState::Unloaded => return Err(AppError::not_initialized(&self.name)),
            ModuleState::Initialized => return Err(AppError::not_started(&self.name)),
            ModuleState::Failed => return Err(AppError::module_failed(&self.name)),
            ModuleState::TornDown => return Err(AppError::disposed(&self.name)),
        };

        self.adapter
            .wait_for(pending.correlation_id, self.lifecycle_timeout)
            .await?;
        self.commit(ModuleState::Stopped)?;
        let dropped = self
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!(module = %self.name, dropped, "Waku node stopped");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, filter: Option<ContentFilter>) -> AppResult<SubscriptionId> {
        let (id, request) = self.submit_subscribe(topic, filter)?;
        if let Some(request) = request {
            self.watch_subscribe(id, request);
        }
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> AppResult<()> {
        self.submit_unsubscribe(id)
    }

    async fn publish(&self, request: PublishRequest) -> AppResult<CorrelationId> {
        self.submit_publish(&request)
    }

    async fn query(&self, params: QueryParams) -> AppResult<CorrelationId> {
        self.submit_query(&params)
    }

    async fn await_result(&self, correlation_id: CorrelationId, timeout: Duration) -> AppResult<Arc<Event>> {
        self.adapter.wait_for(correlation_id, timeout).await
    }

    async fn teardown(&self) {
        // Waiters resolve with Disposed before the context goes away.
        self.adapter.detach();

        let (context, previous) = {
            let mut node = self.write();
            if node.state == ModuleState::TornDown {
                return;
            }
            let previous = node.state;
            node.state = ModuleState::TornDown;
            node.config = None;
            (node.context.take(), previous)
        };

        let released = context.is_some_and(|c| c.release());
        let dropped = self
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(sink) = self.adapter.sink() {
            sink.close();
        }
        info!(module = %self.name, previous = %previous, released, dropped, "Waku module torn down");
    }
}
