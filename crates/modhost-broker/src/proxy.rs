//! Client proxy: invoke module operations by name.
//!
//! Callers hold no compile-time reference to the module type. Operations
//! are named, arguments and results are JSON, and the target's declared
//! capabilities decide what is allowed.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use modhost_core::error::{AppError, AppResult};
use modhost_core::events::Event;
use modhost_core::traits::Module;
use modhost_core::types::{
    ContentFilter, CorrelationId, ListenerId, Operation, PublishRequest, QueryParams,
    SubscriptionId,
};

use crate::broker::{Broker, BrokerInner};
use crate::relay::{ChannelListener, EventListener};

#[derive(Debug, Deserialize)]
struct SubscribeArgs {
    topic: String,
    #[serde(default)]
    filter: Option<ContentFilter>,
}

#[derive(Debug, Deserialize)]
struct UnsubscribeArgs {
    subscription_id: SubscriptionId,
}

/// By-name handle onto the broker's modules.
///
/// Holds the broker weakly so listeners can keep a proxy without keeping
/// the broker alive.
#[derive(Debug, Clone)]
pub struct ClientProxy {
    broker: Weak<BrokerInner>,
}

impl ClientProxy {
    pub(crate) fn new(broker: &Broker) -> Self {
        Self {
            broker: broker.downgrade(),
        }
    }

    fn broker(&self) -> AppResult<Broker> {
        self.broker
            .upgrade()
            .map(Broker::from_inner)
            .ok_or_else(|| AppError::internal("Broker has shut down"))
    }

    /// Invokes `operation` on `module` with JSON arguments.
    ///
    /// Fails with `ModuleNotFound` if nothing is registered under `module`
    /// and `OperationNotSupported` if the module does not declare
    /// `operation`.
    pub async fn invoke(&self, module: &str, operation: &str, args: Value) -> AppResult<Value> {
        let broker = self.broker()?;
        let target = broker
            .get(module)
            .await
            .ok_or_else(|| AppError::module_not_found(module))?;

        let op = operation
            .parse::<Operation>()
            .ok()
            .filter(|op| target.info().supports(*op))
            .ok_or_else(|| AppError::operation_not_supported(module, operation))?;

        debug!(module = %module, operation = %op, "Proxy invoke");

        match op {
            Operation::Initialize => {
                target.initialize(args).await?;
                Ok(Value::Null)
            }
            Operation::Start => {
                target.start().await?;
                Ok(Value::Null)
            }
            Operation::Stop => {
                target.stop().await?;
                Ok(Value::Null)
            }
            Operation::Subscribe => {
                let args: SubscribeArgs = parse_args(operation, args)?;
                let id = target.subscribe(&args.topic, args.filter).await?;
                Ok(json!({ "subscription_id": id }))
            }
            Operation::Unsubscribe => {
                let args: UnsubscribeArgs = parse_args(operation, args)?;
                target.unsubscribe(args.subscription_id).await?;
                Ok(Value::Null)
            }
            Operation::Publish => {
                let request: PublishRequest = parse_args(operation, args)?;
                let id = target.publish(request).await?;
                Ok(json!({ "correlation_id": id }))
            }
            Operation::Query => {
                let params: QueryParams = parse_args(operation, args)?;
                let id = target.query(params).await?;
                Ok(json!({ "correlation_id": id }))
            }
            Operation::Teardown => {
                broker.teardown_module(module).await?;
                Ok(Value::Null)
            }
            Operation::State => Ok(json!({ "state": target.state() })),
        }
    }

    /// Resolves a typed client for one module.
    pub async fn client(&self, module: &str) -> AppResult<ModuleClient> {
        let broker = self.broker()?;
        let target = broker
            .get(module)
            .await
            .ok_or_else(|| AppError::module_not_found(module))?;
        Ok(ModuleClient {
            name: module.to_string(),
            module: target,
            request_timeout: broker.config().request_timeout(),
            proxy: self.clone(),
        })
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(operation: &str, args: Value) -> AppResult<T> {
    serde_json::from_value(args).map_err(|e| {
        AppError::invalid_config(format!("Invalid arguments for '{operation}': {e}"))
    })
}

/// Typed handle onto one module, obtained through [`ClientProxy::client`].
#[derive(Debug, Clone)]
pub struct ModuleClient {
    name: String,
    module: Arc<dyn Module>,
    request_timeout: Duration,
    proxy: ClientProxy,
}

impl ModuleClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    /// Attaches a listener to this module's events.
    pub async fn on_event(&self, listener: Arc<dyn EventListener>) -> AppResult<ListenerId> {
        self.proxy
            .broker()?
            .subscribe_to_events(&self.name, listener)
            .await
    }

    /// Detaches a listener attached with [`ModuleClient::on_event`].
    pub fn off_event(&self, listener: ListenerId) -> bool {
        self.proxy
            .broker()
            .map(|broker| broker.unsubscribe(&self.name, listener))
            .unwrap_or(false)
    }

    /// Publishes and waits for the delivery acknowledgement.
    pub async fn publish_and_wait(&self, request: PublishRequest) -> AppResult<Arc<Event>> {
        let id = self.module.publish(request).await?;
        self.module.await_result(id, self.request_timeout).await
    }

    /// Runs a query and collects every result event up to and including
    /// the completion marker.
    pub async fn query_all(&self, params: QueryParams, timeout: Duration) -> AppResult<Vec<Arc<Event>>> {
        let (listener, mut rx) = ChannelListener::new("query-collector");
        let listener_id = self.on_event(listener).await?;

        let outcome = self.collect_query(params, timeout, &mut rx).await;
        self.off_event(listener_id);
        outcome
    }

    async fn collect_query(
        &self,
        params: QueryParams,
        timeout: Duration,
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<Arc<Event>>,
    ) -> AppResult<Vec<Arc<Event>>> {
        let id: CorrelationId = self.module.query(params).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut results = Vec::new();

        loop {
            let event = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(AppError::disposed(&self.name)),
                Err(_) => {
                    return Err(AppError::timed_out(format!(
                        "Query {id} on '{}' did not complete within {}ms",
                        self.name,
                        timeout.as_millis()
                    )));
                }
            };
            if event.correlation_id != Some(id) {
                continue;
            }
            if let Some(err) = event.to_error() {
                return Err(err);
            }
            let terminal = event.terminal;
            results.push(event);
            if terminal {
                return Ok(results);
            }
        }
    }
}
