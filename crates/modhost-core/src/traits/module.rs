//! The capability interface every module exposes to the broker and to
//! client proxies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::events::{Event, EventSink};
use crate::types::id::{CorrelationId, SubscriptionId};
use crate::types::request::{ContentFilter, Operation, PublishRequest, QueryParams};
use crate::types::state::ModuleState;

/// Identity and capability set of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Registered module name.
    pub name: String,
    /// Semantic version of the module implementation.
    pub version: String,
    pub description: String,
    /// Operations reachable through a client proxy.
    pub capabilities: Vec<Operation>,
}

impl ModuleInfo {
    pub fn supports(&self, operation: Operation) -> bool {
        self.capabilities.contains(&operation)
    }
}

/// A stateful wrapper around one protocol library instance.
///
/// Protocol operations return as soon as the library has accepted the
/// request. Their outcome arrives later as an [`Event`] tagged with the
/// returned [`CorrelationId`]; use [`Module::await_result`] to wait for it.
///
/// Implementations reject operations whose lifecycle precondition does not
/// hold before calling into the library.
#[async_trait]
pub trait Module: Send + Sync + std::fmt::Debug {
    /// Returns the module identity and capabilities.
    fn info(&self) -> ModuleInfo;

    /// Returns the current lifecycle state.
    fn state(&self) -> ModuleState;

    /// Connects the module to its relay. Called by the broker on registration.
    fn attach(&self, sink: EventSink);

    /// `Unloaded -> Initialized`.
    async fn initialize(&self, config: serde_json::Value) -> AppResult<()>;

    /// `Initialized | Stopped -> Started`. No-op when already started.
    async fn start(&self) -> AppResult<()>;

    /// `Started -> Stopped`. Drops every active subscription.
    async fn stop(&self) -> AppResult<()>;

    async fn subscribe(
        &self,
        topic: &str,
        filter: Option<ContentFilter>,
    ) -> AppResult<SubscriptionId>;

    async fn unsubscribe(&self, id: SubscriptionId) -> AppResult<()>;

    /// Hands a message to the library. Delivery is acknowledged by event.
    async fn publish(&self, request: PublishRequest) -> AppResult<CorrelationId>;

    /// Starts a historical query. Results stream as events, the last one terminal.
    async fn query(&self, params: QueryParams) -> AppResult<CorrelationId>;

    /// Waits for the terminal event of a request.
    ///
    /// Fails with `Timeout` when the deadline passes, with `Disposed` when
    /// the module is torn down first, and with `Library` when the terminal
    /// event reports a failure.
    async fn await_result(
        &self,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> AppResult<Arc<Event>>;

    /// Releases the library context. Always succeeds and is idempotent.
    async fn teardown(&self);
}
