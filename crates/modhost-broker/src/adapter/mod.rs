//! Callback adapter.
//!
//! Native libraries report results by calling a function pointer with
//! `(status, message, user_data)` at some later time on some thread of
//! their own. The adapter turns each of those invocations into typed
//! [`Event`](modhost_core::events::Event)s:
//!
//! - `user_data` is an integer token into a process-wide route table,
//!   never a pointer to Rust memory.
//! - A route remembers which request it belongs to and holds only a weak
//!   reference to its adapter, so callbacks that arrive after teardown
//!   are dropped.
//! - Request routes fire once. Repeat invocations are logged and dropped.

pub mod callback;
pub mod correlation;
mod routes;

use std::fmt;

use modhost_core::events::{EventKind, EventPayload};

pub use callback::{CallbackAdapter, CallbackHandle, PendingRequest};
pub use correlation::CorrelationTable;
pub use routes::live_routes;

/// The library request a callback completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Create,
    Start,
    Stop,
    Subscribe,
    Unsubscribe,
    Publish,
    Query,
    /// The context-wide event stream. The only repeating route.
    Events,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Publish => "publish",
            Self::Query => "query",
            Self::Events => "events",
        }
    }

    /// Whether a callback of this kind may fire more than once.
    pub fn is_repeating(self) -> bool {
        matches!(self, Self::Events)
    }

    /// Default event kind for a plain acknowledgement of this request.
    pub fn ack_kind(self) -> EventKind {
        match self {
            Self::Create | Self::Start | Self::Stop => EventKind::LifecycleResult,
            Self::Subscribe | Self::Unsubscribe | Self::Publish => EventKind::RequestAck,
            Self::Query => EventKind::QueryResult,
            Self::Events => EventKind::MessageReceived,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event body produced by a decoder, before the adapter stamps source,
/// correlation id, and timestamp onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub kind: EventKind,
    pub status: i32,
    pub payload: EventPayload,
    pub terminal: bool,
}

impl DecodedEvent {
    pub fn new(kind: EventKind, status: i32, payload: EventPayload) -> Self {
        Self {
            kind,
            status,
            payload,
            terminal: false,
        }
    }

    /// Marks this event as the last one of its request.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

/// Module-specific translation of raw callback invocations.
///
/// Called on the library's thread. Must not block and must not call back
/// into the library.
pub trait CallbackDecoder: Send + Sync + fmt::Debug {
    /// Decodes one invocation into zero or more events.
    ///
    /// For single-shot requests the adapter guarantees that exactly one of
    /// the returned events (the last) is terminal, and synthesizes one if
    /// nothing is returned.
    fn decode(&self, request: RequestKind, status: i32, message: &str) -> Vec<DecodedEvent>;
}
