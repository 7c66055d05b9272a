//! Event model.
//!
//! An [`Event`] is produced once by a module's callback adapter and then
//! shared read-only, as `Arc<Event>`, with every listener of that module.

pub mod sink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::encoding::base64_bytes;
use crate::types::id::CorrelationId;

pub use self::sink::{EventSink, RelayMessage};

/// Status code the underlying libraries use for success.
pub const STATUS_OK: i32 = 0;

/// What an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Result of create/start/stop.
    LifecycleResult,
    /// Acknowledgement of subscribe/unsubscribe/publish.
    RequestAck,
    /// A message delivered on a subscribed topic.
    MessageReceived,
    /// One result of a historical query, or its completion marker.
    QueryResult,
    /// A library failure with no more specific shape.
    Error,
}

/// A message as delivered by a protocol library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub topic: String,
    pub content_topic: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Sender timestamp in nanoseconds since the Unix epoch.
    pub timestamp: Option<i64>,
    /// Library-assigned message hash.
    pub hash: Option<String>,
}

/// Event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventPayload {
    Empty,
    Text(String),
    Raw(#[serde(with = "base64_bytes")] Vec<u8>),
    Message(MessageEnvelope),
    Fields(serde_json::Value),
}

impl EventPayload {
    pub fn as_message(&self) -> Option<&MessageEnvelope> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_fields(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Fields(fields) => Some(fields),
            _ => None,
        }
    }
}

/// An immutable asynchronous notification from a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Name of the module that produced the event.
    pub source: String,
    pub kind: EventKind,
    /// Library status code; [`STATUS_OK`] on success.
    pub status: i32,
    pub payload: EventPayload,
    /// Request this event answers, if any.
    pub correlation_id: Option<CorrelationId>,
    /// Last event of its request. At most one per correlation id.
    pub terminal: bool,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(source: impl Into<String>, kind: EventKind, status: i32, payload: EventPayload) -> Self {
        Self {
            source: source.into(),
            kind,
            status,
            payload,
            correlation_id: None,
            terminal: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId, terminal: bool) -> Self {
        self.correlation_id = Some(correlation_id);
        self.terminal = terminal;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Converts a failed event into the library error it reports.
    pub fn to_error(&self) -> Option<AppError> {
        if self.is_success() {
            return None;
        }
        let detail = match &self.payload {
            EventPayload::Text(text) if !text.is_empty() => text.clone(),
            EventPayload::Fields(fields) => fields.to_string(),
            _ => format!("status {}", self.status),
        };
        Some(AppError::library(
            self.status,
            format!("Module '{}' reported failure: {detail}", self.source),
        ))
    }
}
