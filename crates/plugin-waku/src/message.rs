//! JSON documents exchanged with libwaku.
//!
//! Node events arrive as
//! `{"eventType": "message", "messageHash", "pubsubTopic", "wakuMessage": {...}}`
//! on the event callback. Store queries are sent as one JSON object and
//! answered with a page of stored messages plus an optional cursor.

use serde::{Deserialize, Serialize};

use modhost_core::error::{AppError, AppResult};
use modhost_core::events::MessageEnvelope;
use modhost_core::types::{QueryParams, encoding};

/// A decoded node event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A message received on a relay topic or through a filter subscription.
    Message(MessageEnvelope),
    /// Any other event type, e.g. `connection_change`.
    Other(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    event_type: String,
    #[serde(default)]
    message_hash: Option<String>,
    #[serde(default)]
    pubsub_topic: Option<String>,
    #[serde(default)]
    waku_message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    payload: String,
    #[serde(default)]
    content_topic: String,
    #[serde(default)]
    timestamp: Option<i64>,
}

impl WireMessage {
    fn into_envelope(self, topic: String, hash: Option<String>) -> AppResult<MessageEnvelope> {
        let payload = encoding::decode(&self.payload)
            .map_err(|e| AppError::serialization(format!("Message payload is not base64: {e}")))?;
        Ok(MessageEnvelope {
            topic,
            content_topic: self.content_topic,
            payload,
            timestamp: self.timestamp,
            hash,
        })
    }
}

/// Parses one event-callback document.
pub fn parse_event(json: &str) -> AppResult<NodeEvent> {
    let wire: WireEvent = serde_json::from_str(json)?;
    if wire.event_type != "message" {
        return Ok(NodeEvent::Other(wire.event_type));
    }

    let message = wire
        .waku_message
        .ok_or_else(|| AppError::serialization("Message event without wakuMessage"))?;
    let topic = wire
        .pubsub_topic
        .ok_or_else(|| AppError::serialization("Message event without pubsubTopic"))?;
    Ok(NodeEvent::Message(message.into_envelope(topic, wire.message_hash)?))
}

/// The `waku_store_query` request document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubsub_topic: Option<String>,
    pub content_topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination_cursor: Option<String>,
    pub pagination_forward: bool,
    pub include_data: bool,
}

impl From<&QueryParams> for StoreQuery {
    fn from(params: &QueryParams) -> Self {
        Self {
            pubsub_topic: params.topic.clone(),
            content_topics: params.content_topics.clone(),
            start_time: params.start_time,
            end_time: params.end_time,
            pagination_limit: params.page_size,
            pagination_cursor: params.cursor.clone(),
            pagination_forward: params.ascending,
            include_data: true,
        }
    }
}

impl StoreQuery {
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStoreResponse {
    #[serde(default)]
    status_code: Option<u32>,
    #[serde(default)]
    status_desc: Option<String>,
    #[serde(default)]
    messages: Vec<WireStoredMessage>,
    #[serde(default)]
    pagination_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStoredMessage {
    #[serde(default)]
    message_hash: Option<String>,
    #[serde(default)]
    pubsub_topic: Option<String>,
    message: WireMessage,
}

/// One page of store results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePage {
    pub messages: Vec<MessageEnvelope>,
    /// Present when more results are available.
    pub cursor: Option<String>,
}

/// Parses a `waku_store_query` response.
///
/// `fallback_topic` is used for entries that omit their pubsub topic.
pub fn parse_store_response(json: &str, fallback_topic: Option<&str>) -> AppResult<StorePage> {
    let wire: WireStoreResponse = serde_json::from_str(json)?;
    if let Some(code) = wire.status_code.filter(|c| *c != 200) {
        return Err(AppError::library(
            code as i32,
            format!(
                "Store query failed: {}",
                wire.status_desc.as_deref().unwrap_or("no description")
            ),
        ));
    }

    let messages = wire
        .messages
        .into_iter()
        .map(|entry| {
            let topic = entry
                .pubsub_topic
                .or_else(|| fallback_topic.map(str::to_string))
                .unwrap_or_default();
            entry.message.into_envelope(topic, entry.message_hash)
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(StorePage {
        messages,
        cursor: wire.pagination_cursor,
    })
}
