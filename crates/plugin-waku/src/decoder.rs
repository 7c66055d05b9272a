//! Translation of libwaku callbacks into module events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::json;
use tracing::{debug, trace, warn};

use modhost_broker::adapter::{CallbackDecoder, DecodedEvent, RequestKind};
use modhost_broker::decoded_event;
use modhost_broker::ffi::RET_ERR;
use modhost_core::events::{EventKind, EventPayload, STATUS_OK};

use crate::message::{self, NodeEvent};
use crate::subscription::SubscriptionTable;

/// Decoder for one Waku node.
///
/// Runs on libwaku's callback thread. Reads the subscription table to drop
/// messages nobody asked for, and raises `faulted` when node creation or
/// start fails asynchronously.
#[derive(Debug)]
pub struct WakuDecoder {
    subscriptions: Arc<RwLock<SubscriptionTable>>,
    faulted: Arc<AtomicBool>,
}

impl WakuDecoder {
    pub fn new(subscriptions: Arc<RwLock<SubscriptionTable>>, faulted: Arc<AtomicBool>) -> Self {
        Self {
            subscriptions,
            faulted,
        }
    }

    fn decode_node_event(&self, body: &str) -> Vec<DecodedEvent> {
        match message::parse_event(body) {
            Ok(NodeEvent::Message(envelope)) => {
                let wanted = self
                    .subscriptions
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .matches(&envelope.topic, &envelope.content_topic);
                if !wanted {
                    trace!(
                        topic = %envelope.topic,
                        content_topic = %envelope.content_topic,
                        "Message matches no subscription; dropping"
                    );
                    return Vec::new();
                }
                vec![DecodedEvent::new(
                    EventKind::MessageReceived,
                    STATUS_OK,
                    EventPayload::Message(envelope),
                )]
            }
            Ok(NodeEvent::Other(event_type)) => {
                debug!(event_type = %event_type, "Ignoring node event");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Undecodable node event");
                vec![decoded_event!(Error, RET_ERR, text: e.message)]
            }
        }
    }

    fn decode_store(&self, body: &str) -> Vec<DecodedEvent> {
        let page = match message::parse_store_response(body, None) {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Undecodable store response");
                let status = e.status_code.unwrap_or(RET_ERR);
                return vec![decoded_event!(Error, status, text: e.message)];
            }
        };

        let count = page.messages.len();
        let mut events: Vec<DecodedEvent> = page
            .messages
            .into_iter()
            .map(|envelope| {
                DecodedEvent::new(
                    EventKind::QueryResult,
                    STATUS_OK,
                    EventPayload::Message(envelope),
                )
            })
            .collect();
        events.push(decoded_event!(
            QueryResult,
            STATUS_OK,
            fields: json!({ "complete": true, "count": count, "cursor": page.cursor }),
            terminal
        ));
        events
    }
}

impl CallbackDecoder for WakuDecoder {
    fn decode(&self, request: RequestKind, status: i32, message: &str) -> Vec<DecodedEvent> {
        if status != STATUS_OK {
            if matches!(request, RequestKind::Create | RequestKind::Start) {
                self.faulted.store(true, Ordering::Release);
                warn!(request = %request, status, message, "Node lifecycle request failed");
            }
            let payload = if message.is_empty() {
                EventPayload::Empty
            } else {
                EventPayload::Text(message.to_string())
            };
            return vec![DecodedEvent::new(EventKind::Error, status, payload)];
        }

        match request {
            RequestKind::Events => self.decode_node_event(message),
            RequestKind::Query => self.decode_store(message),
            RequestKind::Publish => vec![decoded_event!(RequestAck, status, text: message)],
            other if message.is_empty() => vec![DecodedEvent::new(other.ack_kind(), status, EventPayload::Empty)],
            other => vec![DecodedEvent::new(
                other.ack_kind(),
                status,
                EventPayload::Text(message.to_string()),
            )],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_core::types::{ContentFilter, encoding};

    fn decoder() -> (WakuDecoder, Arc<RwLock<SubscriptionTable>>, Arc<AtomicBool>) {
        let table = Arc::new(RwLock::new(SubscriptionTable::new()));
        let faulted = Arc::new(AtomicBool::new(false));
        (WakuDecoder::new(table.clone(), faulted.clone()), table, faulted)
    }

    fn message_event(topic: &str, content_topic: &str) -> String {
        json!({
            "eventType": "message",
            "messageHash": "0x01",
            "pubsubTopic": topic,
            "wakuMessage": {"payload": encoding::encode(b"hi"), "contentTopic": content_topic, "timestamp": 1}
        })
        .to_string()
    }

    #[test]
    fn test_message_for_subscribed_topic() {
        let (decoder, table, _) = decoder();
        table.write().unwrap().add("t", None).unwrap();

        let events = decoder.decode(RequestKind::Events, 0, &message_event("t", "c"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::MessageReceived);
        assert_eq!(events[0].payload.as_message().map(|m| m.payload.clone()), Some(b"hi".to_vec()));
    }

    #[test]
    fn test_unwanted_message_dropped() {
        let (decoder, table, _) = decoder();
        table
            .write()
            .unwrap()
            .add("t", Some(ContentFilter::new(["wanted"])))
            .unwrap();

        assert!(decoder.decode(RequestKind::Events, 0, &message_event("t", "other")).is_empty());
        assert!(decoder.decode(RequestKind::Events, 0, &message_event("u", "wanted")).is_empty());
    }

    #[test]
    fn test_store_response_splits_into_results_and_marker() {
        let (decoder, _, _) = decoder();
        let body = json!({
            "statusCode": 200,
            "messages": [
                {"messageHash": "0x1", "pubsubTopic": "t", "message": {"payload": encoding::encode(b"a"), "contentTopic": "c"}},
                {"messageHash": "0x2", "pubsubTopic": "t", "message": {"payload": encoding::encode(b"b"), "contentTopic": "c"}}
            ]
        })
        .to_string();

        let events = decoder.decode(RequestKind::Query, 0, &body);
        assert_eq!(events.len(), 3);
        assert!(events[..2].iter().all(|e| e.kind == EventKind::QueryResult && !e.terminal));
        let marker = events[2].payload.as_fields().unwrap();
        assert!(events[2].terminal);
        assert_eq!(marker["complete"], true);
        assert_eq!(marker["count"], 2);
    }

    #[test]
    fn test_async_start_failure_raises_fault() {
        let (decoder, _, faulted) = decoder();
        let events = decoder.decode(RequestKind::Start, 1, "bind failed");
        assert_eq!(events[0].kind, EventKind::Error);
        assert_eq!(events[0].status, 1);
        assert!(faulted.load(Ordering::Acquire));
    }

    #[test]
    fn test_publish_failure_does_not_fault_node() {
        let (decoder, _, faulted) = decoder();
        let events = decoder.decode(RequestKind::Publish, 1, "no peers");
        assert_eq!(events[0].kind, EventKind::Error);
        assert!(!faulted.load(Ordering::Acquire));
    }

    #[test]
    fn test_publish_ack_carries_hash() {
        let (decoder, _, _) = decoder();
        let events = decoder.decode(RequestKind::Publish, 0, "0xfeed");
        assert_eq!(events[0].kind, EventKind::RequestAck);
        assert_eq!(events[0].payload.as_text(), Some("0xfeed"));
    }
}
