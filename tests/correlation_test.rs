//! Correlating asynchronous library results with their requests.

mod helpers;

use std::collections::HashSet;
use std::time::Duration;

use modhost_core::error::ErrorKind;
use modhost_core::events::EventKind;
use modhost_core::types::{PublishRequest, QueryParams};
use plugin_waku::ffi::{Delivery, MockCall, MockWaku};

use helpers::{CHAT, TOPIC_A, TestHost};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishes_each_get_their_own_result() {
    // Callbacks arrive from many threads in arbitrary order.
    let host = TestHost::with_delivery(Delivery::Scattered);
    let module = host.add_started("alpha").await;
    let mut rx = host.listen("alpha").await;

    const CALLERS: usize = 32;
    let mut tasks = Vec::with_capacity(CALLERS);
    for i in 0..CALLERS {
        let module = module.clone();
        tasks.push(tokio::spawn(async move {
            let payload = format!("message {i}").into_bytes();
            let id = module
                .publish(PublishRequest::new(TOPIC_A, CHAT, payload.clone()))
                .await
                .expect("publish accepted");
            let event = module
                .await_result(id, Duration::from_secs(2))
                .await
                .expect("publish acknowledged");
            (id, payload, event)
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        let (id, payload, event) = task.await.unwrap();
        assert_eq!(event.correlation_id, Some(id));
        assert_eq!(event.kind, EventKind::RequestAck);
        assert!(event.terminal);
        let expected = MockWaku::message_hash(TOPIC_A, CHAT, &payload);
        assert_eq!(event.payload.as_text(), Some(expected.as_str()));
        ids.insert(id);
    }
    assert_eq!(ids.len(), CALLERS);

    // Exactly one terminal event per request reached the listeners.
    let events = helpers::drain_for(&mut rx, Duration::from_millis(200)).await;
    let terminal: Vec<_> = events
        .iter()
        .filter(|e| e.terminal)
        .filter_map(|e| e.correlation_id)
        .collect();
    assert_eq!(terminal.len(), CALLERS);
    assert!(terminal.iter().all(|id| ids.contains(id)));
}

#[tokio::test]
async fn test_publish_failure_is_a_library_error_event() {
    let host = TestHost::new();
    host.add_started("alpha").await;
    host.mock.fail_async(MockCall::Publish);
    let mut rx = host.listen("alpha").await;

    let err = host
        .client("alpha")
        .await
        .publish_and_wait(PublishRequest::new(TOPIC_A, CHAT, b"lost".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Library);
    assert!(err.is_retryable());

    let event = helpers::next_of_kind(&mut rx, EventKind::Error, Duration::from_secs(1))
        .await
        .expect("error event delivered");
    assert!(!event.is_success());
}

#[tokio::test]
async fn test_withheld_result_times_out() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;
    host.mock.withhold(MockCall::Publish);

    let id = module
        .publish(PublishRequest::new(TOPIC_A, CHAT, b"void".to_vec()))
        .await
        .unwrap();
    let err = module
        .await_result(id, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(err.kind.to_string(), "OPERATION_TIMED_OUT");
}

#[tokio::test]
async fn test_duplicate_callbacks_are_not_redelivered() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;
    host.mock.set_duplicate_callbacks(true);
    let mut rx = host.listen("alpha").await;

    let id = module
        .publish(PublishRequest::new(TOPIC_A, CHAT, b"once".to_vec()))
        .await
        .unwrap();
    module.await_result(id, Duration::from_secs(1)).await.unwrap();

    let events = helpers::drain_for(&mut rx, Duration::from_millis(150)).await;
    assert_eq!(
        events
            .iter()
            .filter(|e| e.correlation_id == Some(id))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_late_waiter_gets_retained_result() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;

    let id = module
        .publish(PublishRequest::new(TOPIC_A, CHAT, b"early bird".to_vec()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let event = module.await_result(id, Duration::from_millis(10)).await.unwrap();
    assert_eq!(event.correlation_id, Some(id));
}

#[tokio::test]
async fn test_query_all_collects_until_marker() {
    let host = TestHost::new();
    host.add_started("alpha").await;
    for i in 0..3u8 {
        host.mock.emit_message(TOPIC_A, CHAT, &[b'a' + i]);
    }
    host.mock.emit_message(TOPIC_A, "/modhost/1/other/proto", b"x");

    let results = host
        .client("alpha")
        .await
        .query_all(
            QueryParams::topic(TOPIC_A).with_content_topics([CHAT]),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    let payloads: Vec<&[u8]> = results[..3]
        .iter()
        .filter_map(|e| e.payload.as_message().map(|m| m.payload.as_slice()))
        .collect();
    assert_eq!(payloads, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);

    let marker = results.last().unwrap();
    assert!(marker.terminal);
    assert_eq!(marker.payload.as_fields().unwrap()["complete"], true);
    assert_eq!(marker.payload.as_fields().unwrap()["count"], 3);
}

#[tokio::test]
async fn test_query_pages_follow_cursor() {
    let host = TestHost::new();
    host.add_started("alpha").await;
    for i in 0..5u8 {
        host.mock.emit_message(TOPIC_A, CHAT, &[i]);
    }
    let client = host.client("alpha").await;

    let first = client
        .query_all(QueryParams::topic(TOPIC_A).with_page_size(2), Duration::from_secs(1))
        .await
        .unwrap();
    let marker = first.last().unwrap().payload.as_fields().unwrap().clone();
    assert_eq!(marker["count"], 2);
    let cursor = marker["cursor"].as_str().expect("more pages").to_string();

    let rest = client
        .query_all(
            QueryParams {
                cursor: Some(cursor),
                ..QueryParams::topic(TOPIC_A).with_page_size(10)
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    let marker = rest.last().unwrap().payload.as_fields().unwrap();
    assert_eq!(marker["count"], 3);
    assert!(marker["cursor"].is_null());
}
