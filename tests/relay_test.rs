//! Event fan-out from modules to listeners.

mod helpers;

use std::time::{Duration, Instant};

use modhost_broker::ClosureListener;
use modhost_core::events::EventKind;
use plugin_waku::ffi::Delivery;

use helpers::{CHAT, TOPIC_A, TOPIC_B, TestHost};

#[tokio::test]
async fn test_subscribe_and_receive_round_trip() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;
    let mut rx = host.listen("alpha").await;
    module.subscribe(TOPIC_A, None).await.unwrap();

    let hash = host.mock.emit_message(TOPIC_A, CHAT, b"hello topic a");

    let event = helpers::next_of_kind(&mut rx, EventKind::MessageReceived, Duration::from_secs(1))
        .await
        .expect("message event");
    let message = event.payload.as_message().expect("message payload");
    assert_eq!(event.source, "alpha");
    assert_eq!(message.topic, TOPIC_A);
    assert_eq!(message.content_topic, CHAT);
    assert_eq!(message.payload, b"hello topic a");
    assert_eq!(message.hash.as_deref(), Some(hash.as_str()));

    let rest = helpers::drain_for(&mut rx, Duration::from_millis(100)).await;
    assert!(rest.iter().all(|e| e.kind != EventKind::MessageReceived));
}

#[tokio::test]
async fn test_events_stay_with_their_module() {
    let host = TestHost::new();
    let alpha = host.add_started("alpha").await;
    let beta = host.add_started("beta").await;
    alpha.subscribe(TOPIC_A, None).await.unwrap();
    beta.subscribe(TOPIC_B, None).await.unwrap();
    let mut alpha_rx = host.listen("alpha").await;
    let mut beta_rx = host.listen("beta").await;

    for i in 0..5u8 {
        host.mock.emit_message(TOPIC_A, CHAT, &[i]);
    }

    let alpha_events = helpers::drain_for(&mut alpha_rx, Duration::from_millis(200)).await;
    let beta_events = helpers::drain_for(&mut beta_rx, Duration::from_millis(50)).await;

    assert!(alpha_events.iter().all(|e| e.source == "alpha"));
    assert!(beta_events.iter().all(|e| e.source == "beta"));
    let received = |events: &[std::sync::Arc<modhost_core::events::Event>]| {
        events
            .iter()
            .filter(|e| e.kind == EventKind::MessageReceived)
            .count()
    };
    assert_eq!(received(&alpha_events), 5);
    assert_eq!(received(&beta_events), 0);
}

#[tokio::test]
async fn test_events_arrive_in_production_order() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;
    module.subscribe(TOPIC_A, None).await.unwrap();
    let mut rx = host.listen("alpha").await;

    for i in 0..50u8 {
        host.mock.emit_message(TOPIC_A, CHAT, &[i]);
    }

    let payloads: Vec<u8> = helpers::drain_for(&mut rx, Duration::from_millis(300))
        .await
        .iter()
        .filter_map(|e| e.payload.as_message().map(|m| m.payload[0]))
        .collect();
    assert_eq!(payloads, (0..50u8).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_listener_does_not_delay_fast_one() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;
    module.subscribe(TOPIC_A, None).await.unwrap();

    let client = host.client("alpha").await;
    client
        .on_event(ClosureListener::new("stalled", |_event| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }))
        .await
        .unwrap();
    let mut fast = host.listen("alpha").await;

    let started = Instant::now();
    host.mock.emit_message(TOPIC_A, CHAT, b"first");
    host.mock.emit_message(TOPIC_A, CHAT, b"second");

    for expected in [&b"first"[..], &b"second"[..]] {
        let event = helpers::next_of_kind(&mut fast, EventKind::MessageReceived, Duration::from_secs(1))
            .await
            .expect("fast listener event");
        assert_eq!(event.payload.as_message().unwrap().payload, expected);
    }
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_off_event_stops_delivery() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;
    module.subscribe(TOPIC_A, None).await.unwrap();

    let client = host.client("alpha").await;
    let (listener, mut rx) = modhost_broker::ChannelListener::new("detached");
    let id = client.on_event(listener).await.unwrap();
    assert_eq!(host.broker.listener_count("alpha"), 1);

    assert!(client.off_event(id));
    assert!(!client.off_event(id));
    assert_eq!(host.broker.listener_count("alpha"), 0);

    host.mock.emit_message(TOPIC_A, CHAT, b"unheard");
    assert!(helpers::next_event(&mut rx, Duration::from_millis(100)).await.is_none());
}

#[tokio::test]
async fn test_content_filter_narrows_delivery() {
    let host = TestHost::with_delivery(Delivery::Inline);
    let module = host.add_started("alpha").await;
    module
        .subscribe(TOPIC_A, Some(modhost_core::types::ContentFilter::new([CHAT])))
        .await
        .unwrap();
    let mut rx = host.listen("alpha").await;

    host.mock.emit_message(TOPIC_A, "/modhost/1/other/proto", b"skip");
    host.mock.emit_message(TOPIC_A, CHAT, b"keep");

    let events = helpers::drain_for(&mut rx, Duration::from_millis(100)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload.as_message().unwrap().payload, b"keep");
}

#[tokio::test]
async fn test_listener_can_call_back_into_broker() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;
    module.subscribe(TOPIC_A, None).await.unwrap();

    let proxy = host.broker.proxy();
    let (tx, mut done) = tokio::sync::mpsc::unbounded_channel();
    host.client("alpha")
        .await
        .on_event(ClosureListener::new("reentrant", move |event| {
            let proxy = proxy.clone();
            let tx = tx.clone();
            async move {
                if event.kind == EventKind::MessageReceived {
                    let state = proxy.invoke("alpha", "state", serde_json::Value::Null).await;
                    let _ = tx.send(state);
                }
            }
        }))
        .await
        .unwrap();

    host.mock.emit_message(TOPIC_A, CHAT, b"ping");
    let state = tokio::time::timeout(Duration::from_secs(1), done.recv())
        .await
        .expect("listener finished")
        .expect("state result")
        .unwrap();
    assert_eq!(state["state"], "started");
}
