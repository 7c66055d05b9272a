//! Module lifecycle through the broker.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use modhost_core::config::BrokerConfig;
use modhost_core::error::ErrorKind;
use modhost_core::types::{ModuleState, PublishRequest, QueryParams};
use plugin_waku::WakuModule;
use plugin_waku::ffi::MockCall;

use helpers::{CHAT, TOPIC_A, TestHost};

#[tokio::test]
async fn test_operations_before_start_fail_without_events() {
    let host = TestHost::new();
    let module = host.add_initialized("alpha").await;
    let mut rx = host.listen("alpha").await;
    // Let the create acknowledgement through before measuring.
    helpers::drain_for(&mut rx, Duration::from_millis(50)).await;

    let err = module.subscribe(TOPIC_A, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotStarted);
    let err = module
        .publish(PublishRequest::new(TOPIC_A, CHAT, b"early".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotStarted);
    let err = module.query(QueryParams::topic(TOPIC_A)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotStarted);

    assert!(helpers::drain_for(&mut rx, Duration::from_millis(100)).await.is_empty());
    assert_eq!(host.mock.call_count(MockCall::Publish), 0);
}

#[tokio::test]
async fn test_teardown_is_idempotent_and_releases_once() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;
    module.subscribe(TOPIC_A, None).await.unwrap();

    host.broker.teardown_module("alpha").await.unwrap();
    module.teardown().await;

    assert_eq!(module.state(), ModuleState::TornDown);
    assert_eq!(host.mock.release_count(), 1);
    assert_eq!(host.mock.destroy_calls(), 1);
    assert_eq!(host.mock.live_contexts(), 0);
    assert!(host.broker.get("alpha").await.is_none());

    let err = host.broker.teardown_module("alpha").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ModuleNotFound);
}

#[tokio::test]
async fn test_direct_teardown_is_reaped_by_broker() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;

    module.teardown().await;
    // No lookup by name: the relay worker unregisters it.
    helpers::wait_until(Duration::from_secs(1), || {
        let broker = host.broker.clone();
        async move { broker.modules().await.is_empty() }
    })
    .await;
    assert_eq!(host.broker.registry().count().await, 0);
    assert_eq!(host.broker.listener_count("alpha"), 0);
    assert!(host.broker.get("alpha").await.is_none());

    // The name is free again.
    host.add_started("alpha").await;
    assert_eq!(host.mock.created_count(), 2);
    assert_eq!(host.mock.release_count(), 1);
}

#[tokio::test]
async fn test_duplicate_name_rejected_and_first_survives() {
    let host = TestHost::new();
    host.add_started("alpha").await;

    let err = host
        .broker
        .instantiate("alpha", plugin_waku::MODULE_KIND)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NameAlreadyRegistered);

    let impostor = Arc::new(WakuModule::new("alpha", host.mock.clone(), &BrokerConfig::default()));
    let err = host.broker.register("alpha", impostor).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NameAlreadyRegistered);

    let ack = host
        .client("alpha")
        .await
        .publish_and_wait(PublishRequest::new(TOPIC_A, CHAT, b"still here".to_vec()))
        .await
        .unwrap();
    assert!(ack.is_success());
    assert_eq!(ack.source, "alpha");
}

#[tokio::test]
async fn test_register_requires_matching_name() {
    let host = TestHost::new();
    let module = Arc::new(WakuModule::new("alpha", host.mock.clone(), &BrokerConfig::default()));
    let err = host.broker.register("beta", module).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidConfig);
}

#[tokio::test]
async fn test_teardown_during_query_resolves_disposed() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;
    host.mock.withhold(MockCall::StoreQuery);

    let id = module.query(QueryParams::topic(TOPIC_A)).await.unwrap();
    let waiter = {
        let module = module.clone();
        tokio::spawn(async move { module.await_result(id, Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    host.broker.teardown_module("alpha").await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(100), waiter)
        .await
        .expect("pending query resolved within 100ms")
        .expect("waiter task");
    assert_eq!(outcome.unwrap_err().kind, ErrorKind::Disposed);
}

#[tokio::test]
async fn test_direct_teardown_during_query_all_resolves_disposed() {
    let host = TestHost::new();
    let module = host.add_started("alpha").await;
    host.mock.withhold(MockCall::StoreQuery);

    let client = host.client("alpha").await;
    let collector = tokio::spawn(async move {
        client
            .query_all(QueryParams::topic(TOPIC_A), Duration::from_secs(30))
            .await
    });
    helpers::wait_until(Duration::from_secs(1), || {
        let mock = host.mock.clone();
        async move { mock.call_count(MockCall::StoreQuery) == 1 }
    })
    .await;

    module.teardown().await;

    let outcome = tokio::time::timeout(Duration::from_millis(100), collector)
        .await
        .expect("query_all resolved within 100ms")
        .expect("collector task");
    assert_eq!(outcome.unwrap_err().kind, ErrorKind::Disposed);
}

#[tokio::test]
async fn test_async_start_failure_leaves_only_teardown() {
    let host = TestHost::new();
    host.mock.fail_async(MockCall::Start);
    let module = host.add_initialized("alpha").await;

    let err = module.start().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Library);
    assert_eq!(module.state(), ModuleState::Failed);
    assert_eq!(module.stop().await.unwrap_err().kind, ErrorKind::ModuleFailed);

    host.broker.teardown_module("alpha").await.unwrap();
    assert_eq!(host.mock.release_count(), 1);
}

#[tokio::test]
async fn test_withheld_start_times_out() {
    let config = BrokerConfig {
        default_request_timeout_ms: 50,
        ..BrokerConfig::default()
    };
    let host = TestHost::with_config(config, plugin_waku::ffi::Delivery::Worker);
    host.mock.withhold(MockCall::Start);
    let module = host.add_initialized("alpha").await;

    let err = module.start().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(module.state(), ModuleState::Initialized);

    host.mock.clear_faults();
    module.start().await.unwrap();
    assert_eq!(module.state(), ModuleState::Started);
}

#[tokio::test]
async fn test_shutdown_tears_down_everything() {
    let host = TestHost::new();
    host.add_started("alpha").await;
    host.add_started("beta").await;
    host.add_initialized("gamma").await;

    host.broker.shutdown().await;

    assert_eq!(host.mock.release_count(), 3);
    assert!(host.broker.modules().await.is_empty());
}
