//! Booting modules from configuration files.

mod helpers;

use std::io::Write;

use serde_json::json;

use modhost_core::config::{HostConfig, ModuleEntry};
use modhost_core::error::ErrorKind;
use modhost_core::types::ModuleState;

use helpers::TestHost;

fn write_config(config: &HostConfig) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("tempfile");
    let text = toml::to_string(config).expect("render toml");
    file.write_all(text.as_bytes()).expect("write");
    file
}

#[tokio::test]
async fn test_bootstrap_from_written_file() {
    let mut config = HostConfig::default();
    config.broker.completed_retention = 16;
    config.modules = vec![
        ModuleEntry::new("alpha", plugin_waku::MODULE_KIND)
            .with_config(json!({ "port": 60100, "cluster_id": 16, "shards": [32] })),
        ModuleEntry {
            auto_start: false,
            ..ModuleEntry::new("beta", plugin_waku::MODULE_KIND).with_config(json!({ "port": 60101 }))
        },
        ModuleEntry {
            enabled: false,
            ..ModuleEntry::new("gamma", plugin_waku::MODULE_KIND).with_config(json!({ "port": 60102 }))
        },
    ];
    let file = write_config(&config);

    let loaded = HostConfig::from_file(file.path()).expect("load");
    assert_eq!(loaded.broker.completed_retention, 16);
    assert_eq!(loaded.modules.len(), 3);
    assert_eq!(loaded.modules[0].config["shards"], json!([32]));

    let host = TestHost::with_config(loaded.broker.clone(), Default::default());
    let ready = host.broker.bootstrap(&loaded.modules).await.expect("bootstrap");
    assert_eq!(ready, vec!["alpha", "beta"]);

    let alpha = host.broker.get("alpha").await.expect("alpha");
    let beta = host.broker.get("beta").await.expect("beta");
    assert_eq!(alpha.state(), ModuleState::Started);
    assert_eq!(beta.state(), ModuleState::Initialized);
    assert!(host.broker.get("gamma").await.is_none());
    assert_eq!(host.mock.created_count(), 2);
}

#[tokio::test]
async fn test_bootstrap_stops_at_invalid_module() {
    let host = TestHost::new();
    let entries = vec![
        ModuleEntry::new("alpha", plugin_waku::MODULE_KIND).with_config(json!({ "port": 60100 })),
        ModuleEntry::new("broken", plugin_waku::MODULE_KIND).with_config(json!({ "port": 80 })),
        ModuleEntry::new("never", plugin_waku::MODULE_KIND).with_config(json!({ "port": 60102 })),
    ];

    let err = host.broker.bootstrap(&entries).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidConfig);

    assert!(host.broker.get("alpha").await.is_some());
    assert!(host.broker.get("broken").await.is_none());
    assert!(host.broker.get("never").await.is_none());
    assert_eq!(host.mock.created_count(), 1);
}

#[tokio::test]
async fn test_unknown_kind_is_rejected() {
    let host = TestHost::new();
    let entries = vec![ModuleEntry::new("alpha", "carrier-pigeon")];

    let err = host.broker.bootstrap(&entries).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidConfig);
    assert!(host.broker.get("alpha").await.is_none());
}

#[test]
fn test_shipped_default_config_is_valid() {
    let config = HostConfig::from_file("config/default.toml").expect("default config");
    assert_eq!(config.logging.level, "info");

    let waku = config
        .enabled_modules()
        .find(|m| m.kind == plugin_waku::MODULE_KIND)
        .expect("waku entry");
    plugin_waku::WakuConfig::from_value(waku.config.clone()).expect("valid waku config");
}
