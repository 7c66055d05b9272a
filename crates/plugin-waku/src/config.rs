//! Configuration of one Waku node.

use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use modhost_core::error::{AppError, AppResult};

/// Node configuration accepted by `initialize`.
///
/// Deserialized from the module entry's free-form config, validated, and
/// rendered into the JSON document `waku_new` expects.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct WakuConfig {
    /// Listen address.
    #[validate(length(min = 1))]
    pub host: String,

    /// TCP listen port.
    #[validate(range(min = 1024))]
    pub port: u16,

    /// Hex-encoded secp256k1 private key. Generated by the node when absent.
    pub node_key: Option<String>,

    /// Network cluster id.
    #[validate(range(max = 1023))]
    pub cluster_id: u32,

    /// Shards of the cluster to join.
    pub shards: Vec<u16>,

    /// Mount the relay protocol.
    pub relay: bool,

    /// Serve the filter protocol to light clients.
    pub filter: bool,

    /// Serve the store protocol.
    pub store: bool,

    /// Serve the lightpush protocol.
    pub lightpush: bool,

    /// Peer used for filter subscriptions.
    pub filter_node: Option<String>,

    /// Peer used for store queries.
    pub store_node: Option<String>,

    /// Enable discv5 peer discovery.
    pub discv5_discovery: bool,

    /// Bootstrap peers (multiaddrs or ENRs).
    pub entry_nodes: Vec<String>,

    /// Largest payload accepted by `publish`, in bytes.
    #[validate(range(min = 1024, max = 1048576))]
    pub max_message_size: usize,

    /// libwaku log level.
    pub log_level: String,
}

impl Default for WakuConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            node_key: None,
            cluster_id: 0,
            shards: Vec::new(),
            relay: true,
            filter: false,
            store: false,
            lightpush: false,
            filter_node: None,
            store_node: None,
            discv5_discovery: false,
            entry_nodes: Vec::new(),
            max_message_size: default_max_message_size(),
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    60000
}

fn default_max_message_size() -> usize {
    150 * 1024
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl WakuConfig {
    /// Parses and validates a config value. `null` yields the defaults.
    pub fn from_value(value: serde_json::Value) -> AppResult<Self> {
        let config: Self = if value.is_null() {
            Self::default()
        } else {
            serde_json::from_value(value)
                .map_err(|e| AppError::invalid_config(format!("Invalid Waku config: {e}")))?
        };

        config
            .validate()
            .map_err(|e| AppError::invalid_config(format!("Invalid Waku config: {e}")))?;
        Ok(config)
    }

    /// Renders the configuration document passed to `waku_new`.
    pub fn to_library_json(&self) -> String {
        let mut doc = json!({
            "host": self.host,
            "tcpPort": self.port,
            "clusterId": self.cluster_id,
            "shards": self.shards,
            "relay": self.relay,
            "filter": self.filter,
            "store": self.store,
            "lightpush": self.lightpush,
            "discv5Discovery": self.discv5_discovery,
            "entryNodes": self.entry_nodes,
            "maxMessageSize": format!("{}KiB", self.max_message_size / 1024),
            "logLevel": self.log_level,
        });
        if let Some(key) = &self.node_key {
            doc["nodekey"] = json!(key);
        }
        if let Some(peer) = &self.filter_node {
            doc["filternode"] = json!(peer);
        }
        if let Some(peer) = &self.store_node {
            doc["storenode"] = json!(peer);
        }
        doc.to_string()
    }
}
