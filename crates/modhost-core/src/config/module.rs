//! Per-module startup entries.

use serde::{Deserialize, Serialize};

/// One module to instantiate when the host boots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEntry {
    /// Name the module is registered under. Must be unique.
    pub name: String,
    /// Catalog key selecting the constructor, e.g. `"waku"`.
    pub kind: String,
    /// Disabled entries are skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Start the module right after a successful `initialize`.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Module-specific configuration passed verbatim to `initialize`.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ModuleEntry {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            enabled: true,
            auto_start: true,
            config: serde_json::Value::Null,
        }
    }

    /// Replaces the module configuration.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

fn default_true() -> bool {
    true
}
