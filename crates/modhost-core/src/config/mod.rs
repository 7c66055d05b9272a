//! Host configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from
//! TOML files and `MODHOST__`-prefixed environment variables. Each
//! sub-module represents a logical configuration section.

pub mod broker;
pub mod logging;
pub mod module;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use self::broker::BrokerConfig;
pub use self::logging::{LogFormat, LoggingConfig};
pub use self::module::ModuleEntry;

use crate::error::AppError;

/// Root host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// Event relay and correlation settings.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Modules to instantiate at startup, in order.
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

impl HostConfig {
    /// Load configuration for the given environment.
    ///
    /// Merges `config/default`, an environment-specific overlay
    /// `config/{env}`, and environment variables prefixed with `MODHOST`.
    /// Both files are optional.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("MODHOST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::invalid_config(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::invalid_config(format!("Failed to deserialize config: {e}")))
    }

    /// Load configuration from a single file, without environment overlays.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        config.try_deserialize().map_err(|e| {
            AppError::invalid_config(format!(
                "Failed to deserialize config '{}': {e}",
                path.display()
            ))
        })
    }

    /// Returns the enabled module entries.
    pub fn enabled_modules(&self) -> impl Iterator<Item = &ModuleEntry> {
        self.modules.iter().filter(|m| m.enabled)
    }
}
