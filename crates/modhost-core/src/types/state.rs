//! Module lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a module.
///
/// ```text
/// Unloaded -> Initialized -> Started <-> Stopped
///      \            \           \          \
///       +------------+-----------+----------+--> TornDown
/// ```
/// `Failed` is entered on an unrecoverable library error and only leaves
/// through teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Unloaded,
    Initialized,
    Started,
    Stopped,
    Failed,
    TornDown,
}

impl ModuleState {
    /// Whether the module holds a live library context in this state.
    pub fn holds_context(self) -> bool {
        matches!(
            self,
            Self::Initialized | Self::Started | Self::Stopped | Self::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::TornDown => "torn_down",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
