//! Shared value types: identifiers, lifecycle state, request descriptors.

pub mod encoding;
pub mod id;
pub mod request;
pub mod state;

pub use id::{CorrelationId, ListenerId, SubscriptionId};
pub use request::{ContentFilter, Operation, PublishRequest, QueryParams};
pub use state::ModuleState;
