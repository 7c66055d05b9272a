//! Prelude for convenient imports when writing a module.

pub use async_trait::async_trait;

pub use modhost_core::error::{AppError, AppResult, ErrorKind};
pub use modhost_core::events::{Event, EventKind, EventPayload, EventSink, MessageEnvelope};
pub use modhost_core::traits::{Module, ModuleInfo};
pub use modhost_core::types::{
    ContentFilter, CorrelationId, ModuleState, Operation, PublishRequest, QueryParams,
    SubscriptionId,
};

pub use crate::adapter::{CallbackAdapter, CallbackDecoder, CallbackHandle, DecodedEvent, RequestKind};
pub use crate::relay::EventListener;

pub use crate::{decoded_event, module_info};
