//! # modhost-broker
//!
//! Broker core for modhost. Provides:
//!
//! - A callback adapter turning single-shot library callbacks into typed,
//!   correlated events
//! - A per-module ordered event relay with isolated listener queues
//! - A name-keyed module registry and a catalog of module constructors
//! - A client proxy for invoking module operations by name

pub mod adapter;
pub mod broker;
pub mod catalog;
pub mod ffi;
pub mod macros;
pub mod prelude;
pub mod proxy;
pub mod registry;
pub mod relay;

pub use adapter::{CallbackAdapter, CallbackDecoder, CallbackHandle, DecodedEvent, RequestKind};
pub use broker::Broker;
pub use catalog::{ModuleCatalog, ModuleFactory};
pub use proxy::{ClientProxy, ModuleClient};
pub use registry::ModuleRegistry;
pub use relay::{ChannelListener, ClosureListener, EventListener, EventRelay};
