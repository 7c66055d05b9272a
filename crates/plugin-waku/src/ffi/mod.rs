//! libwaku boundary.

pub mod bindings;
#[cfg(feature = "mock")]
pub mod mock;
pub mod wrapper;

pub use bindings::{ContextHandle, WakuBindings};
#[cfg(feature = "native")]
pub use bindings::LibWakuApi;
#[cfg(feature = "mock")]
pub use mock::{Delivery, MockCall, MockWaku};
pub use wrapper::WakuContext;
