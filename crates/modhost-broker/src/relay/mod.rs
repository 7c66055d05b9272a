//! Event relay: per-module ordered delivery to isolated listeners.

pub mod dispatcher;
pub mod listener;

pub use dispatcher::{CloseHook, EventRelay};
pub use listener::{ChannelListener, ClosureListener, EventListener};
