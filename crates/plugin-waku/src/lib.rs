//! Waku messaging module for modhost.
//!
//! Wraps one libwaku node (relay pub/sub, filter subscriptions, store
//! queries) behind the [`Module`](modhost_core::traits::Module) capability
//! interface. The library is reached through [`ffi::WakuBindings`], backed
//! either by the native shared library (`native` feature) or by an
//! in-memory mock for development and testing (`mock` feature).

pub mod bridge;
pub mod config;
pub mod decoder;
pub mod error;
pub mod factory;
pub mod ffi;
pub mod message;
pub mod module;
pub mod subscription;

pub use bridge::RelayBridge;
pub use config::WakuConfig;
pub use factory::{MODULE_KIND, register_waku};
pub use module::WakuModule;
