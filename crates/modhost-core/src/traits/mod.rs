//! Capability traits implemented by concrete modules.

pub mod module;

pub use module::{Module, ModuleInfo};
