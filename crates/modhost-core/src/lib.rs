//! # modhost-core
//!
//! Core crate for modhost. Contains the module capability trait,
//! configuration schemas, typed identifiers, the event model,
//! request descriptors, and the unified error system.
//!
//! This crate has **no** internal dependencies on other modhost crates.

pub mod config;
pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use error::{AppError, AppResult, ErrorCategory, ErrorKind};
