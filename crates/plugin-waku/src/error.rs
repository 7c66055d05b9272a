//! Error type for the libwaku boundary.
//!
//! Failures at the FFI layer are collected in [`WakuError`] and mapped into
//! `AppError` at the module boundary.

use modhost_core::error::{AppError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WakuError {
    /// The shared library could not be opened or a symbol was missing.
    #[error("Failed to load libwaku: {0}")]
    Load(String),

    /// `waku_new` returned a null context.
    #[error("libwaku refused to create a node: {reason}")]
    CreateRejected {
        /// Why, as far as we can tell.
        reason: String,
    },

    /// A library entry point returned a non-zero status synchronously.
    #[error("libwaku {call} returned status {status}")]
    Status {
        /// The entry point that failed.
        call: &'static str,
        /// Its return code.
        status: i32,
    },

    /// A string argument contained an interior NUL byte.
    #[error("Argument '{argument}' contains a NUL byte")]
    InvalidString {
        /// Name of the offending argument.
        argument: &'static str,
    },

    /// The context was already released.
    #[error("libwaku context already released")]
    Released,
}

impl From<WakuError> for AppError {
    fn from(err: WakuError) -> Self {
        let (kind, status_code) = match &err {
            WakuError::Status { status, .. } => (ErrorKind::Library, Some(*status)),
            WakuError::InvalidString { .. } => (ErrorKind::InvalidConfig, None),
            _ => (ErrorKind::Library, None),
        };
        let mut app = AppError::with_source(kind, err.to_string(), err);
        app.status_code = status_code;
        app
    }
}
