//! Unified error types for modhost.
//!
//! Every crate maps its internal failures into [`AppError`] so that module
//! operations, the broker, and the client proxy all surface one error type
//! through the `?` operator.

use std::fmt;
use thiserror::Error;

/// A specialized `Result` type for modhost operations.
pub type AppResult<T> = Result<T, AppError>;

/// Fine-grained error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Configuration could not be parsed or failed validation.
    InvalidConfig,
    /// The module has not been initialized yet.
    NotInitialized,
    /// The module is not in the started state.
    NotStarted,
    /// The module has been torn down.
    Disposed,
    /// The module entered the failed state and only accepts teardown.
    ModuleFailed,
    /// The underlying library reported a failure.
    Library,
    /// A publish payload exceeds the configured maximum.
    PayloadTooLarge,
    /// The protocol does not allow an identical subscription twice.
    DuplicateSubscription,
    /// No subscription exists under the given id.
    SubscriptionNotFound,
    /// No asynchronous result arrived before the caller's deadline.
    Timeout,
    /// A module is already registered under the requested name.
    NameAlreadyRegistered,
    /// No module is registered under the requested name.
    ModuleNotFound,
    /// The module does not expose the requested operation.
    OperationNotSupported,
    /// The correlation id is not known to the module.
    UnknownRequest,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// An internal error occurred.
    Internal,
}

/// Coarse error category, used by callers to decide on retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Malformed or invalid input. Caller's fault, not retried.
    Config,
    /// Operation attempted outside its required lifecycle state.
    State,
    /// The underlying library failed.
    Library,
    /// No result within the caller's deadline. Outcome is indeterminate.
    Timeout,
    /// Module or operation could not be resolved by name.
    Routing,
    /// Bug or broken invariant inside modhost itself.
    Internal,
}

impl ErrorKind {
    /// Returns the category this kind belongs to.
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::InvalidConfig
            | Self::PayloadTooLarge
            | Self::DuplicateSubscription
            | Self::SubscriptionNotFound
            | Self::UnknownRequest
            | Self::Serialization => ErrorCategory::Config,
            Self::NotInitialized | Self::NotStarted | Self::Disposed | Self::ModuleFailed => {
                ErrorCategory::State
            }
            Self::Library => ErrorCategory::Library,
            Self::Timeout => ErrorCategory::Timeout,
            Self::NameAlreadyRegistered | Self::ModuleNotFound | Self::OperationNotSupported => {
                ErrorCategory::Routing
            }
            Self::Internal => ErrorCategory::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig => write!(f, "INVALID_CONFIG"),
            Self::NotInitialized => write!(f, "NOT_INITIALIZED"),
            Self::NotStarted => write!(f, "NOT_STARTED"),
            Self::Disposed => write!(f, "DISPOSED"),
            Self::ModuleFailed => write!(f, "MODULE_FAILED"),
            Self::Library => write!(f, "LIBRARY_ERROR"),
            Self::PayloadTooLarge => write!(f, "PAYLOAD_TOO_LARGE"),
            Self::DuplicateSubscription => write!(f, "DUPLICATE_SUBSCRIPTION"),
            Self::SubscriptionNotFound => write!(f, "SUBSCRIPTION_NOT_FOUND"),
            Self::Timeout => write!(f, "OPERATION_TIMED_OUT"),
            Self::NameAlreadyRegistered => write!(f, "NAME_ALREADY_REGISTERED"),
            Self::ModuleNotFound => write!(f, "MODULE_NOT_FOUND"),
            Self::OperationNotSupported => write!(f, "OPERATION_NOT_SUPPORTED"),
            Self::UnknownRequest => write!(f, "UNKNOWN_REQUEST"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// The unified error used throughout modhost.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The kind of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Status code reported by the underlying library, if any.
    pub status_code: Option<i32>,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            source: None,
        }
    }

    /// Create a new error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            source: Some(Box::new(source)),
        }
    }

    /// Returns the coarse category of this error.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Whether a caller may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Library | ErrorCategory::Timeout
        )
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    pub fn not_initialized(module: &str) -> Self {
        Self::new(
            ErrorKind::NotInitialized,
            format!("Module '{module}' has not been initialized"),
        )
    }

    pub fn not_started(module: &str) -> Self {
        Self::new(
            ErrorKind::NotStarted,
            format!("Module '{module}' is not started"),
        )
    }

    pub fn disposed(module: &str) -> Self {
        Self::new(
            ErrorKind::Disposed,
            format!("Module '{module}' has been torn down"),
        )
    }

    pub fn module_failed(module: &str) -> Self {
        Self::new(
            ErrorKind::ModuleFailed,
            format!("Module '{module}' has failed and only accepts teardown"),
        )
    }

    /// Create a library error carrying the library's status code.
    pub fn library(status_code: i32, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::new(ErrorKind::Library, message)
        }
    }

    pub fn payload_too_large(size: usize, max: usize) -> Self {
        Self::new(
            ErrorKind::PayloadTooLarge,
            format!("Payload of {size} bytes exceeds the {max} byte limit"),
        )
    }

    pub fn duplicate_subscription(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateSubscription, message)
    }

    pub fn subscription_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SubscriptionNotFound, message)
    }

    /// Create an error for a wait that hit the caller's deadline.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn name_already_registered(name: &str) -> Self {
        Self::new(
            ErrorKind::NameAlreadyRegistered,
            format!("A module named '{name}' is already registered"),
        )
    }

    pub fn module_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::ModuleNotFound,
            format!("No module named '{name}' is registered"),
        )
    }

    pub fn operation_not_supported(module: &str, operation: &str) -> Self {
        Self::new(
            ErrorKind::OperationNotSupported,
            format!("Module '{module}' does not support operation '{operation}'"),
        )
    }

    pub fn unknown_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownRequest, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            status_code: self.status_code,
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::Internal, format!("I/O error: {err}"), err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::InvalidConfig,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
