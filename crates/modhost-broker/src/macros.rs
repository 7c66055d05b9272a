//! Convenience macros for module authors.

/// Builds a [`ModuleInfo`](modhost_core::traits::ModuleInfo).
///
/// # Example
/// ```rust,ignore
/// let info = module_info!(
///     name: "chat",
///     version: env!("CARGO_PKG_VERSION"),
///     description: "Chat relay",
///     capabilities: [Initialize, Start, Publish, Teardown]
/// );
/// ```
#[macro_export]
macro_rules! module_info {
    (
        name: $name:expr,
        version: $version:expr,
        description: $desc:expr,
        capabilities: [$($op:ident),* $(,)?]
    ) => {
        $crate::prelude::ModuleInfo {
            name: $name.to_string(),
            version: $version.to_string(),
            description: $desc.to_string(),
            capabilities: vec![$($crate::prelude::Operation::$op),*],
        }
    };
    (
        name: $name:expr,
        version: $version:expr,
        description: $desc:expr
    ) => {
        $crate::prelude::ModuleInfo {
            name: $name.to_string(),
            version: $version.to_string(),
            description: $desc.to_string(),
            capabilities: $crate::prelude::Operation::ALL.to_vec(),
        }
    };
}

/// Builds a [`DecodedEvent`](crate::adapter::DecodedEvent).
///
/// # Example
/// ```rust,ignore
/// let draft = decoded_event!(RequestAck, status, text: message);
/// let done = decoded_event!(QueryResult, 0, fields: json!({ "complete": true }), terminal);
/// ```
#[macro_export]
macro_rules! decoded_event {
    ($kind:ident, $status:expr) => {
        $crate::adapter::DecodedEvent::new(
            $crate::prelude::EventKind::$kind,
            $status,
            $crate::prelude::EventPayload::Empty,
        )
    };
    ($kind:ident, $status:expr, text: $text:expr) => {
        $crate::adapter::DecodedEvent::new(
            $crate::prelude::EventKind::$kind,
            $status,
            $crate::prelude::EventPayload::Text($text.to_string()),
        )
    };
    ($kind:ident, $status:expr, fields: $fields:expr) => {
        $crate::adapter::DecodedEvent::new(
            $crate::prelude::EventKind::$kind,
            $status,
            $crate::prelude::EventPayload::Fields($fields),
        )
    };
    ($kind:ident, $status:expr, fields: $fields:expr, terminal) => {
        $crate::decoded_event!($kind, $status, fields: $fields).terminal()
    };
}
