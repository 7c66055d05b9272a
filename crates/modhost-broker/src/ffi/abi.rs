//! FFI ABI definitions for callback-driven native libraries.
//!
//! Every asynchronous library entry point takes a callback of type
//! [`FfiCallback`] plus an opaque `user_data` pointer that is handed back
//! unchanged when the callback fires.

use std::ffi::{c_char, c_int, c_void};

/// The call or its asynchronous result succeeded.
pub const RET_OK: c_int = 0;

/// The library reported a failure. The message carries details.
pub const RET_ERR: c_int = 1;

/// The entry point was called without a callback.
pub const RET_MISSING_CALLBACK: c_int = 2;

/// Result callback signature.
///
/// ```c
/// typedef void (*Callback)(int ret_code, const char* msg, void* user_data);
/// ```
pub type FfiCallback = unsafe extern "C" fn(ret_code: c_int, msg: *const c_char, user_data: *mut c_void);

/// Short label for a status code, for logs.
pub fn describe_status(code: c_int) -> &'static str {
    match code {
        RET_OK => "ok",
        RET_ERR => "error",
        RET_MISSING_CALLBACK => "missing callback",
        _ => "unknown",
    }
}
