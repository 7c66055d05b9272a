//! FFI safety wrappers: string conversion and the shared callback thunk.

use std::ffi::{CStr, CString, c_char, c_int, c_void};

use tracing::warn;

use crate::adapter::CallbackHandle;

use super::abi::describe_status;

/// Safely converts a C string pointer to a Rust `String`.
///
/// Returns `None` if the pointer is null. Invalid UTF-8 is replaced.
///
/// # Safety
///
/// A non-null `ptr` must point to a NUL-terminated string that stays valid
/// for the duration of the call.
pub unsafe fn c_str_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Converts a Rust string to a `CString`.
///
/// Returns `None` if the string contains interior NUL bytes.
pub fn string_to_c_string(s: &str) -> Option<CString> {
    CString::new(s).ok()
}

/// The one callback every native entry point is given.
///
/// Copies the message out of library memory and routes it through the
/// token in `user_data`, then returns immediately.
///
/// # Safety
///
/// Must only be called by native code with a `user_data` value obtained
/// from [`CallbackHandle::user_data`] and a `msg` that is null or a valid
/// NUL-terminated string for the duration of the call.
pub unsafe extern "C" fn callback_thunk(ret_code: c_int, msg: *const c_char, user_data: *mut c_void) {
    let message = unsafe { c_str_to_string(msg) }.unwrap_or_default();
    let handle = CallbackHandle::from_user_data(user_data);

    if ret_code != super::abi::RET_OK {
        warn!(
            token = handle.token(),
            ret_code,
            status = describe_status(ret_code),
            "Native callback reported failure"
        );
    }

    // A panic must not unwind across the C boundary.
    if std::panic::catch_unwind(|| handle.invoke(ret_code, &message)).is_err() {
        warn!(token = handle.token(), "Panic while routing native callback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_string_roundtrip() {
        let c = string_to_c_string("hello").expect("no NUL");
        let back = unsafe { c_str_to_string(c.as_ptr()) };
        assert_eq!(back.as_deref(), Some("hello"));
    }

    #[test]
    fn test_null_and_interior_nul() {
        assert!(unsafe { c_str_to_string(std::ptr::null()) }.is_none());
        assert!(string_to_c_string("a\0b").is_none());
    }

    #[test]
    fn test_thunk_tolerates_unknown_token() {
        let c = string_to_c_string("late").expect("no NUL");
        unsafe { callback_thunk(0, c.as_ptr(), usize::MAX as *mut c_void) };
    }
}
