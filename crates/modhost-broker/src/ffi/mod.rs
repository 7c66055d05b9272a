//! C boundary shared by native module libraries.

pub mod abi;
pub mod safety;

pub use abi::{FfiCallback, RET_ERR, RET_MISSING_CALLBACK, RET_OK};
pub use safety::{c_str_to_string, callback_thunk, string_to_c_string};
