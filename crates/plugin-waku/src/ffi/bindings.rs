//! The libwaku entry points, as a trait and as a dynamically loaded library.
//!
//! [`WakuBindings`] mirrors the C API one call per method. Every
//! asynchronous call takes a [`CallbackHandle`]; the implementation arranges
//! for `handle.invoke(status, message)` to run when the library answers,
//! on whatever thread the library chooses.

use std::ffi::c_void;
use std::ptr::NonNull;

use modhost_broker::adapter::CallbackHandle;

/// Opaque libwaku node context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(NonNull<c_void>);

// The context is only an address; libwaku serializes access internally.
unsafe impl Send for ContextHandle {}
unsafe impl Sync for ContextHandle {}

impl ContextHandle {
    /// Wraps a context pointer. Returns `None` for null.
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr().addr()
    }
}

/// One call per libwaku entry point.
///
/// Calls must return without waiting for the asynchronous result. A
/// non-zero return means the request was refused and its callback will
/// not fire.
pub trait WakuBindings: Send + Sync + std::fmt::Debug {
    /// `waku_new`. `None` when the library refuses the configuration.
    fn create(&self, config_json: &str, callback: CallbackHandle) -> Option<ContextHandle>;

    /// `waku_start`.
    fn start(&self, ctx: ContextHandle, callback: CallbackHandle) -> i32;

    /// `waku_stop`.
    fn stop(&self, ctx: ContextHandle, callback: CallbackHandle) -> i32;

    /// `waku_set_event_callback`. The callback may fire any number of times.
    fn set_event_callback(&self, ctx: ContextHandle, callback: CallbackHandle);

    /// `waku_relay_subscribe`.
    fn relay_subscribe(&self, ctx: ContextHandle, pubsub_topic: &str, callback: CallbackHandle)
    -> i32;

    /// `waku_relay_unsubscribe`.
    fn relay_unsubscribe(
        &self,
        ctx: ContextHandle,
        pubsub_topic: &str,
        callback: CallbackHandle,
    ) -> i32;

    /// `waku_relay_publish`. `message` is the base64-encoded payload.
    fn relay_publish(
        &self,
        ctx: ContextHandle,
        pubsub_topic: &str,
        message: &str,
        content_topic: &str,
        timeout_ms: i32,
        callback: CallbackHandle,
    ) -> i32;

    /// `waku_filter_subscribe`. `content_topics_json` is a JSON array.
    fn filter_subscribe(
        &self,
        ctx: ContextHandle,
        pubsub_topic: &str,
        content_topics_json: &str,
        callback: CallbackHandle,
    ) -> i32;

    /// `waku_store_query`.
    fn store_query(&self, ctx: ContextHandle, query_json: &str, callback: CallbackHandle) -> i32;

    /// `waku_free`. Must be called exactly once per created context.
    fn destroy(&self, ctx: ContextHandle);
}

#[cfg(feature = "native")]
pub use native::LibWakuApi;

#[cfg(feature = "native")]
mod native {
    use std::ffi::{c_char, c_int, c_void};
    use std::mem;
    use std::sync::Arc;

    use modhost_broker::adapter::CallbackHandle;
    use modhost_broker::ffi::{FfiCallback, RET_ERR, callback_thunk, string_to_c_string};

    use super::{ContextHandle, WakuBindings};
    use crate::error::WakuError;

    type Sym<T> = libloading::Symbol<'static, T>;

    /// Loaded libwaku API with all function pointers.
    ///
    /// Each field is a dynamically loaded symbol. The `_lib` field keeps
    /// the library mapped for the lifetime of this struct.
    #[derive(Clone)]
    pub struct LibWakuApi {
        new: Sym<unsafe extern "C" fn(*const c_char, FfiCallback, *mut c_void) -> *mut c_void>,
        start: Sym<unsafe extern "C" fn(*mut c_void, FfiCallback, *mut c_void) -> c_int>,
        stop: Sym<unsafe extern "C" fn(*mut c_void, FfiCallback, *mut c_void) -> c_int>,
        set_event_callback: Sym<unsafe extern "C" fn(*mut c_void, FfiCallback, *mut c_void)>,
        relay_subscribe:
            Sym<unsafe extern "C" fn(*mut c_void, *const c_char, FfiCallback, *mut c_void) -> c_int>,
        relay_unsubscribe:
            Sym<unsafe extern "C" fn(*mut c_void, *const c_char, FfiCallback, *mut c_void) -> c_int>,
        relay_publish: Sym<
            unsafe extern "C" fn(
                *mut c_void,
                *const c_char,
                *const c_char,
                *const c_char,
                c_int,
                FfiCallback,
                *mut c_void,
            ) -> c_int,
        >,
        filter_subscribe: Sym<
            unsafe extern "C" fn(
                *mut c_void,
                *const c_char,
                *const c_char,
                FfiCallback,
                *mut c_void,
            ) -> c_int,
        >,
        store_query:
            Sym<unsafe extern "C" fn(*mut c_void, *const c_char, FfiCallback, *mut c_void) -> c_int>,
        free: Sym<unsafe extern "C" fn(*mut c_void)>,
        path: String,
        _lib: Arc<libloading::Library>,
    }

    impl std::fmt::Debug for LibWakuApi {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LibWakuApi").field("path", &self.path).finish()
        }
    }

    impl LibWakuApi {
        /// Loads libwaku from `path` and resolves every entry point.
        pub fn load(path: &str) -> Result<Self, WakuError> {
            let lib = Arc::new(
                unsafe { libloading::Library::new(path) }
                    .map_err(|e| WakuError::Load(format!("{path}: {e}")))?,
            );

            /// Loads a symbol and extends it to `'static`.
            ///
            /// # Safety
            ///
            /// The symbol stays valid while the `Arc<Library>` stored in
            /// the returned struct is alive.
            unsafe fn load_sym<T>(lib: &libloading::Library, name: &[u8]) -> Result<Sym<T>, WakuError> {
                let sym = unsafe { lib.get::<T>(name) }.map_err(|e| {
                    WakuError::Load(format!("missing symbol {}: {e}", String::from_utf8_lossy(name)))
                })?;
                Ok(unsafe { mem::transmute::<libloading::Symbol<'_, T>, Sym<T>>(sym) })
            }

            unsafe {
                Ok(Self {
                    new: load_sym(&lib, b"waku_new")?,
                    start: load_sym(&lib, b"waku_start")?,
                    stop: load_sym(&lib, b"waku_stop")?,
                    set_event_callback: load_sym(&lib, b"waku_set_event_callback")?,
                    relay_subscribe: load_sym(&lib, b"waku_relay_subscribe")?,
                    relay_unsubscribe: load_sym(&lib, b"waku_relay_unsubscribe")?,
                    relay_publish: load_sym(&lib, b"waku_relay_publish")?,
                    filter_subscribe: load_sym(&lib, b"waku_filter_subscribe")?,
                    store_query: load_sym(&lib, b"waku_store_query")?,
                    free: load_sym(&lib, b"waku_free")?,
                    path: path.to_string(),
                    _lib: lib,
                })
            }
        }
    }

    // Arguments are checked for NUL bytes by the wrapper before they get here.
    macro_rules! c_arg {
        ($s:expr) => {
            match string_to_c_string($s) {
                Some(c) => c,
                None => return RET_ERR,
            }
        };
    }

    impl WakuBindings for LibWakuApi {
        fn create(&self, config_json: &str, callback: CallbackHandle) -> Option<ContextHandle> {
            let config = string_to_c_string(config_json)?;
            let ctx = unsafe { (self.new)(config.as_ptr(), callback_thunk, callback.user_data()) };
            ContextHandle::from_raw(ctx)
        }

        fn start(&self, ctx: ContextHandle, callback: CallbackHandle) -> i32 {
            unsafe { (self.start)(ctx.as_ptr(), callback_thunk, callback.user_data()) }
        }

        fn stop(&self, ctx: ContextHandle, callback: CallbackHandle) -> i32 {
            unsafe { (self.stop)(ctx.as_ptr(), callback_thunk, callback.user_data()) }
        }

        fn set_event_callback(&self, ctx: ContextHandle, callback: CallbackHandle) {
            unsafe { (self.set_event_callback)(ctx.as_ptr(), callback_thunk, callback.user_data()) }
        }

        fn relay_subscribe(&self, ctx: ContextHandle, pubsub_topic: &str, callback: CallbackHandle) -> i32 {
            let topic = c_arg!(pubsub_topic);
            unsafe {
                (self.relay_subscribe)(ctx.as_ptr(), topic.as_ptr(), callback_thunk, callback.user_data())
            }
        }

        fn relay_unsubscribe(&self, ctx: ContextHandle, pubsub_topic: &str, callback: CallbackHandle) -> i32 {
            let topic = c_arg!(pubsub_topic);
            unsafe {
                (self.relay_unsubscribe)(ctx.as_ptr(), topic.as_ptr(), callback_thunk, callback.user_data())
            }
        }

        fn relay_publish(
            &self,
            ctx: ContextHandle,
            pubsub_topic: &str,
            message: &str,
            content_topic: &str,
            timeout_ms: i32,
            callback: CallbackHandle,
        ) -> i32 {
            let topic = c_arg!(pubsub_topic);
            let message = c_arg!(message);
            let content_topic = c_arg!(content_topic);
            unsafe {
                (self.relay_publish)(
                    ctx.as_ptr(),
                    topic.as_ptr(),
                    message.as_ptr(),
                    content_topic.as_ptr(),
                    timeout_ms,
                    callback_thunk,
                    callback.user_data(),
                )
            }
        }

        fn filter_subscribe(
            &self,
            ctx: ContextHandle,
            pubsub_topic: &str,
            content_topics_json: &str,
            callback: CallbackHandle,
        ) -> i32 {
            let topic = c_arg!(pubsub_topic);
            let content_topics = c_arg!(content_topics_json);
            unsafe {
                (self.filter_subscribe)(
                    ctx.as_ptr(),
                    topic.as_ptr(),
                    content_topics.as_ptr(),
                    callback_thunk,
                    callback.user_data(),
                )
            }
        }

        fn store_query(&self, ctx: ContextHandle, query_json: &str, callback: CallbackHandle) -> i32 {
            let query = c_arg!(query_json);
            unsafe { (self.store_query)(ctx.as_ptr(), query.as_ptr(), callback_thunk, callback.user_data()) }
        }

        fn destroy(&self, ctx: ContextHandle) {
            unsafe { (self.free)(ctx.as_ptr()) }
        }
    }
}
