//! Safe owner of one libwaku context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use modhost_broker::adapter::CallbackHandle;
use modhost_broker::ffi::RET_OK;

use super::bindings::{ContextHandle, WakuBindings};
use crate::error::WakuError;

/// Owns a libwaku context and frees it exactly once.
#[derive(Debug)]
pub struct WakuContext {
    bindings: Arc<dyn WakuBindings>,
    raw: ContextHandle,
    released: AtomicBool,
}

fn check(call: &'static str, status: i32) -> Result<(), WakuError> {
    if status == RET_OK {
        Ok(())
    } else {
        Err(WakuError::Status { call, status })
    }
}

fn check_str(argument: &'static str, value: &str) -> Result<(), WakuError> {
    if value.contains('\0') {
        Err(WakuError::InvalidString { argument })
    } else {
        Ok(())
    }
}

impl WakuContext {
    /// Creates a node. The init result arrives on `callback`.
    pub fn create(
        bindings: Arc<dyn WakuBindings>,
        config_json: &str,
        callback: CallbackHandle,
    ) -> Result<Self, WakuError> {
        check_str("config", config_json)?;
        let raw = bindings
            .create(config_json, callback)
            .ok_or_else(|| WakuError::CreateRejected {
                reason: "waku_new returned null".to_string(),
            })?;
        tracing::debug!(ctx = raw.addr(), "libwaku context created");
        Ok(Self {
            bindings,
            raw,
            released: AtomicBool::new(false),
        })
    }

    fn live(&self) -> Result<ContextHandle, WakuError> {
        if self.is_released() {
            Err(WakuError::Released)
        } else {
            Ok(self.raw)
        }
    }

    pub fn start(&self, callback: CallbackHandle) -> Result<(), WakuError> {
        check("waku_start", self.bindings.start(self.live()?, callback))
    }

    pub fn stop(&self, callback: CallbackHandle) -> Result<(), WakuError> {
        check("waku_stop", self.bindings.stop(self.live()?, callback))
    }

    pub fn set_event_callback(&self, callback: CallbackHandle) -> Result<(), WakuError> {
        self.bindings.set_event_callback(self.live()?, callback);
        Ok(())
    }

    pub fn relay_subscribe(&self, pubsub_topic: &str, callback: CallbackHandle) -> Result<(), WakuError> {
        check_str("pubsub_topic", pubsub_topic)?;
        check(
            "waku_relay_subscribe",
            self.bindings.relay_subscribe(self.live()?, pubsub_topic, callback),
        )
    }

    pub fn relay_unsubscribe(&self, pubsub_topic: &str, callback: CallbackHandle) -> Result<(), WakuError> {
        check_str("pubsub_topic", pubsub_topic)?;
        check(
            "waku_relay_unsubscribe",
            self.bindings.relay_unsubscribe(self.live()?, pubsub_topic, callback),
        )
    }

    /// Publishes a base64-encoded payload. `timeout_ms` of 0 uses the
    /// library default.
    pub fn relay_publish(
        &self,
        pubsub_topic: &str,
        payload_b64: &str,
        content_topic: &str,
        timeout_ms: u32,
        callback: CallbackHandle,
    ) -> Result<(), WakuError> {
        check_str("pubsub_topic", pubsub_topic)?;
        check_str("content_topic", content_topic)?;
        let timeout_ms = i32::try_from(timeout_ms).unwrap_or(i32::MAX);
        check(
            "waku_relay_publish",
            self.bindings.relay_publish(
                self.live()?,
                pubsub_topic,
                payload_b64,
                content_topic,
                timeout_ms,
                callback,
            ),
        )
    }

    pub fn filter_subscribe(
        &self,
        pubsub_topic: &str,
        content_topics: &[String],
        callback: CallbackHandle,
    ) -> Result<(), WakuError> {
        check_str("pubsub_topic", pubsub_topic)?;
        let topics = serde_json::Value::from(content_topics.to_vec()).to_string();
        check_str("content_topics", &topics)?;
        check(
            "waku_filter_subscribe",
            self.bindings
                .filter_subscribe(self.live()?, pubsub_topic, &topics, callback),
        )
    }

    pub fn store_query(&self, query_json: &str, callback: CallbackHandle) -> Result<(), WakuError> {
        check_str("query", query_json)?;
        check(
            "waku_store_query",
            self.bindings.store_query(self.live()?, query_json, callback),
        )
    }

    /// Frees the context. Returns `true` only for the call that did so.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.bindings.destroy(self.raw);
        tracing::debug!(ctx = self.raw.addr(), "libwaku context released");
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for WakuContext {
    fn drop(&mut self) {
        if self.release() {
            tracing::warn!(ctx = self.raw.addr(), "libwaku context released on drop");
        }
    }
}
