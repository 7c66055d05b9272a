//! In-memory libwaku for development and testing.
//!
//! Behaves like a small local network: every node created by the same
//! [`MockWaku`] sees every message published by any of them, and a shared
//! history answers store queries. Callbacks are delivered the way the real
//! library delivers them, on a thread the caller does not control, unless
//! [`Delivery::Inline`] is selected.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};

use modhost_broker::adapter::CallbackHandle;
use modhost_broker::ffi::{RET_ERR, RET_OK};
use modhost_core::types::encoding;

use super::bindings::{ContextHandle, WakuBindings};

const DEFAULT_PAGE_LIMIT: usize = 100;

/// How callbacks reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// On the calling thread, before the entry point returns.
    Inline,
    /// On one background thread, in call order.
    #[default]
    Worker,
    /// On a fresh thread per callback after a short jitter, in no
    /// particular order.
    Scattered,
}

/// Entry points the mock records and whose behavior can be altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    Create,
    Start,
    Stop,
    SetEventCallback,
    RelaySubscribe,
    RelayUnsubscribe,
    Publish,
    FilterSubscribe,
    StoreQuery,
}

impl MockCall {
    fn as_str(self) -> &'static str {
        match self {
            Self::Create => "waku_new",
            Self::Start => "waku_start",
            Self::Stop => "waku_stop",
            Self::SetEventCallback => "waku_set_event_callback",
            Self::RelaySubscribe => "waku_relay_subscribe",
            Self::RelayUnsubscribe => "waku_relay_unsubscribe",
            Self::Publish => "waku_relay_publish",
            Self::FilterSubscribe => "waku_filter_subscribe",
            Self::StoreQuery => "waku_store_query",
        }
    }
}

#[derive(Debug, Default)]
struct Node {
    started: bool,
    events: Option<CallbackHandle>,
    relay_topics: HashSet<String>,
    /// (pubsub topic, content topics)
    filters: Vec<(String, Vec<String>)>,
}

impl Node {
    fn receives(&self, topic: &str, content_topic: &str) -> bool {
        self.started
            && (self.relay_topics.contains(topic)
                || self
                    .filters
                    .iter()
                    .any(|(t, cts)| t == topic && cts.iter().any(|c| c == content_topic)))
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    hash: String,
    topic: String,
    content_topic: String,
    payload_b64: String,
    timestamp: i64,
}

impl StoredMessage {
    fn event_json(&self) -> String {
        json!({
            "eventType": "message",
            "messageHash": self.hash,
            "pubsubTopic": self.topic,
            "wakuMessage": {
                "payload": self.payload_b64,
                "contentTopic": self.content_topic,
                "version": 0,
                "timestamp": self.timestamp,
            }
        })
        .to_string()
    }

    fn store_json(&self) -> Value {
        json!({
            "messageHash": self.hash,
            "pubsubTopic": self.topic,
            "message": {
                "payload": self.payload_b64,
                "contentTopic": self.content_topic,
                "version": 0,
                "timestamp": self.timestamp,
            }
        })
    }
}

#[derive(Debug)]
struct Faults {
    fail_create: bool,
    reject: HashSet<MockCall>,
    fail_async: HashSet<MockCall>,
    withhold: HashSet<MockCall>,
    duplicate_callbacks: bool,
    loopback: bool,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            fail_create: false,
            reject: HashSet::new(),
            fail_async: HashSet::new(),
            withhold: HashSet::new(),
            duplicate_callbacks: false,
            loopback: true,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: usize,
    nodes: HashMap<usize, Node>,
    history: Vec<StoredMessage>,
    calls: Vec<MockCall>,
    faults: Faults,
}

type Job = Box<dyn FnOnce() + Send>;

/// One pending callback invocation.
struct Reply {
    handle: CallbackHandle,
    status: i32,
    message: String,
}

/// Mock libwaku that simulates the library in-memory.
#[derive(Debug)]
pub struct MockWaku {
    state: Mutex<State>,
    delivery: Delivery,
    worker: Mutex<Option<mpsc::Sender<Job>>>,
    created: AtomicUsize,
    released: AtomicUsize,
    destroy_calls: AtomicUsize,
}

impl Default for MockWaku {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWaku {
    /// Creates a mock delivering callbacks on a background worker thread.
    pub fn new() -> Self {
        Self::with_delivery(Delivery::default())
    }

    pub fn with_delivery(delivery: Delivery) -> Self {
        let worker = match delivery {
            Delivery::Worker => {
                let (tx, rx) = mpsc::channel::<Job>();
                thread::Builder::new()
                    .name("mock-waku".into())
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .ok()
                    .map(|_| tx)
            }
            _ => None,
        };

        Self {
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
            delivery,
            worker: Mutex::new(worker),
            created: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Fault injection ──

    /// Makes `waku_new` return null.
    pub fn set_fail_create(&self, fail: bool) {
        self.lock().faults.fail_create = fail;
    }

    /// Makes `call` return a non-zero status without calling back.
    pub fn reject(&self, call: MockCall) {
        self.lock().faults.reject.insert(call);
    }

    /// Makes `call` accept the request and then report failure through
    /// its callback.
    pub fn fail_async(&self, call: MockCall) {
        self.lock().faults.fail_async.insert(call);
    }

    /// Makes `call` accept the request and never call back.
    pub fn withhold(&self, call: MockCall) {
        self.lock().faults.withhold.insert(call);
    }

    /// Delivers every request callback twice.
    pub fn set_duplicate_callbacks(&self, duplicate: bool) {
        self.lock().faults.duplicate_callbacks = duplicate;
    }

    /// Whether published messages are delivered back to subscribed nodes.
    pub fn set_loopback(&self, loopback: bool) {
        self.lock().faults.loopback = loopback;
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        let loopback = state.faults.loopback;
        state.faults = Faults {
            loopback,
            ..Faults::default()
        };
    }

    // ── Network simulation ──

    /// Injects a message as if another peer had published it.
    ///
    /// Returns the message hash.
    pub fn emit_message(&self, topic: &str, content_topic: &str, payload: &[u8]) -> String {
        let message = StoredMessage {
            hash: Self::message_hash(topic, content_topic, payload),
            topic: topic.to_string(),
            content_topic: content_topic.to_string(),
            payload_b64: encoding::encode(payload),
            timestamp: now_nanos(),
        };
        let hash = message.hash.clone();
        let replies = {
            let mut state = self.lock();
            state.history.push(message.clone());
            Self::fan_out(&state, &message)
        };
        self.deliver_all(replies);
        hash
    }

    /// The hash the mock assigns to a message.
    pub fn message_hash(topic: &str, content_topic: &str, payload: &[u8]) -> String {
        let mut hasher = DefaultHasher::new();
        topic.hash(&mut hasher);
        content_topic.hash(&mut hasher);
        payload.hash(&mut hasher);
        format!("0x{:016x}", hasher.finish())
    }

    // ── Inspection ──

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, call: MockCall) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    /// Contexts successfully created.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Live contexts freed by `waku_destroy`.
    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Every `waku_destroy` call, including ones for unknown contexts.
    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn live_contexts(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    // ── Internals ──

    fn fan_out(state: &State, message: &StoredMessage) -> Vec<Reply> {
        let body = message.event_json();
        state
            .nodes
            .values()
            .filter(|node| node.receives(&message.topic, &message.content_topic))
            .filter_map(|node| node.events)
            .map(|handle| Reply {
                handle,
                status: RET_OK,
                message: body.clone(),
            })
            .collect()
    }

    /// Records the call and applies faults. Returns the synchronous status
    /// and, when the request is accepted, the callback to send.
    fn request(
        &self,
        state: &mut State,
        call: MockCall,
        callback: CallbackHandle,
        ok_message: String,
    ) -> (i32, Vec<Reply>) {
        state.calls.push(call);
        let faults = &state.faults;

        if faults.reject.contains(&call) {
            tracing::warn!("[MockWaku] Rejecting {}", call.as_str());
            return (RET_ERR, Vec::new());
        }
        if faults.withhold.contains(&call) {
            tracing::debug!("[MockWaku] Withholding callback for {}", call.as_str());
            return (RET_OK, Vec::new());
        }

        let (status, message) = if faults.fail_async.contains(&call) {
            (RET_ERR, format!("mock failure: {}", call.as_str()))
        } else {
            (RET_OK, ok_message)
        };
        let copies = if faults.duplicate_callbacks { 2 } else { 1 };
        let replies = (0..copies)
            .map(|_| Reply {
                handle: callback,
                status,
                message: message.clone(),
            })
            .collect();
        (RET_OK, replies)
    }

    fn deliver_all(&self, replies: Vec<Reply>) {
        for reply in replies {
            self.deliver(reply);
        }
    }

    fn deliver(&self, reply: Reply) {
        let Reply {
            handle,
            status,
            message,
        } = reply;
        match self.delivery {
            Delivery::Inline => handle.invoke(status, &message),
            Delivery::Worker => {
                let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
                let sent = worker
                    .as_ref()
                    .map(|tx| {
                        tx.send(Box::new(move || handle.invoke(status, &message)))
                            .is_ok()
                    })
                    .unwrap_or(false);
                if !sent {
                    tracing::error!("[MockWaku] Callback worker unavailable");
                }
            }
            Delivery::Scattered => {
                let jitter = Duration::from_millis(handle.token() % 5);
                thread::spawn(move || {
                    thread::sleep(jitter);
                    handle.invoke(status, &message);
                });
            }
        }
    }

    fn node_mut<'a>(state: &'a mut State, ctx: ContextHandle) -> Option<&'a mut Node> {
        state.nodes.get_mut(&node_id(ctx))
    }

    fn store_response(history: &[StoredMessage], query: &Value) -> Value {
        let topic = query.get("pubsubTopic").and_then(Value::as_str);
        let content_topics: Vec<&str> = query
            .get("contentTopics")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let start = query.get("startTime").and_then(Value::as_i64);
        let end = query.get("endTime").and_then(Value::as_i64);
        let limit = query
            .get("paginationLimit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT);
        let forward = query
            .get("paginationForward")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let cursor = query.get("paginationCursor").and_then(Value::as_str);

        let mut matching: Vec<&StoredMessage> = history
            .iter()
            .filter(|m| topic.is_none_or(|t| m.topic == t))
            .filter(|m| content_topics.is_empty() || content_topics.contains(&m.content_topic.as_str()))
            .filter(|m| start.is_none_or(|s| m.timestamp >= s))
            .filter(|m| end.is_none_or(|e| m.timestamp <= e))
            .collect();
        if !forward {
            matching.reverse();
        }

        let skip = cursor
            .and_then(|c| matching.iter().position(|m| m.hash == c))
            .map(|p| p + 1)
            .unwrap_or(0);
        let page: Vec<&StoredMessage> = matching.iter().skip(skip).take(limit).copied().collect();
        let more = skip + page.len() < matching.len();

        let mut response = json!({
            "statusCode": 200,
            "statusDesc": "OK",
            "messages": page.iter().map(|m| m.store_json()).collect::<Vec<_>>(),
        });
        if more {
            if let Some(last) = page.last() {
                response["paginationCursor"] = Value::from(last.hash.clone());
            }
        }
        response
    }
}

fn node_id(ctx: ContextHandle) -> usize {
    ctx.addr()
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

impl WakuBindings for MockWaku {
    fn create(&self, config_json: &str, callback: CallbackHandle) -> Option<ContextHandle> {
        let (ctx, replies) = {
            let mut state = self.lock();
            if state.faults.fail_create {
                state.calls.push(MockCall::Create);
                tracing::warn!("[MockWaku] waku_new refused configuration");
                return None;
            }
            if serde_json::from_str::<Value>(config_json).is_err() {
                state.calls.push(MockCall::Create);
                tracing::warn!("[MockWaku] waku_new given malformed configuration");
                return None;
            }

            let id = state.next_id;
            state.next_id += 1;
            let ctx = ContextHandle::from_raw(std::ptr::without_provenance_mut::<c_void>(id))?;
            state.nodes.insert(id, Node::default());
            let (_, replies) = self.request(&mut state, MockCall::Create, callback, String::new());
            (ctx, replies)
        };

        self.created.fetch_add(1, Ordering::SeqCst);
        tracing::info!("[MockWaku] Created node {}", ctx.addr());
        self.deliver_all(replies);
        Some(ctx)
    }

    fn start(&self, ctx: ContextHandle, callback: CallbackHandle) -> i32 {
        let (status, replies) = {
            let mut state = self.lock();
            if Self::node_mut(&mut state, ctx).is_none() {
                return RET_ERR;
            }
            let (status, replies) = self.request(&mut state, MockCall::Start, callback, String::new());
            let failing = state.faults.fail_async.contains(&MockCall::Start);
            if status == RET_OK && !failing {
                if let Some(node) = Self::node_mut(&mut state, ctx) {
                    node.started = true;
                }
            }
            (status, replies)
        };
        self.deliver_all(replies);
        status
    }

    fn stop(&self, ctx: ContextHandle, callback: CallbackHandle) -> i32 {
        let (status, replies) = {
            let mut state = self.lock();
            if Self::node_mut(&mut state, ctx).is_none() {
                return RET_ERR;
            }
            let (status, replies) = self.request(&mut state, MockCall::Stop, callback, String::new());
            if status == RET_OK {
                if let Some(node) = Self::node_mut(&mut state, ctx) {
                    node.started = false;
                    node.relay_topics.clear();
                    node.filters.clear();
                }
            }
            (status, replies)
        };
        self.deliver_all(replies);
        status
    }

    fn set_event_callback(&self, ctx: ContextHandle, callback: CallbackHandle) {
        let mut state = self.lock();
        state.calls.push(MockCall::SetEventCallback);
        if let Some(node) = Self::node_mut(&mut state, ctx) {
            node.events = Some(callback);
        }
    }

    fn relay_subscribe(&self, ctx: ContextHandle, pubsub_topic: &str, callback: CallbackHandle) -> i32 {
        let (status, replies) = {
            let mut state = self.lock();
            match Self::node_mut(&mut state, ctx) {
                Some(node) if node.started => {}
                _ => return RET_ERR,
            }
            let (status, replies) =
                self.request(&mut state, MockCall::RelaySubscribe, callback, String::new());
            if status == RET_OK {
                if let Some(node) = Self::node_mut(&mut state, ctx) {
                    node.relay_topics.insert(pubsub_topic.to_string());
                }
            }
            (status, replies)
        };
        self.deliver_all(replies);
        status
    }

    fn relay_unsubscribe(&self, ctx: ContextHandle, pubsub_topic: &str, callback: CallbackHandle) -> i32 {
        let (status, replies) = {
            let mut state = self.lock();
            if Self::node_mut(&mut state, ctx).is_none() {
                return RET_ERR;
            }
            let (status, replies) =
                self.request(&mut state, MockCall::RelayUnsubscribe, callback, String::new());
            if status == RET_OK {
                if let Some(node) = Self::node_mut(&mut state, ctx) {
                    node.relay_topics.remove(pubsub_topic);
                }
            }
            (status, replies)
        };
        self.deliver_all(replies);
        status
    }

    fn relay_publish(
        &self,
        ctx: ContextHandle,
        pubsub_topic: &str,
        message: &str,
        content_topic: &str,
        _timeout_ms: i32,
        callback: CallbackHandle,
    ) -> i32 {
        let Ok(payload) = encoding::decode(message) else {
            tracing::warn!("[MockWaku] Publish payload is not valid base64");
            return RET_ERR;
        };
        let stored = StoredMessage {
            hash: Self::message_hash(pubsub_topic, content_topic, &payload),
            topic: pubsub_topic.to_string(),
            content_topic: content_topic.to_string(),
            payload_b64: message.to_string(),
            timestamp: now_nanos(),
        };

        let (status, replies) = {
            let mut state = self.lock();
            match Self::node_mut(&mut state, ctx) {
                Some(node) if node.started => {}
                _ => return RET_ERR,
            }
            let (status, replies) =
                self.request(&mut state, MockCall::Publish, callback, stored.hash.clone());
            let accepted = status == RET_OK && !state.faults.fail_async.contains(&MockCall::Publish);
            if accepted {
                state.history.push(stored.clone());
            }
            let mut all = replies;
            if accepted && state.faults.loopback {
                all.extend(Self::fan_out(&state, &stored));
            }
            (status, all)
        };

        // Acknowledgement first, then deliveries.
        self.deliver_all(replies);
        status
    }

    fn filter_subscribe(
        &self,
        ctx: ContextHandle,
        pubsub_topic: &str,
        content_topics_json: &str,
        callback: CallbackHandle,
    ) -> i32 {
        let Ok(content_topics) = serde_json::from_str::<Vec<String>>(content_topics_json) else {
            tracing::warn!("[MockWaku] Malformed content topic list");
            return RET_ERR;
        };
        let (status, replies) = {
            let mut state = self.lock();
            match Self::node_mut(&mut state, ctx) {
                Some(node) if node.started => {}
                _ => return RET_ERR,
            }
            let (status, replies) =
                self.request(&mut state, MockCall::FilterSubscribe, callback, String::new());
            if status == RET_OK {
                if let Some(node) = Self::node_mut(&mut state, ctx) {
                    node.filters.push((pubsub_topic.to_string(), content_topics));
                }
            }
            (status, replies)
        };
        self.deliver_all(replies);
        status
    }

    fn store_query(&self, ctx: ContextHandle, query_json: &str, callback: CallbackHandle) -> i32 {
        let Ok(query) = serde_json::from_str::<Value>(query_json) else {
            tracing::warn!("[MockWaku] Malformed store query");
            return RET_ERR;
        };
        let (status, replies) = {
            let mut state = self.lock();
            match Self::node_mut(&mut state, ctx) {
                Some(node) if node.started => {}
                _ => return RET_ERR,
            }
            let response = Self::store_response(&state.history, &query).to_string();
            self.request(&mut state, MockCall::StoreQuery, callback, response)
        };
        self.deliver_all(replies);
        status
    }

    fn destroy(&self, ctx: ContextHandle) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self.lock().nodes.remove(&node_id(ctx)).is_some() {
            self.released.fetch_add(1, Ordering::SeqCst);
            tracing::info!("[MockWaku] Destroyed node {}", ctx.addr());
        } else {
            tracing::warn!("[MockWaku] waku_destroy on unknown context {}", ctx.addr());
        }
    }
}
