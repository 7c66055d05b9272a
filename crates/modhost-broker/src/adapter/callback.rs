//! Callback handles and the per-module adapter.

use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, trace, warn};

use modhost_core::error::{AppError, AppResult};
use modhost_core::events::{Event, EventKind, EventPayload, EventSink, STATUS_OK};
use modhost_core::types::CorrelationId;

use super::correlation::{CorrelationTable, Wait};
use super::routes::{self, Route};
use super::{CallbackDecoder, DecodedEvent, RequestKind};

/// Token identifying one registered callback route.
///
/// Passed to native code as its `user_data` and handed back on invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle {
    token: u64,
}

impl CallbackHandle {
    pub fn token(self) -> u64 {
        self.token
    }

    /// The opaque pointer value handed to native code.
    pub fn user_data(self) -> *mut c_void {
        self.token as usize as *mut c_void
    }

    /// Recovers a handle from a `user_data` pointer previously produced by
    /// [`CallbackHandle::user_data`].
    pub fn from_user_data(user_data: *mut c_void) -> Self {
        Self {
            token: user_data as usize as u64,
        }
    }

    /// Delivers one callback invocation.
    ///
    /// Safe to call from any thread, any number of times. Invocations for
    /// completed single-shot routes and for torn-down adapters are dropped.
    pub fn invoke(self, status: i32, message: &str) {
        let Some(route) = routes::resolve(self.token) else {
            warn!(
                token = self.token,
                status,
                "Callback for unknown or already completed request; dropping"
            );
            return;
        };

        let Some(adapter) = route.adapter.upgrade() else {
            debug!(
                token = self.token,
                request = %route.request,
                "Callback after module release; dropping"
            );
            return;
        };

        adapter.deliver(self.token, &route, status, message);
    }
}

/// A single-shot request registered with the adapter.
#[derive(Debug, Clone, Copy)]
pub struct PendingRequest {
    pub handle: CallbackHandle,
    pub correlation_id: CorrelationId,
    pub request: RequestKind,
}

#[derive(Debug)]
pub(crate) struct AdapterShared {
    module: String,
    decoder: Arc<dyn CallbackDecoder>,
    sink: RwLock<Option<EventSink>>,
    pending: Mutex<CorrelationTable>,
    tokens: Mutex<HashSet<u64>>,
    detached: AtomicBool,
}

impl AdapterShared {
    fn deliver(&self, token: u64, route: &Route, status: i32, message: &str) {
        if self.detached.load(Ordering::Acquire) {
            debug!(module = %self.module, request = %route.request, "Adapter detached; dropping callback");
            return;
        }
        if !route.request.is_repeating() {
            self.tokens.lock().unwrap_or_else(|e| e.into_inner()).remove(&token);
        }

        let mut drafts = self.decoder.decode(route.request, status, message);
        if route.correlation_id.is_some() {
            if drafts.is_empty() {
                drafts.push(fallback_event(route.request, status, message));
            }
            let last = drafts.len() - 1;
            for (index, draft) in drafts.iter_mut().enumerate() {
                draft.terminal = index == last;
            }
        }

        trace!(
            module = %self.module,
            request = %route.request,
            status,
            events = drafts.len(),
            "Callback decoded"
        );

        for draft in drafts {
            let mut event = Event::new(self.module.clone(), draft.kind, draft.status, draft.payload);
            if let Some(id) = route.correlation_id {
                event = event.with_correlation(id, draft.terminal);
            }
            let event = Arc::new(event);

            self.emit(event.clone());

            if let (Some(id), true) = (route.correlation_id, event.terminal) {
                let completed = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .complete(id, event);
                if !completed {
                    debug!(module = %self.module, correlation_id = %id, "No pending slot for result");
                }
            }
        }
    }

    fn emit(&self, event: Arc<Event>) {
        let sink = self.sink.read().unwrap_or_else(|e| e.into_inner());
        match sink.as_ref() {
            Some(sink) => {
                sink.emit(event);
            }
            None => warn!(
                module = %self.module,
                kind = ?event.kind,
                status = event.status,
                "Module not attached to a relay; event discarded"
            ),
        }
    }

    fn purge_routes(&self) {
        let tokens: Vec<u64> = self
            .tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for token in tokens {
            routes::remove(token);
        }
    }
}

impl Drop for AdapterShared {
    fn drop(&mut self) {
        self.purge_routes();
    }
}

fn fallback_event(request: RequestKind, status: i32, message: &str) -> DecodedEvent {
    let kind = if status == STATUS_OK {
        request.ack_kind()
    } else {
        EventKind::Error
    };
    let payload = if message.is_empty() {
        EventPayload::Empty
    } else {
        EventPayload::Text(message.to_string())
    };
    DecodedEvent::new(kind, status, payload)
}

/// Converts library callbacks of one module into correlated events.
///
/// The module owns the adapter. Routes in the global table only hold weak
/// references to it.
#[derive(Debug, Clone)]
pub struct CallbackAdapter {
    shared: Arc<AdapterShared>,
}

impl CallbackAdapter {
    /// Creates an adapter for `module`, retaining up to `retention`
    /// completed results for late waiters.
    pub fn new(module: impl Into<String>, decoder: Arc<dyn CallbackDecoder>, retention: usize) -> Self {
        let module = module.into();
        Self {
            shared: Arc::new(AdapterShared {
                pending: Mutex::new(CorrelationTable::new(module.clone(), retention)),
                module,
                decoder,
                sink: RwLock::new(None),
                tokens: Mutex::new(HashSet::new()),
                detached: AtomicBool::new(false),
            }),
        }
    }

    pub fn module(&self) -> &str {
        &self.shared.module
    }

    /// Connects the adapter to the relay events are emitted on.
    pub fn attach(&self, sink: EventSink) {
        *self.shared.sink.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    pub fn sink(&self) -> Option<EventSink> {
        self.shared
            .sink
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Emits an event that did not come through a library callback.
    pub fn emit(&self, event: Event) {
        self.shared.emit(Arc::new(event));
    }

    /// Registers a single-shot request and returns the handle to pass to
    /// the library.
    pub fn begin(&self, request: RequestKind) -> AppResult<PendingRequest> {
        if self.is_detached() {
            return Err(AppError::disposed(&self.shared.module));
        }

        let correlation_id = CorrelationId::new();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .open(correlation_id)?;

        let token = self.register(Route {
            adapter: Arc::downgrade(&self.shared),
            request,
            correlation_id: Some(correlation_id),
        });

        Ok(PendingRequest {
            handle: CallbackHandle { token },
            correlation_id,
            request,
        })
    }

    /// Registers the repeating context-wide event callback.
    pub fn event_callback(&self) -> CallbackHandle {
        let token = self.register(Route {
            adapter: Arc::downgrade(&self.shared),
            request: RequestKind::Events,
            correlation_id: None,
        });
        CallbackHandle { token }
    }

    /// Withdraws a request the library refused synchronously. No event is
    /// produced for it.
    pub fn abandon(&self, pending: &PendingRequest) {
        let token = pending.handle.token;
        self.shared
            .tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&token);
        routes::remove(token);
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .discard(pending.correlation_id);
    }

    /// Waits for the terminal event of a request.
    pub async fn wait_for(&self, id: CorrelationId, timeout: Duration) -> AppResult<Arc<Event>> {
        let wait = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .wait(id)?;

        let event = match wait {
            Wait::Ready(event) => event,
            Wait::Waiting(rx) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result?,
                Ok(Err(_)) => return Err(AppError::disposed(&self.shared.module)),
                Err(_) => {
                    return Err(AppError::timed_out(format!(
                        "Module '{}' produced no result for request {id} within {}ms",
                        self.shared.module,
                        timeout.as_millis()
                    )));
                }
            },
        };

        match event.to_error() {
            Some(err) => Err(err),
            None => Ok(event),
        }
    }

    /// Stops routing callbacks to this adapter and resolves every pending
    /// wait with `Disposed`. Idempotent.
    pub fn detach(&self) {
        if self.shared.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.purge_routes();
        let abandoned = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .close();
        debug!(module = %self.shared.module, abandoned, "Callback adapter detached");
    }

    pub fn is_detached(&self) -> bool {
        self.shared.detached.load(Ordering::Acquire)
    }

    /// Requests still waiting for their terminal callback.
    pub fn in_flight(&self) -> usize {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .in_flight()
    }

    fn register(&self, route: Route) -> u64 {
        let token = routes::insert(route);
        self.shared
            .tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token);
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_core::error::ErrorKind;
    use modhost_core::events::RelayMessage;

    #[derive(Debug)]
    struct SplitDecoder;

    impl CallbackDecoder for SplitDecoder {
        fn decode(&self, request: RequestKind, status: i32, message: &str) -> Vec<DecodedEvent> {
            match request {
                RequestKind::Query => message
                    .split(',')
                    .map(|part| {
                        DecodedEvent::new(
                            EventKind::QueryResult,
                            status,
                            EventPayload::Text(part.to_string()),
                        )
                    })
                    .collect(),
                _ => Vec::new(),
            }
        }
    }

    fn adapter() -> (CallbackAdapter, tokio::sync::mpsc::UnboundedReceiver<RelayMessage>) {
        let adapter = CallbackAdapter::new("test", Arc::new(SplitDecoder), 16);
        let (sink, rx) = EventSink::channel("test");
        adapter.attach(sink);
        (adapter, rx)
    }

    fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<RelayMessage>) -> Option<Arc<Event>> {
        match rx.try_recv() {
            Ok(RelayMessage::Event(event)) => Some(event),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_single_shot_route_fires_once() {
        let (adapter, mut rx) = adapter();
        let pending = adapter.begin(RequestKind::Publish).expect("begin");

        pending.handle.invoke(0, "ok");
        pending.handle.invoke(0, "again");

        let event = next_event(&mut rx).expect("first event");
        assert_eq!(event.correlation_id, Some(pending.correlation_id));
        assert!(event.terminal);
        assert_eq!(event.kind, EventKind::RequestAck);
        assert!(next_event(&mut rx).is_none());

        let result = adapter
            .wait_for(pending.correlation_id, Duration::from_millis(10))
            .await
            .expect("result");
        assert_eq!(result.payload.as_text(), Some("ok"));
    }

    #[tokio::test]
    async fn test_multi_event_reply_marks_only_last_terminal() {
        let (adapter, mut rx) = adapter();
        let pending = adapter.begin(RequestKind::Query).expect("begin");
        pending.handle.invoke(0, "a,b,c");

        let events: Vec<_> = std::iter::from_fn(|| next_event(&mut rx)).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.iter().map(|e| e.terminal).collect::<Vec<_>>(),
            vec![false, false, true]
        );
    }

    #[tokio::test]
    async fn test_event_route_repeats() {
        let (adapter, mut rx) = adapter();
        let handle = adapter.event_callback();
        handle.invoke(0, "one");
        handle.invoke(0, "two");

        let events: Vec<_> = std::iter::from_fn(|| next_event(&mut rx)).collect();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.correlation_id.is_none() && !e.terminal));
    }

    #[tokio::test]
    async fn test_failed_result_surfaces_library_error() {
        let (adapter, mut rx) = adapter();
        let pending = adapter.begin(RequestKind::Subscribe).expect("begin");
        pending.handle.invoke(1, "no such topic");

        let event = next_event(&mut rx).expect("event");
        assert_eq!(event.kind, EventKind::Error);

        let err = adapter
            .wait_for(pending.correlation_id, Duration::from_millis(10))
            .await
            .expect_err("library error");
        assert_eq!(err.kind, ErrorKind::Library);
        assert_eq!(err.status_code, Some(1));
    }

    #[tokio::test]
    async fn test_missing_callback_times_out() {
        let (adapter, _rx) = adapter();
        let pending = adapter.begin(RequestKind::Publish).expect("begin");
        let err = adapter
            .wait_for(pending.correlation_id, Duration::from_millis(20))
            .await
            .expect_err("timeout");
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_detach_drops_late_callbacks_and_disposes_waiters() {
        let (adapter, mut rx) = adapter();
        let pending = adapter.begin(RequestKind::Query).expect("begin");

        let waiter = {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                adapter
                    .wait_for(pending.correlation_id, Duration::from_secs(5))
                    .await
            })
        };
        tokio::task::yield_now().await;

        adapter.detach();
        pending.handle.invoke(0, "late");

        let err = waiter.await.expect("join").expect_err("disposed");
        assert_eq!(err.kind, ErrorKind::Disposed);
        assert!(next_event(&mut rx).is_none());
        assert_eq!(
            adapter.begin(RequestKind::Publish).expect_err("detached").kind,
            ErrorKind::Disposed
        );
    }

    #[test]
    fn test_dropped_adapter_leaves_no_routes() {
        let adapter = CallbackAdapter::new("gone", Arc::new(SplitDecoder), 4);
        let pending = adapter.begin(RequestKind::Start).expect("begin");
        let events = adapter.event_callback();
        drop(adapter);

        // Both invocations find nothing and return quietly.
        pending.handle.invoke(0, "");
        events.invoke(0, "");
        assert!(routes::resolve(events.token()).is_none());
    }

    #[test]
    fn test_user_data_roundtrip() {
        let handle = CallbackHandle { token: 42 };
        assert_eq!(CallbackHandle::from_user_data(handle.user_data()), handle);
    }
}
