//! Request id to completion table.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::oneshot;

use modhost_core::error::{AppError, AppResult};
use modhost_core::events::Event;
use modhost_core::types::CorrelationId;

type Waiter = oneshot::Sender<AppResult<Arc<Event>>>;

#[derive(Debug)]
enum Slot {
    Pending(Vec<Waiter>),
    Completed(Arc<Event>),
}

/// Outcome of registering interest in a request.
#[derive(Debug)]
pub enum Wait {
    /// The terminal event already arrived.
    Ready(Arc<Event>),
    /// Resolved when the terminal event arrives or the table closes.
    Waiting(oneshot::Receiver<AppResult<Arc<Event>>>),
}

/// Tracks in-flight requests of one module.
///
/// Completed results are kept for late callers, bounded by `retention`
/// (oldest evicted first).
#[derive(Debug)]
pub struct CorrelationTable {
    module: String,
    slots: HashMap<CorrelationId, Slot>,
    completed: VecDeque<CorrelationId>,
    retention: usize,
    closed: bool,
}

impl CorrelationTable {
    pub fn new(module: impl Into<String>, retention: usize) -> Self {
        Self {
            module: module.into(),
            slots: HashMap::new(),
            completed: VecDeque::new(),
            retention: retention.max(1),
            closed: false,
        }
    }

    /// Registers a new in-flight request.
    pub fn open(&mut self, id: CorrelationId) -> AppResult<()> {
        if self.closed {
            return Err(AppError::disposed(&self.module));
        }
        self.slots.insert(id, Slot::Pending(Vec::new()));
        Ok(())
    }

    /// Stores the terminal event and wakes every waiter.
    ///
    /// Returns `false` if the request is unknown or already completed.
    pub fn complete(&mut self, id: CorrelationId, event: Arc<Event>) -> bool {
        let Some(slot) = self.slots.get_mut(&id) else {
            return false;
        };
        let Slot::Pending(waiters) = &mut *slot else {
            return false;
        };
        let waiters = std::mem::take(waiters);
        *slot = Slot::Completed(event.clone());

        for waiter in waiters {
            let _ = waiter.send(Ok(event.clone()));
        }

        self.completed.push_back(id);
        while self.completed.len() > self.retention {
            if let Some(evicted) = self.completed.pop_front() {
                self.slots.remove(&evicted);
            }
        }
        true
    }

    /// Forgets a request the library rejected synchronously.
    pub fn discard(&mut self, id: CorrelationId) {
        self.slots.remove(&id);
    }

    pub fn wait(&mut self, id: CorrelationId) -> AppResult<Wait> {
        match self.slots.get_mut(&id) {
            Some(Slot::Completed(event)) => Ok(Wait::Ready(event.clone())),
            Some(Slot::Pending(waiters)) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Ok(Wait::Waiting(rx))
            }
            None if self.closed => Err(AppError::disposed(&self.module)),
            None => Err(AppError::unknown_request(format!(
                "Module '{}' has no request {id}",
                self.module
            ))),
        }
    }

    /// Resolves every pending waiter with `Disposed` and refuses new requests.
    ///
    /// Returns the number of requests that were still in flight.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let mut abandoned = 0;
        for (_, slot) in self.slots.drain() {
            if let Slot::Pending(waiters) = slot {
                abandoned += 1;
                for waiter in waiters {
                    let _ = waiter.send(Err(AppError::disposed(&self.module)));
                }
            }
        }
        self.completed.clear();
        abandoned
    }

    pub fn in_flight(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Pending(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_core::error::ErrorKind;
    use modhost_core::events::{EventKind, EventPayload};

    fn event() -> Arc<Event> {
        Arc::new(Event::new("m", EventKind::RequestAck, 0, EventPayload::Empty))
    }

    #[tokio::test]
    async fn test_waiter_receives_completion() {
        let mut table = CorrelationTable::new("m", 4);
        let id = CorrelationId::new();
        table.open(id).expect("open");

        let Wait::Waiting(rx) = table.wait(id).expect("wait") else {
            panic!("expected pending");
        };
        assert!(table.complete(id, event()));
        assert!(rx.await.expect("sender").is_ok());
        assert!(matches!(table.wait(id), Ok(Wait::Ready(_))));
    }

    #[test]
    fn test_second_completion_is_rejected() {
        let mut table = CorrelationTable::new("m", 4);
        let id = CorrelationId::new();
        table.open(id).expect("open");
        assert!(table.complete(id, event()));
        assert!(!table.complete(id, event()));
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let mut table = CorrelationTable::new("m", 2);
        let ids: Vec<_> = (0..3).map(|_| CorrelationId::new()).collect();
        for id in &ids {
            table.open(*id).expect("open");
            table.complete(*id, event());
        }
        let err = table.wait(ids[0]).expect_err("evicted");
        assert_eq!(err.kind, ErrorKind::UnknownRequest);
        assert!(matches!(table.wait(ids[2]), Ok(Wait::Ready(_))));
    }

    #[tokio::test]
    async fn test_close_resolves_waiters_with_disposed() {
        let mut table = CorrelationTable::new("m", 4);
        let id = CorrelationId::new();
        table.open(id).expect("open");
        let Wait::Waiting(rx) = table.wait(id).expect("wait") else {
            panic!("expected pending");
        };

        assert_eq!(table.close(), 1);
        let err = rx.await.expect("sender").expect_err("disposed");
        assert_eq!(err.kind, ErrorKind::Disposed);
        assert_eq!(
            table.open(CorrelationId::new()).expect_err("closed").kind,
            ErrorKind::Disposed
        );
    }
}
