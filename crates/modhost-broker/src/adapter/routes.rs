//! Process-wide callback route table.

use std::sync::LazyLock;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use modhost_core::types::CorrelationId;

use super::RequestKind;
use super::callback::AdapterShared;

#[derive(Debug, Clone)]
pub(crate) struct Route {
    pub adapter: Weak<AdapterShared>,
    pub request: RequestKind,
    pub correlation_id: Option<CorrelationId>,
}

impl Route {
    fn is_repeating(&self) -> bool {
        self.request.is_repeating()
    }
}

static ROUTES: LazyLock<DashMap<u64, Route>> = LazyLock::new(DashMap::new);

// Zero is never handed out so a null `user_data` cannot alias a route.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

pub(crate) fn insert(route: Route) -> u64 {
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    ROUTES.insert(token, route);
    token
}

/// Resolves a token. Single-shot routes are removed atomically, so only the
/// first invocation wins.
pub(crate) fn resolve(token: u64) -> Option<Route> {
    if let Some((_, route)) = ROUTES.remove_if(&token, |_, route| !route.is_repeating()) {
        return Some(route);
    }
    ROUTES.get(&token).map(|entry| entry.value().clone())
}

pub(crate) fn remove(token: u64) {
    ROUTES.remove(&token);
}

/// Number of routes currently registered across all adapters.
pub fn live_routes() -> usize {
    ROUTES.len()
}
