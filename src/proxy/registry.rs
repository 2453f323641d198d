//! Registry of open bridges
//!
//! Every accepted connection is registered before its upstream is opened and
//! deregistered exactly once when its bridge closes, so the registry size is
//! the number of open bridges. Entries hold the close signal for the bridge.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

pub type BridgeId = u64;

#[derive(Default)]
struct RegistryInner {
    bridges: HashMap<BridgeId, CancellationToken>,
    next_id: BridgeId,
    closed: bool,
}

/// Shared handle to the bridge registry
#[derive(Clone, Default)]
pub struct BridgeRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new bridge and return its id and close signal.
    ///
    /// Returns `None` once the registry has been closed.
    pub fn register(&self) -> Option<(BridgeId, CancellationToken)> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let close = CancellationToken::new();
        inner.bridges.insert(id, close.clone());
        Some((id, close))
    }

    /// Remove a bridge. Returns the remaining count, or `None` if `id` was
    /// not registered.
    pub fn deregister(&self, id: BridgeId) -> Option<usize> {
        let mut inner = self.lock();
        inner.bridges.remove(&id).map(|_| inner.bridges.len())
    }

    pub fn len(&self) -> usize {
        self.lock().bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Refuse further registrations and signal every open bridge to close.
    ///
    /// Bridges remove themselves as they finish. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        for close in inner.bridges.values() {
            close.cancel();
        }
        inner.bridges.len()
    }
}
