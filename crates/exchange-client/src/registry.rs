//! Tracks per-endpoint sub-clients across their lifecycle sets

use crate::sub_client::{PageBufferClient, PageBufferClientStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Registry of per-endpoint sub-clients.
///
/// A registered sub-client is in exactly one of three sets: queued (idle,
/// eligible for dispatch), pending (request in flight, tracked implicitly),
/// or completed (endpoint exhausted). The registered map is concurrent so
/// duplicate checks and status snapshots stay off the exchange lock; the
/// queued and completed sets are only mutated while the exchange lock is
/// held, which keeps the sets disjoint.
pub(crate) struct SubClientRegistry {
    registered: DashMap<Arc<str>, Arc<dyn PageBufferClient>>,
    queued: Mutex<VecDeque<Arc<str>>>,
    completed: Mutex<HashSet<Arc<str>>>,
}

impl SubClientRegistry {
    pub(crate) fn new() -> Self {
        Self {
            registered: DashMap::new(),
            queued: Mutex::new(VecDeque::new()),
            completed: Mutex::new(HashSet::new()),
        }
    }

    /// Register a sub-client and queue it for dispatch.
    ///
    /// Returns `false` without side effects when the location is already
    /// registered.
    pub(crate) fn add(&self, location: Arc<str>, client: Arc<dyn PageBufferClient>) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.registered.entry(Arc::clone(&location)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(client);
                self.queued.lock().push_back(location);
                true
            }
        }
    }

    /// True if the location has been registered
    pub(crate) fn contains(&self, location: &str) -> bool {
        self.registered.contains_key(location)
    }

    /// True if no endpoint has been registered yet
    pub(crate) fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    pub(crate) fn registered_count(&self) -> usize {
        self.registered.len()
    }

    pub(crate) fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }

    /// Sub-clients with a request in flight
    pub(crate) fn pending_count(&self) -> usize {
        let queued = self.queued.lock().len();
        let completed = self.completed.lock().len();
        self.registered.len().saturating_sub(queued + completed)
    }

    /// Pop the next queued sub-client for dispatch; the caller marks it
    /// pending by issuing its request
    pub(crate) fn pop_queued(&self) -> Option<(Arc<str>, Arc<dyn PageBufferClient>)> {
        let mut queued = self.queued.lock();
        while let Some(location) = queued.pop_front() {
            if let Some(client) = self.registered.get(&location) {
                let handle = Arc::clone(client.value());
                drop(client);
                return Some((location, handle));
            }
        }
        None
    }

    /// Return a sub-client to the queued set after its request completed.
    ///
    /// No-op for unknown, completed, or already-queued locations.
    pub(crate) fn requeue(&self, location: &str) {
        let Some(entry) = self.registered.get(location) else {
            return;
        };
        let key = Arc::clone(entry.key());
        drop(entry);

        if self.completed.lock().contains(location) {
            return;
        }
        let mut queued = self.queued.lock();
        if !queued.iter().any(|queued_key| &**queued_key == location) {
            queued.push_back(key);
        }
    }

    /// Move a sub-client to the completed set
    pub(crate) fn mark_completed(&self, location: &str) {
        let Some(entry) = self.registered.get(location) else {
            return;
        };
        let key = Arc::clone(entry.key());
        drop(entry);

        self.queued.lock().retain(|queued_key| &**queued_key != location);
        self.completed.lock().insert(key);
    }

    /// Close every registered sub-client
    pub(crate) fn close_all(&self) {
        for entry in self.registered.iter() {
            entry.value().close();
        }
    }

    /// Status snapshot of every registered sub-client
    pub(crate) fn statuses(&self) -> Vec<PageBufferClientStatus> {
        self.registered
            .iter()
            .map(|entry| entry.value().status())
            .collect()
    }
}
