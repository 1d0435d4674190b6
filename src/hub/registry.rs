//! Set of currently connected clients.
//!
//! The lock is held only to copy handles in or out; fan-out and teardown
//! happen on a snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::client::{ClientHandle, ClientId, CloseReason};
use crate::bus::events::Outbound;

#[derive(Default)]
pub struct Registry {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
    unregistered: AtomicUsize,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, ClientHandle>> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Build a client with a bounded outbound queue. Not registered yet.
    pub fn create_client(
        self: &Arc<Self>,
        queue_capacity: usize,
    ) -> (ClientHandle, mpsc::Receiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        (ClientHandle::new(id, tx, Arc::downgrade(self)), rx)
    }

    /// Add a client. Returns false if it was already torn down.
    pub fn register(&self, client: ClientHandle) -> bool {
        let mut clients = self.clients();
        // Teardown records its reason before unregistering, so this check
        // cannot miss a close that raced with registration.
        if client.is_closed() {
            return false;
        }
        clients.insert(client.id(), client);
        true
    }

    /// Remove a client; no-op if absent
    pub fn unregister(&self, id: ClientId) -> bool {
        let removed = self.clients().remove(&id).is_some();
        if removed {
            self.unregistered.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Copy of the current client set
    pub fn snapshot(&self) -> Vec<ClientHandle> {
        self.clients().values().cloned().collect()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of successful unregistrations since startup
    pub fn unregister_count(&self) -> usize {
        self.unregistered.load(Ordering::Relaxed)
    }

    /// Tear down every registered client. Returns how many were closed here.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.snapshot()
            .into_iter()
            .filter(|client| client.close(reason))
            .count()
    }
}
