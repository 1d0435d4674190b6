//! One connected WebSocket client as seen by the hub.
//!
//! A `ClientHandle` owns the producer side of the client's outbound queue,
//! its idle timer and a one-shot teardown guard. The socket itself belongs to
//! the per-connection reader/writer tasks; they watch `closed()` and drop the
//! connection when it fires.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

use super::registry::Registry;
use crate::bus::events::Outbound;

pub type ClientId = u64;

/// Why a client was torn down. Only the first reason is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    IdleTimeout,
    ReadError,
    WriteError,
    ClientClosed,
    /// The broadcaster gave up on a full queue
    SlowConsumer,
    Shutdown,
}

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Sent,
    Full,
    Closed,
}

#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    id: ClientId,
    /// `None` once the queue is closed; dropping the sender ends the writer
    sender: Mutex<Option<mpsc::Sender<Outbound>>>,
    activity: Notify,
    closed: CancellationToken,
    close_reason: OnceLock<CloseReason>,
    registry: Weak<Registry>,
}

fn lock_sender(
    m: &Mutex<Option<mpsc::Sender<Outbound>>>,
) -> MutexGuard<'_, Option<mpsc::Sender<Outbound>>> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ClientHandle {
    pub(super) fn new(
        id: ClientId,
        sender: mpsc::Sender<Outbound>,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                id,
                sender: Mutex::new(Some(sender)),
                activity: Notify::new(),
                closed: CancellationToken::new(),
                close_reason: OnceLock::new(),
                registry,
            }),
        }
    }

    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.close_reason.get().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.get().copied()
    }

    /// Resolves once teardown has started
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.closed.cancelled()
    }

    /// Record inbound activity, restarting the idle timer
    pub fn touch(&self) {
        self.inner.activity.notify_one();
    }

    /// Try to queue a message without waiting
    pub fn try_enqueue(&self, message: &Outbound) -> Enqueue {
        let guard = lock_sender(&self.inner.sender);
        match guard.as_ref() {
            None => Enqueue::Closed,
            Some(tx) => match tx.try_send(message.clone()) {
                Ok(()) => Enqueue::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
            },
        }
    }

    /// Queue a message, waiting at most `grace` for room.
    /// Returns false if the deadline passed or the queue is closed.
    pub async fn enqueue_within(&self, message: Outbound, grace: Duration) -> bool {
        let sender = lock_sender(&self.inner.sender).clone();
        let Some(tx) = sender else {
            return false;
        };
        matches!(
            tokio::time::timeout(grace, tx.send(message)).await,
            Ok(Ok(()))
        )
    }

    /// Tear the client down. Safe to call from any task, any number of times;
    /// only the first call does the work and returns true.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.inner.close_reason.set(reason).is_err() {
            return false;
        }

        // Stops the idle watcher and tells the socket tasks to drop the connection
        self.inner.closed.cancel();

        // Close the outbound queue
        lock_sender(&self.inner.sender).take();

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.unregister(self.inner.id);
        }

        debug!(client_id = self.inner.id, ?reason, "Client torn down");
        true
    }

    /// Close the client when no inbound activity is seen for `timeout`
    pub fn spawn_idle_watcher(&self, timeout: Duration) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = client.closed() => break,
                    _ = client.inner.activity.notified() => continue,
                    _ = tokio::time::sleep(timeout) => {
                        info!(client_id = client.id(), "Idle timeout, closing WebSocket connection");
                        client.close(CloseReason::IdleTimeout);
                        break;
                    }
                }
            }
        })
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.inner.id)
            .field("close_reason", &self.close_reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::events::ServerMessage;

    fn note(n: u8) -> Outbound {
        Arc::new(ServerMessage::Note {
            note: n,
            velocity: 100,
        })
    }

    #[tokio::test]
    async fn test_try_enqueue_reports_full_then_closed() {
        let registry = Registry::new();
        let (client, mut rx) = registry.create_client(1);

        assert_eq!(client.try_enqueue(&note(60)), Enqueue::Sent);
        assert_eq!(client.try_enqueue(&note(61)), Enqueue::Full);

        assert_eq!(rx.recv().await.unwrap().kind(), "note");

        client.close(CloseReason::ClientClosed);
        assert_eq!(client.try_enqueue(&note(62)), Enqueue::Closed);
    }

    #[tokio::test]
    async fn test_close_ends_outbound_queue() {
        let registry = Registry::new();
        let (client, mut rx) = registry.create_client(4);

        assert!(client.close(CloseReason::Shutdown));
        assert!(rx.recv().await.is_none());
        assert_eq!(client.close_reason(), Some(CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn test_concurrent_close_runs_teardown_once() {
        let registry = Registry::new();
        let (client, _rx) = registry.create_client(4);
        registry.register(client.clone());
        assert_eq!(registry.len(), 1);

        let reasons = [
            CloseReason::IdleTimeout,
            CloseReason::ReadError,
            CloseReason::SlowConsumer,
        ];
        let mut tasks = Vec::new();
        for reason in reasons {
            let c = client.clone();
            tasks.push(tokio::spawn(async move { c.close(reason) }));
        }

        let mut performed = 0;
        for task in tasks {
            if task.await.unwrap() {
                performed += 1;
            }
        }

        assert_eq!(performed, 1, "teardown must run exactly once");
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.unregister_count(), 1);
        assert!(reasons.contains(&client.close_reason().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_client() {
        let registry = Registry::new();
        let (client, _rx) = registry.create_client(4);
        registry.register(client.clone());
        let watcher = client.spawn_idle_watcher(Duration::from_secs(300));

        tokio::time::sleep(Duration::from_secs(301)).await;
        watcher.await.unwrap();

        assert_eq!(client.close_reason(), Some(CloseReason::IdleTimeout));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_idle_timer() {
        let registry = Registry::new();
        let (client, _rx) = registry.create_client(4);
        let _watcher = client.spawn_idle_watcher(Duration::from_secs(10));

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(6)).await;
            client.touch();
        }
        assert!(!client.is_closed(), "activity must keep the client alive");

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(client.close_reason(), Some(CloseReason::IdleTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_within_times_out() {
        let registry = Registry::new();
        let (client, _rx) = registry.create_client(1);
        assert_eq!(client.try_enqueue(&note(60)), Enqueue::Sent);

        let delivered = client
            .enqueue_within(note(61), Duration::from_millis(50))
            .await;
        assert!(!delivered);
    }
}
