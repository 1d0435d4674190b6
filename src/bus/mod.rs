//! Dispatch queue feeding the hub control task.
//!
//! Uses a bounded tokio::sync::mpsc so every producer (hardware callback,
//! WebSocket readers, scene ticker) shares one totally ordered stream.

pub mod events;

use tokio::sync::mpsc;

/// Where a note came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOrigin {
    /// Played on the MIDI controller
    Hardware,
    /// Sent by a WebSocket client
    Client,
}

/// Events that change shared state; only the hub control task consumes them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubEvent {
    Note {
        note: u8,
        velocity: u8,
        origin: NoteOrigin,
    },
    /// Advance to the next scene (timer tick or client request)
    NextScene,
}

/// The hub control task has stopped and no longer accepts events
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("hub dispatch queue is closed")]
pub struct HubClosed;

/// Cloneable producer side of the dispatch queue
#[derive(Clone)]
pub struct DispatchSender {
    sender: mpsc::Sender<HubEvent>,
}

impl DispatchSender {
    /// Queue an event, waiting for room if the queue is full
    pub async fn submit(&self, event: HubEvent) -> Result<(), HubClosed> {
        self.sender.send(event).await.map_err(|_| HubClosed)
    }

    /// Queue an event without waiting. Used from the MIDI driver callback,
    /// which must never block on network work.
    pub fn try_submit(&self, event: HubEvent) -> Result<(), TrySubmitError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TrySubmitError::Full,
            mpsc::error::TrySendError::Closed(_) => TrySubmitError::Closed,
        })
    }

    /// Number of events that can be queued right now
    pub fn capacity(&self) -> usize {
        self.sender.capacity()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrySubmitError {
    #[error("hub dispatch queue is full")]
    Full,
    #[error("hub dispatch queue is closed")]
    Closed,
}

/// Consumer side, owned by the hub control task
pub type DispatchReceiver = mpsc::Receiver<HubEvent>;

/// Default dispatch queue capacity
pub const DEFAULT_CAPACITY: usize = 256;

/// Create a dispatch queue with the given capacity
pub fn create_bus(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (DispatchSender { sender }, receiver)
}
