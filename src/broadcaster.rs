//! Fan-out strategies
//!
//! A broadcaster delivers one message to a snapshot of the registered
//! clients. They differ only in what happens when a client's outbound queue
//! is full:
//!
//! | mode       | full queue                                          |
//! |------------|-----------------------------------------------------|
//! | `default`  | tear the client down                                |
//! | `buffered` | retry in the background for a grace period, then tear down |
//! | `batch`    | like `default`, one task per client, waits for all  |
//! | `lossy`    | drop the message for that client, keep it connected |

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::bus::events::Outbound;
use crate::hub::client::{ClientHandle, CloseReason, Enqueue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum BroadcasterMode {
    #[default]
    Default,
    Buffered,
    Batch,
    Lossy,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown broadcaster mode '{0}' (expected one of: default, buffered, batch, lossy)")]
pub struct ParseModeError(pub String);

impl BroadcasterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcasterMode::Default => "default",
            BroadcasterMode::Buffered => "buffered",
            BroadcasterMode::Batch => "batch",
            BroadcasterMode::Lossy => "lossy",
        }
    }

    /// Instantiate the strategy. `grace` only matters for `buffered`.
    pub fn build(self, grace: Duration) -> Arc<dyn Broadcaster> {
        match self {
            BroadcasterMode::Default => Arc::new(DefaultBroadcaster),
            BroadcasterMode::Buffered => Arc::new(BufferedBroadcaster { grace }),
            BroadcasterMode::Batch => Arc::new(BatchBroadcaster),
            BroadcasterMode::Lossy => Arc::new(LossyBroadcaster),
        }
    }
}

impl FromStr for BroadcasterMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(BroadcasterMode::Default),
            "buffered" => Ok(BroadcasterMode::Buffered),
            "batch" => Ok(BroadcasterMode::Batch),
            "lossy" => Ok(BroadcasterMode::Lossy),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

impl TryFrom<String> for BroadcasterMode {
    type Error = ParseModeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for BroadcasterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    fn mode(&self) -> BroadcasterMode;

    /// Deliver `message` to every client in `clients`.
    /// Must not block on a single slow client.
    async fn broadcast(&self, clients: &[ClientHandle], message: Outbound);
}

fn drop_slow_client(client: &ClientHandle, outcome: Enqueue) {
    if outcome == Enqueue::Full {
        warn!(client_id = client.id(), "Outbound queue full, dropping client");
    }
    client.close(CloseReason::SlowConsumer);
}

pub struct DefaultBroadcaster;

#[async_trait]
impl Broadcaster for DefaultBroadcaster {
    fn mode(&self) -> BroadcasterMode {
        BroadcasterMode::Default
    }

    async fn broadcast(&self, clients: &[ClientHandle], message: Outbound) {
        for client in clients {
            match client.try_enqueue(&message) {
                Enqueue::Sent => {}
                outcome => drop_slow_client(client, outcome),
            }
        }
    }
}

/// Gives a full queue `grace` to drain before giving up on the client.
/// Retries run detached, so a retried message may arrive after later ones.
pub struct BufferedBroadcaster {
    grace: Duration,
}

impl BufferedBroadcaster {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

#[async_trait]
impl Broadcaster for BufferedBroadcaster {
    fn mode(&self) -> BroadcasterMode {
        BroadcasterMode::Buffered
    }

    async fn broadcast(&self, clients: &[ClientHandle], message: Outbound) {
        for client in clients {
            match client.try_enqueue(&message) {
                Enqueue::Sent => {}
                Enqueue::Closed => drop_slow_client(client, Enqueue::Closed),
                Enqueue::Full => {
                    let client = client.clone();
                    let message = message.clone();
                    let grace = self.grace;
                    tokio::spawn(async move {
                        if !client.enqueue_within(message, grace).await {
                            warn!(
                                client_id = client.id(),
                                grace_ms = grace.as_millis() as u64,
                                "Client did not drain within grace period, dropping"
                            );
                            client.close(CloseReason::SlowConsumer);
                        }
                    });
                }
            }
        }
    }
}

pub struct BatchBroadcaster;

#[async_trait]
impl Broadcaster for BatchBroadcaster {
    fn mode(&self) -> BroadcasterMode {
        BroadcasterMode::Batch
    }

    async fn broadcast(&self, clients: &[ClientHandle], message: Outbound) {
        let mut deliveries = JoinSet::new();
        for client in clients {
            let client = client.clone();
            let message = message.clone();
            deliveries.spawn(async move {
                match client.try_enqueue(&message) {
                    Enqueue::Sent => {}
                    outcome => drop_slow_client(&client, outcome),
                }
            });
        }

        while let Some(result) = deliveries.join_next().await {
            if let Err(e) = result {
                warn!("Batch delivery task failed: {}", e);
            }
        }
    }
}

pub struct LossyBroadcaster;

#[async_trait]
impl Broadcaster for LossyBroadcaster {
    fn mode(&self) -> BroadcasterMode {
        BroadcasterMode::Lossy
    }

    async fn broadcast(&self, clients: &[ClientHandle], message: Outbound) {
        for client in clients {
            if client.try_enqueue(&message) != Enqueue::Sent {
                debug!(client_id = client.id(), kind = message.kind(), "Skipped slow client");
            }
        }
    }
}
