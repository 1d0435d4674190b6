//! Broadcast hub
//!
//! `Hub` is the single control task. It owns the dispatch receiver and the
//! pending note-off queue, and is the only place that advances the scene
//! cursor, flips active-note flags or starts a broadcast. Everything else
//! talks to it through a cloneable [`HubHandle`].

pub mod client;
pub mod registry;
pub mod stats;

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use crate::adapters::{MidiError, SharedOutput};
use crate::broadcaster::Broadcaster;
use crate::bus::events::{Outbound, ServerMessage};
use crate::bus::{create_bus, DispatchReceiver, DispatchSender, HubClosed, HubEvent, NoteOrigin};
use crate::config::Config;
use crate::notes::ActiveNotes;
use crate::scenes::{SceneEngine, SceneError};

use client::{ClientHandle, CloseReason};
use registry::Registry;
pub use stats::{PeriodCounters, StatsSnapshot};

/// Runtime knobs the hub needs from `Config`
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub note_hold: Duration,
    pub idle_timeout: Duration,
    pub client_queue_capacity: usize,
    pub dispatch_queue_capacity: usize,
    /// Write hardware-originated notes back to the output
    pub thru: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig::from(&Config::default())
    }
}

impl From<&Config> for HubConfig {
    fn from(config: &Config) -> Self {
        Self {
            note_hold: config.note_hold(),
            idle_timeout: config.idle_timeout(),
            client_queue_capacity: config.client_queue_capacity,
            dispatch_queue_capacity: config.dispatch_queue_capacity,
            thru: config.midi.thru,
        }
    }
}

/// State reachable from any task
struct Shared {
    config: HubConfig,
    registry: Arc<Registry>,
    notes: ActiveNotes,
    scenes: Arc<SceneEngine>,
    broadcaster: Arc<dyn Broadcaster>,
    output: SharedOutput,
    counters: PeriodCounters,
    dispatch: DispatchSender,
    shutdown: CancellationToken,
}

/// A note waiting for its deferred release
#[derive(Debug, Clone, Copy)]
struct PendingRelease {
    note: u8,
    /// Whether a note-on was written to the output for this note
    to_hardware: bool,
}

pub struct Hub {
    shared: Arc<Shared>,
    events: DispatchReceiver,
    note_offs: DelayQueue<PendingRelease>,
}

impl Hub {
    pub fn new(
        config: HubConfig,
        scenes: Arc<SceneEngine>,
        broadcaster: Arc<dyn Broadcaster>,
        output: SharedOutput,
        shutdown: CancellationToken,
    ) -> Self {
        let (dispatch, events) = create_bus(config.dispatch_queue_capacity);
        let shared = Arc::new(Shared {
            config,
            registry: Registry::new(),
            notes: ActiveNotes::new(),
            scenes,
            broadcaster,
            output,
            counters: PeriodCounters::new(),
            dispatch,
            shutdown,
        });
        Self {
            shared,
            events,
            note_offs: DelayQueue::new(),
        }
    }

    pub fn handle(&self) -> HubHandle {
        HubHandle {
            shared: self.shared.clone(),
        }
    }

    /// Run the control loop until the shutdown token fires or every
    /// producer is gone. Returns after all clients have been closed.
    pub async fn run(mut self) {
        let shutdown = self.shared.shutdown.clone();
        info!(
            broadcaster = %self.shared.broadcaster.mode(),
            hold_ms = self.shared.config.note_hold.as_millis() as u64,
            "Hub started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(expired) = self.note_offs.next(), if !self.note_offs.is_empty() => {
                    self.release(expired.into_inner());
                }

                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
            }
        }

        self.shutdown();
    }

    async fn dispatch(&mut self, event: HubEvent) {
        match event {
            HubEvent::Note {
                note,
                velocity,
                origin,
            } => self.play_note(note, velocity, origin).await,
            HubEvent::NextScene => self.next_scene().await,
        }
    }

    async fn play_note(&mut self, note: u8, velocity: u8, origin: NoteOrigin) {
        let shared = self.shared.clone();
        shared.counters.record_note();

        if !shared.notes.try_activate(note) {
            debug!(pitch = note, ?origin, "Note already sounding, dropped");
            return;
        }
        debug!(pitch = note, velocity, ?origin, "Note on");

        let to_hardware = origin == NoteOrigin::Client || shared.config.thru;
        if to_hardware {
            if let Err(e) = shared.output.note_on(note, velocity) {
                warn!(pitch = note, "MIDI note-on failed: {}", e);
            }
        }
        self.note_offs
            .insert(PendingRelease { note, to_hardware }, shared.config.note_hold);

        self.broadcast(Arc::new(ServerMessage::Note { note, velocity }))
            .await;
    }

    fn release(&mut self, pending: PendingRelease) {
        if pending.to_hardware {
            match self.shared.output.note_off(pending.note) {
                Ok(()) => {}
                Err(MidiError::NoteNotRunning(_)) => {
                    debug!(pitch = pending.note, "Note already released by flush");
                }
                Err(e) => warn!(pitch = pending.note, "MIDI note-off failed: {}", e),
            }
        }
        self.shared.notes.release(pending.note);
    }

    async fn next_scene(&mut self) {
        let shared = self.shared.clone();
        let Some((index, scene)) = shared.scenes.advance() else {
            warn!("No scenes loaded, skipping scene broadcast");
            return;
        };
        info!(index, cue = %scene.cue, "Broadcasting scene");

        self.broadcast(scene.cue_message()).await;
        shared.counters.reset();
    }

    async fn broadcast(&self, message: Outbound) {
        let clients = self.shared.registry.snapshot();
        if clients.is_empty() {
            return;
        }
        self.shared.broadcaster.broadcast(&clients, message).await;
    }

    fn shutdown(&mut self) {
        self.events.close();
        let pending = self.note_offs.len();
        self.note_offs.clear();
        let sounding = self.shared.notes.clear();
        let closed = self.shared.registry.close_all(CloseReason::Shutdown);
        info!(
            clients = closed,
            pending_note_offs = pending,
            sounding,
            "Hub stopped"
        );
    }
}

/// Cloneable access to the hub for connection handlers, HTTP routes and
/// background tasks
#[derive(Clone)]
pub struct HubHandle {
    shared: Arc<Shared>,
}

impl HubHandle {
    /// Create and register a client for a freshly upgraded connection.
    /// The client starts closed if the hub is shutting down.
    pub fn connect(&self) -> (ClientHandle, mpsc::Receiver<Outbound>) {
        let shared = &self.shared;
        let (client, outbound) = shared
            .registry
            .create_client(shared.config.client_queue_capacity);
        client.spawn_idle_watcher(shared.config.idle_timeout);

        if shared.shutdown.is_cancelled() || !shared.registry.register(client.clone()) {
            client.close(CloseReason::Shutdown);
            return (client, outbound);
        }
        // Shutdown may have swept the registry between the check and the insert
        if shared.shutdown.is_cancelled() {
            client.close(CloseReason::Shutdown);
            return (client, outbound);
        }

        shared.counters.record_connection();
        info!(
            client_id = client.id(),
            clients = shared.registry.len(),
            "WebSocket client connected"
        );
        (client, outbound)
    }

    pub async fn submit(&self, event: HubEvent) -> Result<(), HubClosed> {
        self.shared.dispatch.submit(event).await
    }

    pub fn dispatcher(&self) -> DispatchSender {
        self.shared.dispatch.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let shared = &self.shared;
        StatsSnapshot {
            connected_clients: shared.registry.len(),
            active_notes: shared.notes.count(),
            cue: shared
                .scenes
                .current()
                .map(|scene| scene.cue)
                .unwrap_or_default(),
            notes_per_period: shared.counters.notes(),
            connections_per_period: shared.counters.connections(),
            broadcaster: shared.broadcaster.mode().to_string(),
            scene_index: shared.scenes.current_index(),
            scene_count: shared.scenes.len(),
            hardware_connected: shared.output.is_connected(),
            period_started_at: shared.counters.period_started_at(),
        }
    }

    /// Re-read the scene source; the live sequence is kept on failure
    pub fn reload_scenes(&self) -> Result<usize, SceneError> {
        self.shared.scenes.reload()
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn is_sounding(&self, note: u8) -> bool {
        self.shared.notes.is_sounding(note)
    }

    pub fn scenes(&self) -> &Arc<SceneEngine> {
        &self.shared.scenes
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shared.shutdown
    }
}
