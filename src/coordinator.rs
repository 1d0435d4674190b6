//! Coordinator - lifecycle of the long-running tasks
//!
//! Owns the process-wide shutdown token and the join handles of the hub
//! control task, the scene ticker and the MIDI listener. Shutdown cancels the
//! token, waits for each task with a timeout (hub first, so clients are closed
//! before anything else), then silences and releases the hardware.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::midi::NoteInput;
use crate::adapters::SharedOutput;
use crate::bus::{DispatchSender, HubEvent};
use crate::hub::Hub;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Coordinator {
    shutdown: CancellationToken,
    output: SharedOutput,
    /// Joined in insertion order
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_timeout: Duration,
}

impl Coordinator {
    pub fn new(shutdown: CancellationToken, output: SharedOutput) -> Self {
        Self::with_shutdown_timeout(shutdown, output, DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Create with custom shutdown timeout
    pub fn with_shutdown_timeout(
        shutdown: CancellationToken,
        output: SharedOutput,
        timeout: Duration,
    ) -> Self {
        Self {
            shutdown,
            output,
            tasks: Vec::new(),
            shutdown_timeout: timeout,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn spawn_hub(&mut self, hub: Hub) {
        self.tasks.push(("hub", tokio::spawn(hub.run())));
    }

    pub fn spawn_scene_ticker(&mut self, dispatch: DispatchSender, interval: Duration) {
        let cancel = self.shutdown.clone();
        let handle = tokio::spawn(run_scene_ticker(dispatch, interval, cancel));
        self.tasks.push(("scene-ticker", handle));
    }

    pub fn spawn_midi_listener(&mut self, input: NoteInput, dispatch: DispatchSender) {
        let cancel = self.shutdown.clone();
        self.tasks
            .push(("midi-listener", tokio::spawn(input.listen(dispatch, cancel))));
    }

    /// Names of tasks that have not finished yet
    pub fn running(&self) -> Vec<&'static str> {
        self.tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Cancel everything, wait for the tasks, then flush and close the output
    pub async fn shutdown(mut self) {
        info!("Coordinator initiating shutdown");
        self.shutdown.cancel();

        for (name, handle) in self.tasks.drain(..) {
            match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(())) => debug!("Task {} stopped cleanly", name),
                Ok(Err(e)) => error!("Task {} panicked: {}", name, e),
                Err(_) => warn!("Task {} did not stop within timeout, abandoning", name),
            }
        }

        self.output.flush_all_notes();
        self.output.close();
        info!("Coordinator shutdown complete");
    }
}

/// Request a scene advance every `interval` until cancelled.
/// The first advance happens one interval after start.
pub async fn run_scene_ticker(
    dispatch: DispatchSender,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if dispatch.submit(HubEvent::NextScene).await.is_err() {
                    debug!("Hub gone, stopping scene ticker");
                    break;
                }
            }
        }
    }
}
