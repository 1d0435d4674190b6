//! MIDI hardware bridge
//!
//! Output: note-on/note-off on one configured channel plus an "all notes
//! off" flush. Input: note-on messages from a controller, forwarded to the
//! hub as hardware-origin notes.
//!
//! The midir input connection lives on its own OS thread for its whole
//! life; its callback only decodes bytes and hands them over with a
//! non-blocking send, so the driver thread never waits on the network side.

use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::{MidiError, NoteOutput};
use crate::bus::{DispatchSender, HubEvent, NoteOrigin, TrySubmitError};
use crate::config::MidiConfig;

/// Client name registered with the MIDI driver
pub const CLIENT_NAME: &str = "midi-cue-hub";

/// Control change number for "All Notes Off"
pub const ALL_NOTES_OFF: u8 = 123;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const CHANNELS: u8 = 16;

/// Capacity of the queue between the driver callback and the listener task
#[cfg(feature = "midi")]
const INPUT_QUEUE_CAPACITY: usize = 256;

// =============================================================================
// Output
// =============================================================================

/// Byte-level sink for MIDI messages
pub trait RawMidiPort: Send {
    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), MidiError>;
}

#[cfg(feature = "midi")]
impl RawMidiPort for midir::MidiOutputConnection {
    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), MidiError> {
        self.send(bytes).map_err(|e| MidiError::Send(e.to_string()))
    }
}

struct OutputState {
    port: Option<Box<dyn RawMidiPort>>,
    /// Pitches turned on and not yet turned off or flushed
    running: [bool; 128],
}

pub struct HardwareOutput {
    name: String,
    channel: u8,
    state: Mutex<OutputState>,
}

impl HardwareOutput {
    pub fn new(name: impl Into<String>, channel: u8, port: Box<dyn RawMidiPort>) -> Self {
        Self {
            name: name.into(),
            channel: channel & 0x0F,
            state: Mutex::new(OutputState {
                port: Some(port),
                running: [false; 128],
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, OutputState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }
}

impl NoteOutput for HardwareOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.state().port.is_some()
    }

    fn note_on(&self, note: u8, velocity: u8) -> Result<(), MidiError> {
        let mut state = self.state();
        let port = state.port.as_mut().ok_or(MidiError::NotInitialized)?;
        port.send_raw(&[NOTE_ON | self.channel, note & 0x7F, velocity & 0x7F])?;
        if let Some(slot) = state.running.get_mut(note as usize) {
            *slot = true;
        }
        Ok(())
    }

    fn note_off(&self, note: u8) -> Result<(), MidiError> {
        let mut state = self.state();
        let OutputState { port, running } = &mut *state;
        let port = port.as_mut().ok_or(MidiError::NotInitialized)?;
        match running.get_mut(note as usize) {
            Some(slot) if *slot => {
                port.send_raw(&[NOTE_OFF | self.channel, note, 0])?;
                *slot = false;
                Ok(())
            }
            _ => Err(MidiError::NoteNotRunning(note)),
        }
    }

    fn flush_all_notes(&self) {
        let mut state = self.state();
        let OutputState { port, running } = &mut *state;
        let Some(port) = port.as_mut() else {
            debug!("MIDI output closed, nothing to flush");
            return;
        };
        for channel in 0..CHANNELS {
            if let Err(e) = port.send_raw(&[CONTROL_CHANGE | channel, ALL_NOTES_OFF, 0]) {
                warn!(channel, "Failed to send All Notes Off: {}", e);
            }
        }
        *running = [false; 128];
        info!(port = %self.name, "Flushed all MIDI notes");
    }

    fn close(&self) {
        if self.state().port.take().is_some() {
            info!(port = %self.name, "MIDI output closed");
        }
    }
}

// =============================================================================
// Input
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteOnEvent {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
}

/// Decode a note-on. A note-on with velocity 0 is a note-off and is skipped,
/// as is every other message type.
pub fn decode_note_on(bytes: &[u8]) -> Option<NoteOnEvent> {
    match bytes {
        [status, note, velocity, ..]
            if status & 0xF0 == NOTE_ON && *velocity > 0 && *note <= 0x7F && *velocity <= 0x7F =>
        {
            Some(NoteOnEvent {
                channel: status & 0x0F,
                note: *note,
                velocity: *velocity,
            })
        }
        _ => None,
    }
}

/// Receiving side of a MIDI input port
pub struct NoteInput {
    port_name: String,
    events: mpsc::Receiver<NoteOnEvent>,
    stop: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl NoteInput {
    /// Input fed from an arbitrary channel instead of a driver thread
    pub fn from_channel(port_name: impl Into<String>, events: mpsc::Receiver<NoteOnEvent>) -> Self {
        Self {
            port_name: port_name.into(),
            events,
            stop: None,
            thread: None,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Forward note-ons to the hub until cancelled or the port goes away
    pub async fn listen(mut self, dispatch: DispatchSender, shutdown: CancellationToken) {
        info!(port = %self.port_name, "Listening for MIDI input");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.events.recv() => {
                    let Some(event) = event else {
                        warn!(port = %self.port_name, "MIDI input closed");
                        break;
                    };
                    debug!(
                        channel = event.channel,
                        pitch = event.note,
                        velocity = event.velocity,
                        "MIDI note on"
                    );
                    let note = HubEvent::Note {
                        note: event.note,
                        velocity: event.velocity,
                        origin: NoteOrigin::Hardware,
                    };
                    match dispatch.try_submit(note) {
                        Ok(()) => {}
                        Err(TrySubmitError::Full) => {
                            warn!(pitch = event.note, "Dispatch queue full, dropping MIDI note");
                        }
                        Err(TrySubmitError::Closed) => break,
                    }
                }
            }
        }

        debug!(port = %self.port_name, "MIDI listener stopped");
    }
}

impl Drop for NoteInput {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            if stop.send(()).is_err() {
                debug!("MIDI input thread already gone");
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("MIDI input thread panicked");
            }
        }
    }
}

// =============================================================================
// Setup
// =============================================================================

/// Opened hardware: the output shared with the hub, the input for the listener
pub struct MidiBridge {
    pub output: std::sync::Arc<HardwareOutput>,
    pub input: NoteInput,
}

impl MidiBridge {
    pub fn into_parts(self) -> (std::sync::Arc<HardwareOutput>, NoteInput) {
        (self.output, self.input)
    }
}

/// Open the configured output port and an input port
#[cfg(feature = "midi")]
pub fn setup(config: &MidiConfig) -> Result<MidiBridge, MidiError> {
    let output = open_output(&config.output_port, config.channel)?;
    let input = open_input(config.input_port.as_deref())?;
    info!(
        output = %config.output_port,
        input = %input.port_name,
        channel = config.channel,
        "MIDI hardware ready"
    );
    Ok(MidiBridge {
        output: std::sync::Arc::new(output),
        input,
    })
}

#[cfg(not(feature = "midi"))]
pub fn setup(_config: &MidiConfig) -> Result<MidiBridge, MidiError> {
    Err(MidiError::Unsupported)
}

#[cfg(feature = "midi")]
fn open_output(port_name: &str, channel: u8) -> Result<HardwareOutput, MidiError> {
    use midir::MidiOutput;

    let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;
    let port = midi_out
        .ports()
        .into_iter()
        .find(|p| midi_out.port_name(p).map(|n| n == port_name).unwrap_or(false))
        .ok_or_else(|| MidiError::OutputNotFound(port_name.to_string()))?;

    let connection = midi_out
        .connect(&port, "midi-cue-hub-out")
        .map_err(|e| MidiError::Connect {
            port: port_name.to_string(),
            reason: e.to_string(),
        })?;

    Ok(HardwareOutput::new(port_name, channel, Box::new(connection)))
}

#[cfg(feature = "midi")]
fn open_input(wanted: Option<&str>) -> Result<NoteInput, MidiError> {
    use std::sync::mpsc::channel;

    let (event_tx, event_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
    let (ready_tx, ready_rx) = channel::<Result<String, MidiError>>();
    let (stop_tx, stop_rx) = channel::<()>();
    let wanted = wanted.map(str::to_string);

    let thread = std::thread::Builder::new()
        .name("midi-input".to_string())
        .spawn(move || {
            let connection = match connect_input(wanted.as_deref(), event_tx) {
                Ok((connection, name)) => {
                    if ready_tx.send(Ok(name)).is_err() {
                        return;
                    }
                    connection
                }
                Err(e) => {
                    if ready_tx.send(Err(e)).is_err() {
                        debug!("MIDI setup abandoned before input was ready");
                    }
                    return;
                }
            };
            // Hold the connection until asked to stop or the owner is dropped
            if stop_rx.recv().is_err() {
                debug!("MIDI input owner dropped");
            }
            drop(connection);
        })
        .map_err(|e| MidiError::Init(e.to_string()))?;

    let port_name = ready_rx
        .recv()
        .map_err(|_| MidiError::Init("MIDI input thread exited during setup".to_string()))??;

    Ok(NoteInput {
        port_name,
        events: event_rx,
        stop: Some(stop_tx),
        thread: Some(thread),
    })
}

#[cfg(feature = "midi")]
fn connect_input(
    wanted: Option<&str>,
    events: mpsc::Sender<NoteOnEvent>,
) -> Result<(midir::MidiInputConnection<()>, String), MidiError> {
    use midir::{Ignore, MidiInput};

    let mut midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;
    midi_in.ignore(Ignore::All);

    let ports = midi_in.ports();
    let (port, name) = match wanted {
        Some(wanted) => ports
            .iter()
            .find_map(|p| {
                midi_in
                    .port_name(p)
                    .ok()
                    .filter(|n| n == wanted)
                    .map(|n| (p.clone(), n))
            })
            .ok_or_else(|| MidiError::InputNotFound(wanted.to_string()))?,
        None => {
            let port = ports.first().ok_or(MidiError::NoInputDevices)?;
            let name = midi_in
                .port_name(port)
                .map_err(|e| MidiError::Init(e.to_string()))?;
            (port.clone(), name)
        }
    };

    let connection = midi_in
        .connect(
            &port,
            "midi-cue-hub-in",
            move |_stamp, bytes, _| {
                if let Some(event) = decode_note_on(bytes) {
                    if events.try_send(event).is_err() {
                        warn!(pitch = event.note, "MIDI input queue full, dropping note");
                    }
                }
            },
            (),
        )
        .map_err(|e| MidiError::Connect {
            port: name.clone(),
            reason: e.to_string(),
        })?;

    Ok((connection, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CapturePort {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RawMidiPort for CapturePort {
        fn send_raw(&mut self, bytes: &[u8]) -> Result<(), MidiError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn output_on_channel(channel: u8) -> (HardwareOutput, CapturePort) {
        let port = CapturePort::default();
        let output = HardwareOutput::new("test", channel, Box::new(port.clone()));
        (output, port)
    }

    #[test]
    fn test_note_on_and_off_bytes() {
        let (output, port) = output_on_channel(2);
        output.note_on(60, 100).unwrap();
        output.note_off(60).unwrap();

        assert_eq!(
            *port.sent.lock().unwrap(),
            vec![vec![0x92, 60, 100], vec![0x82, 60, 0]]
        );
    }

    #[test]
    fn test_note_off_without_note_on() {
        let (output, port) = output_on_channel(0);
        assert_eq!(output.note_off(61), Err(MidiError::NoteNotRunning(61)));
        assert!(port.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_flush_sends_all_notes_off_on_every_channel() {
        let (output, port) = output_on_channel(0);
        output.note_on(60, 100).unwrap();
        output.flush_all_notes();

        let sent = port.sent.lock().unwrap().clone();
        let flush: Vec<_> = sent.iter().skip(1).collect();
        assert_eq!(flush.len(), 16);
        for (channel, bytes) in flush.iter().enumerate() {
            assert_eq!(**bytes, vec![0xB0 | channel as u8, ALL_NOTES_OFF, 0]);
        }

        // The flush already released the pitch
        assert_eq!(output.note_off(60), Err(MidiError::NoteNotRunning(60)));
    }

    #[test]
    fn test_closed_output_reports_not_initialized() {
        let (output, _port) = output_on_channel(0);
        assert!(output.is_connected());
        output.close();
        assert!(!output.is_connected());
        assert_eq!(output.note_on(60, 1), Err(MidiError::NotInitialized));
        assert_eq!(output.note_off(60), Err(MidiError::NotInitialized));
        output.flush_all_notes();
    }

    #[test]
    fn test_decode_note_on() {
        assert_eq!(
            decode_note_on(&[0x93, 64, 90]),
            Some(NoteOnEvent {
                channel: 3,
                note: 64,
                velocity: 90
            })
        );
        // Velocity zero is a note-off
        assert_eq!(decode_note_on(&[0x90, 64, 0]), None);
        assert_eq!(decode_note_on(&[0x80, 64, 40]), None);
        assert_eq!(decode_note_on(&[0xB0, 123, 0]), None);
        assert_eq!(decode_note_on(&[0x90, 64]), None);
        assert_eq!(decode_note_on(&[]), None);
    }

    #[tokio::test]
    async fn test_listen_forwards_hardware_notes() {
        let (tx, rx) = mpsc::channel(8);
        let (dispatch, mut events) = create_bus(8);
        let shutdown = CancellationToken::new();
        let input = NoteInput::from_channel("fake", rx);
        let task = tokio::spawn(input.listen(dispatch, shutdown.clone()));

        tx.send(NoteOnEvent {
            channel: 0,
            note: 72,
            velocity: 64,
        })
        .await
        .unwrap();

        assert_eq!(
            events.recv().await,
            Some(HubEvent::Note {
                note: 72,
                velocity: 64,
                origin: NoteOrigin::Hardware
            })
        );

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_ends_when_input_closes() {
        let (tx, rx) = mpsc::channel(8);
        let (dispatch, _events) = create_bus(8);
        let input = NoteInput::from_channel("fake", rx);
        drop(tx);

        input.listen(dispatch, CancellationToken::new()).await;
    }

    #[test]
    fn test_setup_without_driver_support() {
        if cfg!(feature = "midi") {
            return;
        }
        assert_eq!(
            setup(&MidiConfig::default()).err(),
            Some(MidiError::Unsupported)
        );
    }
}
