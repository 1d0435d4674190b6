use std::sync::Arc;

// =============================================================================
// NoteOutput - hardware-facing side of the hub
// =============================================================================

/// Errors raised by the MIDI hardware bridge
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MidiError {
    #[error("MIDI output not initialized")]
    NotInitialized,
    #[error("MIDI output port '{0}' not found")]
    OutputNotFound(String),
    #[error("MIDI input port '{0}' not found")]
    InputNotFound(String),
    #[error("no MIDI input devices found")]
    NoInputDevices,
    #[error("MIDI driver init failed: {0}")]
    Init(String),
    #[error("failed to open MIDI port '{port}': {reason}")]
    Connect { port: String, reason: String },
    #[error("MIDI send failed: {0}")]
    Send(String),
    #[error("note {0} is not running")]
    NoteNotRunning(u8),
    #[error("built without MIDI support (enable the `midi` feature)")]
    Unsupported,
}

/// Anything the hub can play notes on.
///
/// Calls are short and synchronous; the hub never holds its own locks
/// while calling into an output.
pub trait NoteOutput: Send + Sync {
    /// Human-readable port name for logs and stats
    fn name(&self) -> &str;

    /// Whether notes actually reach a device
    fn is_connected(&self) -> bool {
        true
    }

    fn note_on(&self, note: u8, velocity: u8) -> Result<(), MidiError>;

    /// Fails with `NoteNotRunning` when the pitch was already released,
    /// e.g. by an earlier flush.
    fn note_off(&self, note: u8) -> Result<(), MidiError>;

    /// "All notes off" on every channel
    fn flush_all_notes(&self);

    /// Release the underlying port. Later calls fail with `NotInitialized`.
    fn close(&self) {}
}

pub type SharedOutput = Arc<dyn NoteOutput>;

/// Output used in network-only mode: accepts everything, plays nothing.
#[derive(Debug, Default)]
pub struct SilentOutput;

impl NoteOutput for SilentOutput {
    fn name(&self) -> &str {
        "none"
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn note_on(&self, _note: u8, _velocity: u8) -> Result<(), MidiError> {
        Ok(())
    }

    fn note_off(&self, _note: u8) -> Result<(), MidiError> {
        Ok(())
    }

    fn flush_all_notes(&self) {}
}
