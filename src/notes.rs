//! Active-note table
//!
//! Tracks which pitches are currently sounding so that a second note-on for
//! a held pitch is dropped instead of retriggering the hardware.
//! One short-held lock; callers copy results out and never hold it across
//! hardware I/O or a broadcast.

use std::sync::{Arc, Mutex, MutexGuard};

const PITCHES: usize = 128;

#[derive(Clone)]
pub struct ActiveNotes {
    table: Arc<Mutex<[bool; PITCHES]>>,
}

impl Default for ActiveNotes {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new([false; PITCHES])),
        }
    }
}

impl ActiveNotes {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, [bool; PITCHES]> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `pitch` as sounding. Returns false if it already was
    /// (or is not a valid MIDI pitch).
    pub fn try_activate(&self, pitch: u8) -> bool {
        let mut table = self.table();
        match table.get_mut(pitch as usize) {
            Some(slot) if !*slot => {
                *slot = true;
                true
            }
            _ => false,
        }
    }

    pub fn release(&self, pitch: u8) {
        if let Some(slot) = self.table().get_mut(pitch as usize) {
            *slot = false;
        }
    }

    pub fn is_sounding(&self, pitch: u8) -> bool {
        self.table().get(pitch as usize).copied().unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.table().iter().filter(|s| **s).count()
    }

    /// Pitches currently sounding, ascending
    pub fn sounding(&self) -> Vec<u8> {
        self.table()
            .iter()
            .enumerate()
            .filter(|(_, s)| **s)
            .map(|(pitch, _)| pitch as u8)
            .collect()
    }

    /// Release everything; returns how many pitches were sounding
    pub fn clear(&self) -> usize {
        let mut table = self.table();
        let count = table.iter().filter(|s| **s).count();
        *table = [false; PITCHES];
        count
    }
}
