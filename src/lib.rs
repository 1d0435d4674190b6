//! MIDI Cue Hub
//!
//! Bridges a hardware MIDI controller with any number of WebSocket clients.
//!
//! This library provides:
//! - A hub that serializes note and scene events through one control task
//! - Swappable backpressure policies for slow clients
//! - Hardware note-on/note-off handling with duplicate suppression
//! - A hot-reloadable scene/cue sequence
//! - HTTP endpoints for stats, reload and the WebSocket upgrade

pub mod adapters;
pub mod api;
pub mod broadcaster;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod hub;
pub mod notes;
pub mod scenes;
