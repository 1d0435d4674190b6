//! Period counters and the `/stats` snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Notes and connections seen since the last scene broadcast.
/// Lock-free so `/stats` never waits on the dispatch loop.
pub struct PeriodCounters {
    notes: AtomicU64,
    connections: AtomicU64,
    started_at_ms: AtomicI64,
}

impl Default for PeriodCounters {
    fn default() -> Self {
        Self {
            notes: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            started_at_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }
}

impl PeriodCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_note(&self) {
        self.notes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notes(&self) -> u64 {
        self.notes.load(Ordering::Relaxed)
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Start a new period
    pub fn reset(&self) {
        self.notes.store(0, Ordering::Relaxed);
        self.connections.store(0, Ordering::Relaxed);
        self.started_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn period_started_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.started_at_ms.load(Ordering::Relaxed))
            .unwrap_or_else(Utc::now)
    }
}

/// Body of `GET /stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub connected_clients: usize,
    pub active_notes: usize,
    /// Cue text of the current scene, empty when no scenes are loaded
    pub cue: String,
    pub notes_per_period: u64,
    pub connections_per_period: u64,
    pub broadcaster: String,
    pub scene_index: Option<usize>,
    pub scene_count: usize,
    pub hardware_connected: bool,
    pub period_started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_reset() {
        let counters = PeriodCounters::new();
        counters.record_note();
        counters.record_note();
        counters.record_connection();
        assert_eq!(counters.notes(), 2);
        assert_eq!(counters.connections(), 1);

        let before = counters.period_started_at();
        counters.reset();
        assert_eq!(counters.notes(), 0);
        assert_eq!(counters.connections(), 0);
        assert!(counters.period_started_at() >= before);
    }

    #[test]
    fn test_snapshot_field_names() {
        let snapshot = StatsSnapshot {
            connected_clients: 2,
            active_notes: 1,
            cue: "Opening".to_string(),
            notes_per_period: 7,
            connections_per_period: 3,
            broadcaster: "lossy".to_string(),
            scene_index: Some(0),
            scene_count: 5,
            hardware_connected: false,
            period_started_at: Utc::now(),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        for key in [
            "connected_clients",
            "active_notes",
            "cue",
            "notes_per_period",
            "connections_per_period",
            "broadcaster",
            "scene_index",
            "scene_count",
            "hardware_connected",
            "period_started_at",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(value["notes_per_period"], 7);
    }
}
