//! Scene engine
//!
//! An ordered list of scenes loaded from a JSON file. A monotonically
//! increasing cursor picks the scene to broadcast (`cursor % len`), so the
//! sequence wraps forever. Reload swaps the whole list atomically and leaves
//! the cursor alone.

use arc_swap::ArcSwap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::bus::events::{Labels, Outbound, ServerMessage, MAX_DATA_BYTE};

pub const DEFAULT_NORMAL_COLOR: &str = "#2b2b2b";
pub const DEFAULT_PRESS_COLOR: &str = "#ffb000";

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("failed to read scene file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed scene file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("scene {scene}: label pitch {pitch} is outside 0-127")]
    InvalidPitch { scene: usize, pitch: u32 },
}

/// One display context: cue text, per-pitch labels and two colours
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub cue: String,
    pub labels: Labels,
    pub normal_color: String,
    pub press_color: String,
}

impl Scene {
    pub fn new(cue: impl Into<String>) -> Self {
        Self {
            cue: cue.into(),
            labels: Labels::new(),
            normal_color: DEFAULT_NORMAL_COLOR.to_string(),
            press_color: DEFAULT_PRESS_COLOR.to_string(),
        }
    }

    pub fn with_label(mut self, pitch: u8, label: impl Into<String>) -> Self {
        self.labels.insert(pitch, label.into());
        self
    }

    pub fn cue_message(&self) -> Outbound {
        Arc::new(ServerMessage::Cue {
            text: self.cue.clone(),
            labels: self.labels.clone(),
            normal_color: self.normal_color.clone(),
            press_color: self.press_color.clone(),
        })
    }
}

/// On-disk shape. Label keys are parsed wide so an out-of-range pitch is
/// reported as such rather than as a generic JSON error.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneFileEntry {
    #[serde(alias = "text")]
    cue: String,
    #[serde(default)]
    labels: BTreeMap<u32, String>,
    #[serde(default = "default_normal_color")]
    normal_color: String,
    #[serde(default = "default_press_color")]
    press_color: String,
}

fn default_normal_color() -> String {
    DEFAULT_NORMAL_COLOR.to_string()
}

fn default_press_color() -> String {
    DEFAULT_PRESS_COLOR.to_string()
}

/// Parse a JSON scene list
pub fn parse_scenes(json: &str) -> Result<Vec<Scene>, SceneError> {
    let entries: Vec<SceneFileEntry> = serde_json::from_str(json)?;

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let mut labels = Labels::new();
            for (pitch, label) in entry.labels {
                let key = u8::try_from(pitch)
                    .ok()
                    .filter(|p| *p <= MAX_DATA_BYTE)
                    .ok_or(SceneError::InvalidPitch {
                        scene: index,
                        pitch,
                    })?;
                labels.insert(key, label);
            }
            Ok(Scene {
                cue: entry.cue,
                labels,
                normal_color: entry.normal_color,
                press_color: entry.press_color,
            })
        })
        .collect()
}

pub fn load_scenes(path: &Path) -> Result<Vec<Scene>, SceneError> {
    let json = std::fs::read_to_string(path).map_err(|source| SceneError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_scenes(&json)
}

pub struct SceneEngine {
    source: PathBuf,
    scenes: ArcSwap<Vec<Scene>>,
    cursor: AtomicUsize,
}

impl SceneEngine {
    /// Load the initial sequence from `source`
    pub fn load(source: impl Into<PathBuf>) -> Result<Self, SceneError> {
        let source = source.into();
        let scenes = load_scenes(&source)?;
        info!(path = %source.display(), count = scenes.len(), "Loaded scenes");
        Ok(Self {
            source,
            scenes: ArcSwap::from_pointee(scenes),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Engine over an in-memory sequence. `reload` still reads `source`.
    pub fn from_scenes(source: impl Into<PathBuf>, scenes: Vec<Scene>) -> Self {
        Self {
            source: source.into(),
            scenes: ArcSwap::from_pointee(scenes),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Re-read the source file. On failure the live sequence is untouched.
    pub fn reload(&self) -> Result<usize, SceneError> {
        let scenes = load_scenes(&self.source)?;
        let count = scenes.len();
        self.replace(scenes);
        info!(path = %self.source.display(), count, "Reloaded scenes");
        Ok(count)
    }

    pub fn replace(&self, scenes: Vec<Scene>) {
        self.scenes.store(Arc::new(scenes));
    }

    /// Full sequence as currently loaded
    pub fn scenes(&self) -> Arc<Vec<Scene>> {
        self.scenes.load_full()
    }

    /// Scene the cursor points at, `None` when the sequence is empty
    pub fn current(&self) -> Option<Scene> {
        let scenes = self.scenes.load();
        if scenes.is_empty() {
            return None;
        }
        let index = self.cursor.load(Ordering::Acquire) % scenes.len();
        scenes.get(index).cloned()
    }

    /// Take the scene at the cursor and move the cursor forward.
    /// Returns the scene with its index; the cursor does not move when the
    /// sequence is empty.
    pub fn advance(&self) -> Option<(usize, Scene)> {
        let scenes = self.scenes.load();
        if scenes.is_empty() {
            return None;
        }
        let cursor = self.cursor.fetch_add(1, Ordering::AcqRel);
        let index = cursor % scenes.len();
        scenes.get(index).cloned().map(|scene| (index, scene))
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Index `current()` would return, if any
    pub fn current_index(&self) -> Option<usize> {
        let len = self.len();
        (len > 0).then(|| self.cursor() % len)
    }

    pub fn len(&self) -> usize {
        self.scenes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
