//! Configuration management

use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::broadcaster::BroadcasterMode;

const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served at `/`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// External scene list (JSON)
    #[serde(default = "default_scenes_path")]
    pub scenes_path: PathBuf,

    /// Backpressure policy for slow clients
    #[serde(default)]
    pub broadcaster: BroadcasterMode,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_scene_interval_secs")]
    pub scene_interval_secs: u64,

    /// How long a note sounds before its note-off is sent
    #[serde(default = "default_note_hold_ms")]
    pub note_hold_ms: u64,

    /// Grace period used by the buffered broadcaster
    #[serde(default = "default_buffered_grace_ms")]
    pub buffered_grace_ms: u64,

    #[serde(default = "default_client_queue_capacity")]
    pub client_queue_capacity: usize,

    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,

    #[serde(default)]
    pub midi: MidiConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./static")
}

fn default_scenes_path() -> PathBuf {
    PathBuf::from("scenes.json")
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_scene_interval_secs() -> u64 {
    5
}

fn default_note_hold_ms() -> u64 {
    500
}

fn default_buffered_grace_ms() -> u64 {
    50
}

fn default_client_queue_capacity() -> usize {
    32
}

fn default_dispatch_queue_capacity() -> usize {
    crate::bus::DEFAULT_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            static_dir: default_static_dir(),
            scenes_path: default_scenes_path(),
            broadcaster: BroadcasterMode::default(),
            idle_timeout_secs: default_idle_timeout_secs(),
            scene_interval_secs: default_scene_interval_secs(),
            note_hold_ms: default_note_hold_ms(),
            buffered_grace_ms: default_buffered_grace_ms(),
            client_queue_capacity: default_client_queue_capacity(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            midi: MidiConfig::default(),
        }
    }
}

impl Config {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn scene_interval(&self) -> Duration {
        Duration::from_secs(self.scene_interval_secs)
    }

    pub fn note_hold(&self) -> Duration {
        Duration::from_millis(self.note_hold_ms)
    }

    pub fn buffered_grace(&self) -> Duration {
        Duration::from_millis(self.buffered_grace_ms)
    }

    /// Reject values that would make the service misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        if self.midi.channel > 15 {
            bail!("midi.channel must be 0-15, got {}", self.midi.channel);
        }
        if self.scene_interval_secs == 0 {
            bail!("scene_interval_secs must be greater than zero");
        }
        if self.idle_timeout_secs == 0 {
            bail!("idle_timeout_secs must be greater than zero");
        }
        if self.client_queue_capacity == 0 {
            bail!("client_queue_capacity must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MidiConfig {
    /// Output port, matched by exact name
    #[serde(default = "default_output_port")]
    pub output_port: String,

    /// Input port; the first available device is used when unset
    #[serde(default)]
    pub input_port: Option<String>,

    /// Channel for note-on/note-off (0-15)
    #[serde(default)]
    pub channel: u8,

    /// Refuse to start when the hardware cannot be opened.
    /// When false the service runs network-only.
    #[serde(default = "default_true")]
    pub required: bool,

    /// Also play hardware-originated notes on the output port
    #[serde(default)]
    pub thru: bool,
}

fn default_output_port() -> String {
    "IAC Driver Bus 1".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            output_port: default_output_port(),
            input_port: None,
            channel: 0,
            required: true,
            thru: false,
        }
    }
}

/// Get config directory (MCH_CONFIG_DIR, XDG_CONFIG_HOME or current directory)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MCH_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            let dir = PathBuf::from(xdg).join("midi-cue-hub");
            if dir.exists() {
                return dir;
            }
        }
    }

    PathBuf::from(".")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        // Start with defaults
        .set_default("port", DEFAULT_PORT as i64)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (MCH_BROADCASTER, MCH_MIDI__OUTPUT_PORT, etc.)
        .add_source(
            ::config::Environment::with_prefix("MCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // Explicit precedence: MCH_PORT > PORT > config > default
    if let Ok(port) = std::env::var("MCH_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    } else if let Ok(port) = std::env::var("PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    }

    let config: Config = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
