//! Configuration file support for padloop
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/padloop/config.toml`
//! - macOS: `~/Library/Application Support/padloop/config.toml`
//! - Windows: `%APPDATA%\padloop\config.toml`

use crate::error::{Error, Result};
use directories::ProjectDirs;
use padloop_core::launchkey::LED_OFF_COLOR;
use padloop_core::{SurfaceSettings, DEFAULT_MIN_LOOP_PERIOD_MS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MIDI port configuration
    pub midi: MidiSettings,
    /// Engine tuning
    pub engine: EngineSettings,
    /// Pad LED colors
    pub leds: LedSettings,
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::ConfigNotFound { path })
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "padloop") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::NoConfigDir)
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::write_default_config_file(&path)?;
        Ok(path)
    }

    /// Write the commented default config to `path`
    pub fn write_default_config_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = r#"# padloop configuration file

[midi]
# Controller input port (case-insensitive substring match)
input_port = "Launchkey Mini MK3 MIDI"

# Port the pad LED commands are written to
device_output_port = "Launchkey Mini MK3 DAW"

# Where replayed and passed-through notes go: "alsa", "jack" or "none"
note_backend = "jack"

# ALSA: output port to match; JACK: name of the port to register
note_output_port = "midi_out"

# JACK client name
jack_client_name = "padloop"

[engine]
# How often scheduled playback is serviced while no MIDI arrives
idle_interval_ms = 10

# Prefix LED commands with the DAW-mode preamble
daw_mode = true

# Number of selectable channels (page-up + pad)
channel_count = 16

# Silence between loop passes
loop_delay_ms = 0

# Shortest time between loop pass starts
min_loop_period_ms = 50

# Replayed notes are released after this long (0 releases at once)
note_gate_ms = 100

# Log every inbound message at info level
debug_messages = false

[leds]
# Color a pad blinks while it is being recorded
record_blink_color = 5

# Color that turns a pad off
off_color = 0
"#;

        fs::write(path, content)?;
        Ok(())
    }

    /// Settings for the performance script
    pub fn surface_settings(&self) -> SurfaceSettings {
        SurfaceSettings {
            record_blink_color: self.leds.record_blink_color,
            off_color: self.leds.off_color,
            loop_delay_ms: self.engine.loop_delay_ms,
            min_loop_period_ms: self.engine.min_loop_period_ms,
        }
    }
}

/// Backend for note output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NoteBackend {
    /// ALSA sequencer port (via midir)
    Alsa,
    /// JACK MIDI port
    #[default]
    Jack,
    /// Log notes only
    None,
}

/// MIDI port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    /// Controller input port (substring match)
    pub input_port: String,
    /// Port the LED commands are written to
    pub device_output_port: String,
    /// Note output backend
    pub note_backend: NoteBackend,
    /// Note output port
    pub note_output_port: String,
    /// JACK client name
    pub jack_client_name: String,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            input_port: "Launchkey Mini MK3 MIDI".to_string(),
            device_output_port: "Launchkey Mini MK3 DAW".to_string(),
            note_backend: NoteBackend::Jack,
            note_output_port: "midi_out".to_string(),
            jack_client_name: "padloop".to_string(),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Idle poll interval in milliseconds
    pub idle_interval_ms: u64,
    /// Prefix LED commands with the DAW-mode preamble
    pub daw_mode: bool,
    /// Number of selectable channels
    pub channel_count: usize,
    /// Silence between loop passes in milliseconds
    pub loop_delay_ms: u64,
    /// Shortest loop period in milliseconds
    pub min_loop_period_ms: u64,
    /// How long a replayed note sounds before its note-off
    pub note_gate_ms: u64,
    /// Log every inbound message at info level
    pub debug_messages: bool,
}

impl EngineSettings {
    /// Idle interval, at least 1 ms
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms.max(1))
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            idle_interval_ms: 10,
            daw_mode: true,
            channel_count: 16,
            loop_delay_ms: 0,
            min_loop_period_ms: DEFAULT_MIN_LOOP_PERIOD_MS,
            note_gate_ms: 100,
            debug_messages: false,
        }
    }
}

/// Pad LED colors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedSettings {
    /// Blink color while recording
    pub record_blink_color: u8,
    /// Off color
    pub off_color: u8,
}

impl Default for LedSettings {
    fn default() -> Self {
        Self {
            record_blink_color: 0x05,
            off_color: LED_OFF_COLOR,
        }
    }
}
