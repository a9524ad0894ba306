//! padloop-cli - MIDI host for padloop
//!
//! Connects a Novation Launchkey Mini Mk3 to the padloop engines:
//!
//! - Controller input over ALSA (via midir)
//! - Pad LED commands to the device's DAW port
//! - Replayed and passed-through notes to an ALSA or JACK MIDI port
//! - Configurable via TOML file
//!
//! # Usage as a Library
//!
//! ```no_run
//! use padloop_cli::midi::{DummyMidiOutput, HostClock};
//! use padloop_cli::{Config, Host};
//!
//! let config = Config::load_or_default();
//! let mut host = Host::new(
//!     &config,
//!     Box::new(DummyMidiOutput::new("leds")),
//!     Box::new(DummyMidiOutput::new("notes")),
//! );
//! let clock = HostClock::new();
//! host.init(clock.now_ms());
//! host.handle_input(&[0x99, 0x28, 0x7F], clock.now_ms());
//! host.idle(clock.now_ms());
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod midi;

// Re-export main types
pub use config::{Config, EngineSettings, LedSettings, MidiSettings, NoteBackend};
pub use error::{Error, Result};
pub use host::{Host, HostDaw};
