//! padloop-core - rule dispatch and pad looping for MIDI control surfaces
//!
//! This crate is the host-independent half of padloop:
//!
//! - **Message model**: [`Message`] and [`PatternKey`]
//! - **Matchers**: composable predicates over MIDI bytes ([`matchers`])
//! - **Dispatch**: ordered `(matcher, actions)` rule tables ([`Dispatcher`])
//! - **Scheduling**: a cooperative, single-threaded task queue ([`Scheduler`])
//! - **Recording**: capture-and-loop of note sequences per pad ([`Recorder`])
//! - **Scripts**: the Launchkey performance and lights scripts ([`Surface`], [`Lights`])
//!
//! Everything runs on the host's thread. The host feeds inbound MIDI to
//! [`Engine::on_midi`] and calls [`Engine::on_idle`] from its poll loop;
//! nothing here blocks or spawns.
//!
//! ```
//! use padloop_core::{Engine, NullDaw, Surface, SurfaceSettings};
//!
//! let surface = Surface::new(Box::new(NullDaw::default()), SurfaceSettings::default());
//! let mut engine = Engine::new(surface);
//! engine.on_init();
//!
//! // Hold record, strike a pad, play two notes, press record again
//! engine.on_midi(0xB0, 0x75, 0x7F, 0);
//! engine.on_midi(0x99, 0x28, 0x7F, 0);
//! engine.on_midi(0xB0, 0x75, 0x00, 0);
//! engine.on_midi(0x90, 60, 100, 10);
//! engine.on_midi(0x90, 64, 100, 130);
//! engine.on_midi(0xB0, 0x75, 0x7F, 200);
//!
//! let recording = engine.state().recorder().recording((0x99, 0x28).into()).unwrap();
//! assert_eq!(recording.len(), 2);
//! ```

pub mod daw;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod launchkey;
pub mod lights;
pub mod matchers;
pub mod message;
pub mod recorder;
pub mod scheduler;
pub mod surface;

pub use daw::{Daw, NullDaw};
pub use dispatch::{action, Action, DispatchReport, Dispatcher};
pub use engine::{Dispatched, Engine, Script};
pub use error::{Error, RecorderError, Result};
pub use lights::Lights;
pub use matchers::{Field, Matcher, MidiHas};
pub use message::{Message, PatternKey, Userdata};
pub use recorder::{CapturedEvent, KeyState, PlaybackTask, Recorder, Recording, DEFAULT_MIN_LOOP_PERIOD_MS};
pub use scheduler::{FiredTask, Scheduler, TaskHandle, TaskState};
pub use surface::{Control, Surface, SurfaceSettings};
