//! Process-wide engine context.
//!
//! An [`Engine`] is built once at startup from a [`Script`]'s state. The
//! script installs its rules into the engine's [`Dispatcher`] in a fixed
//! order, and from then on the host drives exactly three entry points:
//!
//! - [`Engine::on_init`] once, after construction
//! - [`Engine::on_midi`] once per inbound MIDI event
//! - [`Engine::on_idle`] from the host's idle poll
//!
//! All three run to completion on the caller's thread and are never
//! re-entered, so no state here needs a lock.

use crate::dispatch::{DispatchReport, Dispatcher};
use crate::message::Message;

/// A control-surface script: state plus the rules that act on it.
pub trait Script: Sized {
    /// Register this script's rules. Registration order is firing order.
    fn install(rules: &mut Dispatcher<Self>);

    /// Called once after the engine is built.
    fn on_init(&mut self) {}

    /// Host time moved forward; called before each dispatch pass.
    fn on_time(&mut self, _now_ms: u64) {}

    /// Host idle poll. Returns the number of scheduled tasks fired.
    fn on_idle(&mut self, _now_ms: u64) -> usize {
        0
    }
}

/// Result of one [`Engine::on_midi`] call.
#[derive(Clone, Debug)]
pub struct Dispatched {
    /// The message after every rule has seen it.
    pub message: Message,
    pub report: DispatchReport,
}

impl Dispatched {
    /// Whether some rule claimed the message, suppressing default handling.
    pub fn handled(&self) -> bool {
        self.message.handled
    }
}

/// Owns a script's rule table and state.
pub struct Engine<S: Script> {
    rules: Dispatcher<S>,
    state: S,
    debug_messages: bool,
}

impl<S: Script> Engine<S> {
    /// Build the engine and install the script's rules.
    pub fn new(state: S) -> Self {
        let mut rules = Dispatcher::new();
        S::install(&mut rules);
        log::debug!("Engine installed {} rules", rules.len());
        Self {
            rules,
            state,
            debug_messages: false,
        }
    }

    /// Log every inbound message at info level instead of debug.
    pub fn with_debug_messages(mut self, enabled: bool) -> Self {
        self.debug_messages = enabled;
        self
    }

    pub fn on_init(&mut self) {
        self.state.on_init();
    }

    /// Dispatch one inbound event.
    pub fn on_midi(&mut self, status: u8, data1: u8, data2: u8, timestamp_ms: u64) -> Dispatched {
        self.on_message(Message::at(status, data1, data2, timestamp_ms))
    }

    /// Dispatch an already-built message.
    pub fn on_message(&mut self, mut message: Message) -> Dispatched {
        if self.debug_messages {
            log::info!("[MIDI] {}", message);
        } else {
            log::debug!("[MIDI] {}", message);
        }
        self.state.on_time(message.timestamp_ms);
        let report = self.rules.dispatch(&mut self.state, &mut message);
        Dispatched { message, report }
    }

    /// Run one scheduler tick.
    pub fn on_idle(&mut self, now_ms: u64) -> usize {
        self.state.on_idle(now_ms)
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn rules(&self) -> &Dispatcher<S> {
        &self.rules
    }
}
