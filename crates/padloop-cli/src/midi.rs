//! MIDI port I/O
//!
//! The controller input is read through ALSA (via midir) and forwarded over
//! a channel. Outputs implement [`MidiOutput`]: an ALSA port, a JACK MIDI
//! port, or a dummy that only logs.

use crate::config::{MidiSettings, NoteBackend};
use crate::error::{Error, PortDirection, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutputConnection};
use std::time::Instant;

/// Monotonic host clock, milliseconds since the host started.
#[derive(Debug, Clone, Copy)]
pub struct HostClock {
    start: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw bytes received from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMidi {
    pub bytes: Vec<u8>,
    /// Arrival time on the [`HostClock`].
    pub timestamp_ms: u64,
}

/// MIDI output trait
pub trait MidiOutput {
    /// Send raw bytes
    fn send(&mut self, bytes: &[u8]);

    /// Get the port name
    fn port_name(&self) -> &str;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send a note on message
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        self.send(&[0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]);
    }

    /// Send a note off message
    fn note_off(&mut self, channel: u8, note: u8) {
        self.send(&[0x80 | (channel & 0x0F), note & 0x7F, 0]);
    }
}

fn find_port<P>(ports: Vec<P>, pattern: &str, name_of: impl Fn(&P) -> Option<String>) -> Option<(P, String)> {
    let pattern = pattern.to_lowercase();
    ports.into_iter().find_map(|port| {
        let name = name_of(&port)?;
        name.to_lowercase().contains(&pattern).then_some((port, name))
    })
}

/// Controller input over ALSA
pub struct MidiInputPort {
    name: String,
    /// Keep the connection alive
    _connection: MidiInputConnection<()>,
}

impl MidiInputPort {
    /// Open the first input whose name contains `pattern` (case-insensitive).
    ///
    /// Every message is stamped on arrival with `clock` and sent to the
    /// returned receiver.
    pub fn open(client_name: &str, pattern: &str, clock: HostClock) -> Result<(Self, Receiver<InboundMidi>)> {
        let mut midi_in =
            MidiInput::new(client_name).map_err(|e| client_error(PortDirection::Input, e))?;
        midi_in.ignore(Ignore::TimeAndActiveSense);

        let (port, name) = find_port(midi_in.ports(), pattern, |p| midi_in.port_name(p).ok())
            .ok_or_else(|| Error::PortNotFound {
                direction: PortDirection::Input,
                pattern: pattern.to_string(),
            })?;

        let (tx, rx) = unbounded();
        let connection = midi_in
            .connect(&port, "padloop-input", forward_input(tx, clock), ())
            .map_err(|e| Error::Connect {
                direction: PortDirection::Input,
                port: name.clone(),
                reason: e.to_string(),
            })?;

        log::info!("Connected to MIDI input: {}", name);
        Ok((
            Self {
                name,
                _connection: connection,
            },
            rx,
        ))
    }

    pub fn port_name(&self) -> &str {
        &self.name
    }
}

fn client_error(direction: PortDirection, e: midir::InitError) -> Error {
    Error::MidiClient {
        direction,
        reason: e.to_string(),
    }
}

fn forward_input(tx: Sender<InboundMidi>, clock: HostClock) -> impl FnMut(u64, &[u8], &mut ()) + Send + 'static {
    move |_stamp, bytes, _| {
        let timestamp_ms = clock.now_ms();
        log::trace!("[MIDI RAW] {}ms {:02X?}", timestamp_ms, bytes);
        let _ = tx.send(InboundMidi {
            bytes: bytes.to_vec(),
            timestamp_ms,
        });
    }
}

/// ALSA MIDI output (via midir)
pub struct AlsaMidiOutput {
    name: String,
    connection: MidiOutputConnection,
}

impl AlsaMidiOutput {
    /// Open the first output whose name contains `pattern` (case-insensitive).
    pub fn open(client_name: &str, pattern: &str) -> Result<Self> {
        let midi_out =
            midir::MidiOutput::new(client_name).map_err(|e| client_error(PortDirection::Output, e))?;

        let (port, name) = find_port(midi_out.ports(), pattern, |p| midi_out.port_name(p).ok())
            .ok_or_else(|| Error::PortNotFound {
                direction: PortDirection::Output,
                pattern: pattern.to_string(),
            })?;

        let connection = midi_out
            .connect(&port, "padloop-output")
            .map_err(|e| Error::Connect {
                direction: PortDirection::Output,
                port: name.clone(),
                reason: e.to_string(),
            })?;

        log::info!("Connected to MIDI output: {}", name);
        Ok(Self { name, connection })
    }
}

impl MidiOutput for AlsaMidiOutput {
    fn send(&mut self, bytes: &[u8]) {
        if let Err(e) = self.connection.send(bytes) {
            log::warn!("Failed to send to {}: {}", self.name, e);
        }
    }

    fn port_name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// JACK MIDI output
pub struct JackMidiOutput {
    /// Sender for MIDI messages to the JACK process callback
    tx: Sender<Vec<u8>>,
    /// Port name
    port_name: String,
    /// Keep the client alive
    _client: jack::AsyncClient<(), JackMidiHandler>,
}

impl JackMidiOutput {
    /// Create a new JACK MIDI output
    pub fn new(client_name: &str, port_name: &str) -> Result<Self> {
        let (client, _status) = jack::Client::new(client_name, jack::ClientOptions::NO_START_SERVER)?;
        let midi_out = client.register_port(port_name, jack::MidiOut::default())?;

        let (tx, rx) = unbounded();
        let active_client = client.activate_async((), JackMidiHandler { midi_out, rx })?;

        let full_port_name = format!("{}:{}", client_name, port_name);
        log::info!("JACK MIDI output created: {}", full_port_name);

        Ok(Self {
            tx,
            port_name: full_port_name,
            _client: active_client,
        })
    }
}

impl MidiOutput for JackMidiOutput {
    fn send(&mut self, bytes: &[u8]) {
        let _ = self.tx.send(bytes.to_vec());
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn is_connected(&self) -> bool {
        true // If we got this far, we're connected
    }
}

/// JACK process handler for MIDI output
struct JackMidiHandler {
    midi_out: jack::Port<jack::MidiOut>,
    rx: Receiver<Vec<u8>>,
}

impl jack::ProcessHandler for JackMidiHandler {
    fn process(&mut self, _client: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        let mut writer = self.midi_out.writer(ps);

        while let Ok(bytes) = self.rx.try_recv() {
            let raw = jack::RawMidi { time: 0, bytes: &bytes };
            let _ = writer.write(&raw);
        }

        jack::Control::Continue
    }
}

/// Dummy MIDI output (for testing or when no backend is configured)
pub struct DummyMidiOutput {
    name: String,
}

impl DummyMidiOutput {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

impl MidiOutput for DummyMidiOutput {
    fn send(&mut self, bytes: &[u8]) {
        log::debug!("MIDI out ({}): {:02X?}", self.name, bytes);
    }

    fn port_name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        false
    }
}

/// Open the output the pad LED commands go to, falling back to a dummy.
pub fn open_device_output(settings: &MidiSettings) -> Box<dyn MidiOutput> {
    match AlsaMidiOutput::open("padloop-leds", &settings.device_output_port) {
        Ok(output) => Box::new(output),
        Err(e) => {
            log::warn!("LED output disabled: {}", e);
            Box::new(DummyMidiOutput::new("leds"))
        }
    }
}

/// Open the configured note output, falling back to a dummy.
pub fn open_note_output(settings: &MidiSettings) -> Box<dyn MidiOutput> {
    let opened: Result<Box<dyn MidiOutput>> = match settings.note_backend {
        NoteBackend::Alsa => AlsaMidiOutput::open("padloop-notes", &settings.note_output_port)
            .map(|o| Box::new(o) as Box<dyn MidiOutput>),
        NoteBackend::Jack => {
            if !is_jack_running() {
                Err(Error::JackNotRunning)
            } else {
                JackMidiOutput::new(&settings.jack_client_name, &settings.note_output_port)
                    .map(|o| Box::new(o) as Box<dyn MidiOutput>)
            }
        }
        NoteBackend::None => Ok(Box::new(DummyMidiOutput::new("notes"))),
    };

    opened.unwrap_or_else(|e| {
        log::warn!("Note output disabled: {}", e);
        Box::new(DummyMidiOutput::new("notes"))
    })
}

/// Check if JACK is running
pub fn is_jack_running() -> bool {
    jack::Client::new("padloop-check", jack::ClientOptions::NO_START_SERVER).is_ok()
}

/// List available JACK MIDI input ports
pub fn list_jack_midi_ports() -> Vec<String> {
    if let Ok((client, _)) = jack::Client::new("padloop-list", jack::ClientOptions::NO_START_SERVER) {
        client.ports(None, Some("midi"), jack::PortFlags::IS_INPUT)
    } else {
        Vec::new()
    }
}

/// ALSA MIDI port names
#[derive(Debug, Clone, Default)]
pub struct PortListing {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// List ALSA MIDI input and output ports
pub fn list_ports() -> Result<PortListing> {
    let midi_in = MidiInput::new("padloop-list").map_err(|e| client_error(PortDirection::Input, e))?;
    let midi_out =
        midir::MidiOutput::new("padloop-list").map_err(|e| client_error(PortDirection::Output, e))?;

    Ok(PortListing {
        inputs: midi_in.ports().iter().filter_map(|p| midi_in.port_name(p).ok()).collect(),
        outputs: midi_out.ports().iter().filter_map(|p| midi_out.port_name(p).ok()).collect(),
    })
}
