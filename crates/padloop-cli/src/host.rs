//! The host: two engines, their DAW, and the poll loop.
//!
//! The performance engine ([`Surface`]) receives controller input. The
//! lights engine ([`Lights`]) receives only what the performance engine
//! relays to it. Both see the same [`HostDaw`] state, backed by the note
//! and LED outputs.
//!
//! Messages no rule claimed are passed through to the note output, routed
//! to the selected channel, so the keyboard stays playable.
//!
//! Recordings hold note-ons only, so every replayed note is gated: the host
//! sends its note-off `note_gate_ms` later, or straight away with a zero gate.

use crate::config::Config;
use crate::error::Result;
use crate::midi::{HostClock, InboundMidi, MidiOutput};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use padloop_core::daw::{pack_peer_message, unpack_peer_message};
use padloop_core::message::status;
use padloop_core::{Daw, Engine, Lights, Message, Surface};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// MIDI realtime start.
const MIDI_START: u8 = 0xFA;
/// MIDI realtime stop.
const MIDI_STOP: u8 = 0xFC;
/// MMC record strobe, all devices.
const MMC_RECORD_STROBE: [u8; 6] = [0xF0, 0x7F, 0x7F, 0x06, 0x06, 0xF7];

/// Relay rounds per wake-up before peers are assumed to be ping-ponging.
const MAX_RELAY_ROUNDS: usize = 64;

/// A replayed note waiting for its note-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GatedNote {
    release_ms: u64,
    channel: u8,
    note: u8,
}

/// State shared by every [`HostDaw`].
pub struct HostState {
    device: Box<dyn MidiOutput>,
    notes: Box<dyn MidiOutput>,
    active_channel: usize,
    channel_count: usize,
    playing: bool,
    now_ms: u64,
    note_gate_ms: u64,
    gated: Vec<GatedNote>,
}

impl HostState {
    pub fn new(device: Box<dyn MidiOutput>, notes: Box<dyn MidiOutput>, channel_count: usize) -> Self {
        Self {
            device,
            notes,
            active_channel: 0,
            channel_count,
            playing: false,
            now_ms: 0,
            note_gate_ms: 0,
            gated: Vec::new(),
        }
    }

    /// Hold replayed notes for `ms` before releasing them.
    pub fn with_note_gate_ms(mut self, ms: u64) -> Self {
        self.note_gate_ms = ms;
        self
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Replayed notes still sounding.
    pub fn held_notes(&self) -> usize {
        self.gated.len()
    }

    /// When the next gated note is due for release.
    pub fn next_release_ms(&self) -> Option<u64> {
        self.gated.iter().map(|g| g.release_ms).min()
    }

    /// Move the clock forward and release every note whose gate closed.
    fn advance(&mut self, now_ms: u64) -> usize {
        self.now_ms = self.now_ms.max(now_ms);
        let now_ms = self.now_ms;
        let (due, held): (Vec<_>, Vec<_>) = self.gated.drain(..).partition(|g| g.release_ms <= now_ms);
        self.gated = held;
        for g in &due {
            log::debug!("[NOTE] release ch={} note={} due={}ms now={}ms", g.channel, g.note, g.release_ms, now_ms);
            self.notes.note_off(g.channel, g.note);
        }
        due.len()
    }

    fn release_all(&mut self) -> usize {
        let released = self.gated.len();
        for g in std::mem::take(&mut self.gated) {
            self.notes.note_off(g.channel, g.note);
        }
        released
    }

    fn play_gated(&mut self, channel: u8, note: u8, velocity: u8) {
        // Retrigger: close the sounding note first
        if let Some(pos) = self.gated.iter().position(|g| g.channel == channel && g.note == note) {
            self.gated.remove(pos);
            self.notes.note_off(channel, note);
        }
        self.notes.note_on(channel, note, velocity);
        if self.note_gate_ms == 0 {
            self.notes.note_off(channel, note);
        } else {
            self.gated.push(GatedNote {
                release_ms: self.now_ms + self.note_gate_ms,
                channel,
                note,
            });
        }
    }

    /// MIDI channel nibble for a channel-rack slot.
    fn midi_channel(channel: usize) -> u8 {
        (channel % 16) as u8
    }
}

/// [`Daw`] implementation over the host's MIDI outputs.
#[derive(Clone)]
pub struct HostDaw {
    state: Rc<RefCell<HostState>>,
    peers: Sender<u32>,
}

impl HostDaw {
    pub fn new(state: Rc<RefCell<HostState>>, peers: Sender<u32>) -> Self {
        Self { state, peers }
    }
}

impl Daw for HostDaw {
    fn active_channel(&self) -> usize {
        self.state.borrow().active_channel
    }

    fn channel_count(&self) -> usize {
        self.state.borrow().channel_count
    }

    fn set_active_channel(&mut self, index: usize) {
        log::info!("Selected channel {}", index);
        self.state.borrow_mut().active_channel = index;
    }

    fn play_note(&mut self, channel: usize, note: u8, velocity: u8) {
        let midi_channel = HostState::midi_channel(channel);
        self.state.borrow_mut().play_gated(midi_channel, note, velocity);
    }

    fn toggle_play(&mut self) {
        let mut state = self.state.borrow_mut();
        state.playing = !state.playing;
        let byte = if state.playing { MIDI_START } else { MIDI_STOP };
        log::info!("Transport {}", if state.playing { "started" } else { "paused" });
        state.notes.send(&[byte]);
    }

    fn stop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.playing = false;
        state.notes.send(&[MIDI_STOP]);
    }

    fn record(&mut self) {
        log::info!("Transport record");
        self.state.borrow_mut().notes.send(&MMC_RECORD_STROBE);
    }

    fn send_sysex(&mut self, bytes: &[u8]) {
        self.state.borrow_mut().device.send(bytes);
    }

    fn dispatch_to_peers(&mut self, status: u8, data1: u8, data2: u8) {
        let _ = self.peers.send(pack_peer_message(status, data1, data2));
    }
}

/// Both engines plus the relay between them.
pub struct Host {
    surface: Engine<Surface>,
    lights: Engine<Lights>,
    state: Rc<RefCell<HostState>>,
    to_lights: Receiver<u32>,
    to_surface: Receiver<u32>,
}

impl Host {
    /// Build both engines over the given outputs.
    pub fn new(config: &Config, device: Box<dyn MidiOutput>, notes: Box<dyn MidiOutput>) -> Self {
        let state = Rc::new(RefCell::new(
            HostState::new(device, notes, config.engine.channel_count)
                .with_note_gate_ms(config.engine.note_gate_ms),
        ));
        let (lights_tx, to_lights) = unbounded();
        let (surface_tx, to_surface) = unbounded();

        let surface = Surface::new(
            Box::new(HostDaw::new(state.clone(), lights_tx)),
            config.surface_settings(),
        );
        let lights = Lights::new(
            Box::new(HostDaw::new(state.clone(), surface_tx)),
            config.engine.daw_mode,
        );

        Self {
            surface: Engine::new(surface).with_debug_messages(config.engine.debug_messages),
            lights: Engine::new(lights).with_debug_messages(config.engine.debug_messages),
            state,
            to_lights,
            to_surface,
        }
    }

    pub fn surface(&self) -> &Engine<Surface> {
        &self.surface
    }

    pub fn state(&self) -> std::cell::Ref<'_, HostState> {
        self.state.borrow()
    }

    /// Run both init hooks.
    pub fn init(&mut self, now_ms: u64) {
        self.surface.on_init();
        self.lights.on_init();
        self.relay_peers(now_ms);
        log::info!("padloop ready");
    }

    /// Dispatch one inbound message from the controller.
    pub fn handle_input(&mut self, bytes: &[u8], timestamp_ms: u64) {
        let Some(message) = Message::from_bytes(bytes, timestamp_ms) else {
            return;
        };
        // SysEx and system realtime never reach the rules
        if !(0x80..0xF0).contains(&message.status) {
            log::trace!("Ignoring {:02X?}", bytes);
            return;
        }

        self.state.borrow_mut().advance(timestamp_ms);
        let out = self.surface.on_message(message);
        if !out.report.failed_actions.is_empty() {
            log::debug!("{} actions failed on {}", out.report.failed_actions.len(), out.message);
        }
        if !out.handled() {
            self.pass_through(&out.message);
        }
        self.relay_peers(timestamp_ms);
    }

    /// Service scheduled playback. Returns the number of tasks fired.
    pub fn idle(&mut self, now_ms: u64) -> usize {
        self.state.borrow_mut().advance(now_ms);
        let fired = self.surface.on_idle(now_ms) + self.lights.on_idle(now_ms);
        self.relay_peers(now_ms);
        fired
    }

    /// Stop all playback and release every sounding replayed note.
    pub fn shutdown(&mut self) {
        let stopped = self.surface.state_mut().stop_all();
        let released = self.state.borrow_mut().release_all();
        log::info!("Shutting down, stopped {} playbacks, released {} notes", stopped, released);
    }

    /// Time until the next scheduled playback or note release, capped at
    /// `idle`.
    pub fn next_wait(&self, now_ms: u64, idle: Duration) -> Duration {
        let next_due = self.surface.state().scheduler().next_due_ms();
        let next_release = self.state.borrow().next_release_ms();
        match next_due.into_iter().chain(next_release).min() {
            Some(due) => idle.min(Duration::from_millis(due.saturating_sub(now_ms))),
            None => idle,
        }
    }

    /// Poll loop: dispatch inbound messages and service playback until
    /// `shutdown` is set or the input closes.
    pub fn run(
        &mut self,
        inbound: &Receiver<InboundMidi>,
        clock: &HostClock,
        idle: Duration,
        shutdown: &AtomicBool,
    ) -> Result<()> {
        self.init(clock.now_ms());

        while !shutdown.load(Ordering::Relaxed) {
            let wait = self.next_wait(clock.now_ms(), idle);
            match inbound.recv_timeout(wait) {
                Ok(msg) => {
                    self.handle_input(&msg.bytes, msg.timestamp_ms);
                    for msg in inbound.try_iter() {
                        self.handle_input(&msg.bytes, msg.timestamp_ms);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("MIDI input closed");
                    break;
                }
            }
            self.idle(clock.now_ms());
        }

        self.shutdown();
        Ok(())
    }

    fn pass_through(&mut self, message: &Message) {
        let mut state = self.state.borrow_mut();
        let channel = HostState::midi_channel(state.active_channel);
        let mut bytes = message.to_bytes();
        match message.masked_status() {
            status::NOTE_OFF | status::NOTE_ON | status::POLY_AFTERTOUCH => {
                bytes[0] = message.masked_status() | channel;
            }
            _ => {}
        }
        state.notes.send(&bytes);
    }

    fn relay_peers(&mut self, now_ms: u64) {
        for _ in 0..MAX_RELAY_ROUNDS {
            let mut delivered = false;
            for packed in self.to_lights.try_iter().collect::<Vec<_>>() {
                let (status, data1, data2) = unpack_peer_message(packed);
                self.lights.on_midi(status, data1, data2, now_ms);
                delivered = true;
            }
            for packed in self.to_surface.try_iter().collect::<Vec<_>>() {
                let (status, data1, data2) = unpack_peer_message(packed);
                self.surface.on_midi(status, data1, data2, now_ms);
                delivered = true;
            }
            if !delivered {
                return;
            }
        }
        log::warn!("Peer relay did not settle after {} rounds", MAX_RELAY_ROUNDS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use padloop_core::PatternKey;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<Vec<u8>>>>);

    impl Capture {
        fn take(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut *self.0.borrow_mut())
        }
    }

    impl MidiOutput for Capture {
        fn send(&mut self, bytes: &[u8]) {
            self.0.borrow_mut().push(bytes.to_vec());
        }
        fn port_name(&self) -> &str {
            "capture"
        }
        fn is_connected(&self) -> bool {
            true
        }
    }

    fn host() -> (Host, Capture, Capture) {
        let leds = Capture::default();
        let notes = Capture::default();
        let mut host = Host::new(&Config::default(), Box::new(leds.clone()), Box::new(notes.clone()));
        host.init(0);
        (host, leds, notes)
    }

    #[test]
    fn test_init_lights_pads_off() {
        let (_host, leds, notes) = host();
        let sent = leds.take();
        assert_eq!(sent.len(), 16);
        assert_eq!(sent[15], vec![0x9F, 0x0C, 0x00, 0x99, 0x2F, 0x00]);
        assert!(notes.take().is_empty());
    }

    #[test]
    fn test_record_and_replay_through_host() {
        let (mut host, leds, notes) = host();
        leds.take();

        host.handle_input(&[0xB0, 0x75, 0x7F], 0);
        host.handle_input(&[0x99, 0x28, 0x7F], 0);
        host.handle_input(&[0xB0, 0x75, 0x00], 0);
        assert_eq!(leds.take(), vec![vec![0x9F, 0x0C, 0x00, 0x9B, 0x28, 0x05]]);

        // Live keys pass through while being captured
        host.handle_input(&[0x90, 60, 100], 10);
        host.handle_input(&[0x80, 60, 0], 50);
        host.handle_input(&[0x90, 62, 90], 110);
        assert_eq!(notes.take(), vec![vec![0x90, 60, 100], vec![0x80, 60, 0], vec![0x90, 62, 90]]);

        host.handle_input(&[0xB0, 0x75, 0x7F], 200);
        host.handle_input(&[0xB0, 0x75, 0x00], 200);
        assert_eq!(leds.take(), vec![vec![0x9F, 0x0C, 0x00, 0x99, 0x28, 0x00]]);
        assert!(notes.take().is_empty());

        host.handle_input(&[0x99, 0x28, 0x7F], 1000);
        assert_eq!(host.next_wait(1000, Duration::from_millis(10)), Duration::from_millis(10));
        assert_eq!(host.idle(1010), 1);
        assert_eq!(host.next_wait(1050, Duration::from_millis(100)), Duration::from_millis(60));
        assert_eq!(host.idle(1200), 1);
        // First note's gate closed at 1110
        assert_eq!(
            notes.take(),
            vec![vec![0x90, 60, 100], vec![0x80, 60, 0], vec![0x90, 62, 90]]
        );
        assert_eq!(host.next_wait(1250, Duration::from_millis(100)), Duration::from_millis(50));
        host.idle(1300);
        assert_eq!(notes.take(), vec![vec![0x80, 62, 0]]);
        assert_eq!(host.state().held_notes(), 0);
    }

    fn record_single_note(host: &mut Host, notes: &Capture) {
        host.handle_input(&[0xB0, 0x75, 0x7F], 0);
        host.handle_input(&[0x99, 0x28, 0x7F], 0);
        host.handle_input(&[0xB0, 0x75, 0x00], 0);
        host.handle_input(&[0x90, 60, 100], 0);
        host.handle_input(&[0xB0, 0x75, 0x7F], 5);
        host.handle_input(&[0xB0, 0x75, 0x00], 5);
        notes.take();
    }

    #[test]
    fn test_looped_note_is_retriggered_and_released() {
        let (mut host, _leds, notes) = host();
        record_single_note(&mut host, &notes);

        host.handle_input(&[0xB0, 0x73, 0x7F], 1000);
        host.handle_input(&[0x99, 0x28, 0x7F], 1000);
        host.handle_input(&[0xB0, 0x73, 0x00], 1000);
        host.idle(1000);
        assert_eq!(notes.take(), vec![vec![0x90, 60, 100]]);

        // Next pass at 1050 lands inside the 100ms gate
        host.idle(1050);
        assert_eq!(notes.take(), vec![vec![0x80, 60, 0], vec![0x90, 60, 100]]);

        host.shutdown();
        assert_eq!(notes.take(), vec![vec![0x80, 60, 0]]);
        assert_eq!(host.state().held_notes(), 0);
    }

    #[test]
    fn test_zero_gate_releases_at_once() {
        let leds = Capture::default();
        let notes = Capture::default();
        let mut config = Config::default();
        config.engine.note_gate_ms = 0;
        let mut host = Host::new(&config, Box::new(leds), Box::new(notes.clone()));
        host.init(0);
        record_single_note(&mut host, &notes);

        host.handle_input(&[0x99, 0x28, 0x7F], 1000);
        host.idle(1000);
        assert_eq!(notes.take(), vec![vec![0x90, 60, 100], vec![0x80, 60, 0]]);
        assert_eq!(host.state().next_release_ms(), None);
    }

    #[test]
    fn test_pass_through_follows_selected_channel() {
        let (mut host, _leds, notes) = host();
        host.handle_input(&[0xB0, 0x68, 0x7F], 0);
        host.handle_input(&[0x99, 0x2A, 0x7F], 0);
        host.handle_input(&[0xB0, 0x68, 0x00], 0);
        assert_eq!(host.state().active_channel, 2);

        host.handle_input(&[0x90, 64, 100], 10);
        host.handle_input(&[0xB3, 0x15, 0x40], 20);
        assert_eq!(notes.take(), vec![vec![0x92, 64, 100], vec![0xB3, 0x15, 0x40]]);
    }

    #[test]
    fn test_transport_buttons() {
        let (mut host, _leds, notes) = host();
        host.handle_input(&[0xB0, 0x73, 0x7F], 0);
        host.handle_input(&[0xB0, 0x73, 0x00], 0);
        assert!(host.state().is_playing());
        host.handle_input(&[0xB0, 0x69, 0x7F], 0);
        host.handle_input(&[0xB0, 0x69, 0x00], 0);
        assert!(!host.state().is_playing());
        host.handle_input(&[0xB0, 0x75, 0x7F], 0);
        host.handle_input(&[0xB0, 0x75, 0x00], 0);
        assert_eq!(
            notes.take(),
            vec![vec![MIDI_START], vec![MIDI_STOP], MMC_RECORD_STROBE.to_vec()]
        );
    }

    #[test]
    fn test_system_messages_are_ignored() {
        let (mut host, _leds, notes) = host();
        host.handle_input(&[0xF8], 0);
        host.handle_input(&[0xF0, 0x00, 0x20, 0x29, 0xF7], 0);
        host.handle_input(&[], 0);
        assert!(notes.take().is_empty());
    }

    #[test]
    fn test_run_exits_on_shutdown() {
        let (mut host, _leds, notes) = host();
        let pad = PatternKey::new(0x99, 0x28);

        let (tx, rx) = unbounded();
        for (bytes, ts) in [
            (vec![0xB0, 0x75, 0x7F], 0),
            (vec![0x99, 0x28, 0x7F], 0),
            (vec![0xB0, 0x75, 0x00], 0),
            (vec![0x90, 60, 100], 0),
            (vec![0xB0, 0x75, 0x7F], 5),
            (vec![0xB0, 0x75, 0x00], 5),
            (vec![0xB0, 0x73, 0x7F], 5),
            (vec![0x99, 0x28, 0x7F], 5),
            (vec![0xB0, 0x73, 0x00], 5),
        ] {
            tx.send(InboundMidi { bytes, timestamp_ms: ts }).unwrap();
        }
        drop(tx);

        let clock = HostClock::new();
        let shutdown = AtomicBool::new(false);
        host.run(&rx, &clock, Duration::from_millis(1), &shutdown).unwrap();

        // Input closed: loop ended and the looping pad was stopped
        assert!(!host.surface().state().recorder().is_playing(pad));
        assert!(host.surface().state().recorder().has_recording(pad));
        assert!(!notes.take().is_empty());
    }
}
