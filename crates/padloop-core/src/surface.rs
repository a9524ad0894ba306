//! Performance script: the controller state machine.
//!
//! Holding record and striking a pad arms a capture for that pad; every
//! note played until record is pressed again is captured with its timing.
//! Striking the pad later replays the capture, and holding play while
//! striking it loops the capture until page-down stops everything. Holding
//! page-up and striking a pad selects the channel-rack slot under it.
//!
//! LED feedback is not sent from here. It is relayed to the lights script,
//! which owns the device's DAW port.

use std::collections::HashSet;

use crate::daw::Daw;
use crate::dispatch::Dispatcher;
use crate::engine::Script;
use crate::error::Result;
use crate::launchkey::{self, BLINK_LED_STATUS, SOLID_LED_STATUS};
use crate::matchers::is_note_on;
use crate::message::{status, Message, PatternKey};
use crate::recorder::{PlaybackTask, Recorder, DEFAULT_MIN_LOOP_PERIOD_MS};
use crate::scheduler::Scheduler;

/// Transport buttons whose held state changes what a pad does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Control {
    Record,
    Play,
    Stop,
    PageUp,
}

/// Tunables for [`Surface`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceSettings {
    /// Color a pad blinks while it is being recorded.
    pub record_blink_color: u8,
    /// Color written to turn a pad LED off.
    pub off_color: u8,
    /// Silence between loop passes.
    pub loop_delay_ms: u64,
    /// Shortest time between the starts of two loop passes.
    pub min_loop_period_ms: u64,
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self {
            record_blink_color: 0x05,
            off_color: launchkey::LED_OFF_COLOR,
            loop_delay_ms: 0,
            min_loop_period_ms: DEFAULT_MIN_LOOP_PERIOD_MS,
        }
    }
}

/// State of the performance script.
pub struct Surface {
    daw: Box<dyn Daw>,
    recorder: Recorder,
    scheduler: Scheduler<PlaybackTask>,
    pressed: HashSet<Control>,
    /// Pad whose playback started while play was held.
    play_pad_press: Option<PatternKey>,
    /// A pad capture started or stopped during the current record hold.
    record_press_used: bool,
    settings: SurfaceSettings,
}

impl Surface {
    pub fn new(daw: Box<dyn Daw>, settings: SurfaceSettings) -> Self {
        Self {
            daw,
            recorder: Recorder::new().with_min_loop_period_ms(settings.min_loop_period_ms),
            scheduler: Scheduler::new(),
            pressed: HashSet::new(),
            play_pad_press: None,
            record_press_used: false,
            settings,
        }
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn scheduler(&self) -> &Scheduler<PlaybackTask> {
        &self.scheduler
    }

    pub fn daw(&self) -> &dyn Daw {
        self.daw.as_ref()
    }

    pub fn daw_mut(&mut self) -> &mut dyn Daw {
        self.daw.as_mut()
    }

    pub fn settings(&self) -> &SurfaceSettings {
        &self.settings
    }

    pub fn is_pressed(&self, control: Control) -> bool {
        self.pressed.contains(&control)
    }

    pub fn play_pad_press(&self) -> Option<PatternKey> {
        self.play_pad_press
    }

    /// Stop every playback. Returns how many were running.
    pub fn stop_all(&mut self) -> usize {
        self.recorder.stop_all(&mut self.scheduler)
    }

    fn set_pressed(&mut self, control: Control, on: bool) {
        if on {
            self.pressed.insert(control);
        } else {
            self.pressed.remove(&control);
        }
    }

    fn request_set_led(&mut self, led: u8, color: u8) {
        self.daw.dispatch_to_peers(SOLID_LED_STATUS, led, color);
    }

    fn request_blink_led(&mut self, led: u8, color: u8) {
        self.daw.dispatch_to_peers(BLINK_LED_STATUS, led, color);
    }

    /// Arm a capture for `key`, starting at `now_ms`, and blink its pad.
    pub fn start_pad_recording(&mut self, key: PatternKey, now_ms: u64) -> Result<()> {
        self.recorder
            .start_recording(key, now_ms, &mut self.scheduler)?;
        self.record_press_used = true;
        self.request_blink_led(key.data1, self.settings.record_blink_color);
        Ok(())
    }

    /// Replay the capture for `key` from the current time.
    pub fn play_pad(&mut self, key: PatternKey, looping: bool) -> Result<()> {
        self.recorder
            .play(key, looping, self.settings.loop_delay_ms, &mut self.scheduler)?;
        Ok(())
    }

    /// Seal the running capture and turn its pad off.
    pub fn stop_pad_recording(&mut self) {
        if let Some(key) = self.recorder.stop_recording() {
            self.request_set_led(key.data1, self.settings.off_color);
        }
    }

    // ------------------------------------------------------------------
    // Rule actions
    // ------------------------------------------------------------------

    fn on_record_button(&mut self, msg: &mut Message) -> anyhow::Result<()> {
        let on = msg.is_on();
        self.set_pressed(Control::Record, on);
        if on {
            self.record_press_used = false;
            if self.recorder.is_recording() {
                self.stop_pad_recording();
                self.record_press_used = true;
            }
        } else if !self.recorder.is_recording() && !self.record_press_used {
            self.daw.record();
        }
        msg.mark_handled();
        Ok(())
    }

    fn on_play_button(&mut self, msg: &mut Message) -> anyhow::Result<()> {
        let on = msg.is_on();
        self.set_pressed(Control::Play, on);
        if on {
            self.play_pad_press = None;
        } else if self.play_pad_press.is_none() {
            self.daw.toggle_play();
        }
        // Claimed so the button's CC never reaches the note output
        msg.mark_handled();
        Ok(())
    }

    fn on_stop_button(&mut self, msg: &mut Message) -> anyhow::Result<()> {
        let on = msg.is_on();
        self.set_pressed(Control::Stop, on);
        if !on {
            if self.recorder.is_recording() {
                self.stop_pad_recording();
            } else {
                self.stop_all();
            }
            self.daw.stop();
        }
        msg.mark_handled();
        Ok(())
    }

    fn on_page_up_button(&mut self, msg: &mut Message) -> anyhow::Result<()> {
        self.set_pressed(Control::PageUp, msg.is_on());
        msg.mark_handled();
        Ok(())
    }

    fn on_drum_pad(&mut self, msg: &mut Message) -> anyhow::Result<()> {
        if msg.masked_status() != status::NOTE_ON {
            return Ok(());
        }

        let recording = self.recorder.is_recording();
        if self.is_pressed(Control::Record) && !recording {
            self.start_pad_recording(msg.pattern_key(), msg.timestamp_ms)?;
            msg.mark_handled();
        } else if self.is_pressed(Control::PageUp) {
            if let Some(channel) = launchkey::channel_for_pad(msg.data1) {
                if channel < self.daw.channel_count() {
                    self.daw.set_active_channel(channel);
                }
            }
            msg.mark_handled();
        } else if !self.is_pressed(Control::Record) && !recording {
            let key = msg.pattern_key();
            let looping = self.is_pressed(Control::Play);
            // Pads without a recording fall through to the DAW
            if self.play_pad(key, looping).is_ok() {
                self.play_pad_press = Some(key);
                msg.mark_handled();
            }
        }
        Ok(())
    }

    fn on_note_down(&mut self, msg: &mut Message) -> anyhow::Result<()> {
        if self.recorder.recording_key() == Some(msg.pattern_key()) {
            return Ok(());
        }
        msg.userdata.active_channel = Some(self.daw.active_channel());
        self.recorder.on_data_event(msg.timestamp_ms, msg);
        Ok(())
    }
}

impl Script for Surface {
    fn install(rules: &mut Dispatcher<Self>) {
        rules
            .when(launchkey::is_record_button())
            .then(Surface::on_record_button);
        rules
            .when(launchkey::is_play_button())
            .then(Surface::on_play_button);
        rules
            .when(launchkey::is_page_down_button())
            .then(Surface::on_stop_button);
        rules
            .when(launchkey::is_page_up_button())
            .then(Surface::on_page_up_button);
        rules
            .when(launchkey::is_drum_pad())
            .then(Surface::on_drum_pad);
        rules
            .when(is_note_on())
            .then(Surface::on_note_down);
    }

    fn on_init(&mut self) {
        let off = self.settings.off_color;
        for pad in launchkey::drum_pad_ids() {
            self.request_set_led(pad, off);
        }
    }

    fn on_time(&mut self, now_ms: u64) {
        self.scheduler.observe(now_ms);
    }

    fn on_idle(&mut self, now_ms: u64) -> usize {
        let recorder = &mut self.recorder;
        let daw = &mut self.daw;
        self.scheduler.tick(now_ms, |sched, task| {
            if let Some(msg) = recorder.on_task_fired(&task, sched) {
                let channel = msg
                    .userdata
                    .active_channel
                    .unwrap_or_else(|| daw.active_channel());
                daw.play_note(channel, msg.data1, msg.data2);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        Select(usize),
        Note(usize, u8, u8),
        TogglePlay,
        Stop,
        Record,
        Peer(u8, u8, u8),
    }

    #[derive(Clone, Default)]
    struct FakeDaw {
        calls: Rc<RefCell<Vec<Call>>>,
        active: usize,
    }

    impl Daw for FakeDaw {
        fn active_channel(&self) -> usize {
            self.active
        }
        fn channel_count(&self) -> usize {
            12
        }
        fn set_active_channel(&mut self, index: usize) {
            self.active = index;
            self.calls.borrow_mut().push(Call::Select(index));
        }
        fn play_note(&mut self, channel: usize, note: u8, velocity: u8) {
            self.calls.borrow_mut().push(Call::Note(channel, note, velocity));
        }
        fn toggle_play(&mut self) {
            self.calls.borrow_mut().push(Call::TogglePlay);
        }
        fn stop(&mut self) {
            self.calls.borrow_mut().push(Call::Stop);
        }
        fn record(&mut self) {
            self.calls.borrow_mut().push(Call::Record);
        }
        fn send_sysex(&mut self, _bytes: &[u8]) {}
        fn dispatch_to_peers(&mut self, status: u8, data1: u8, data2: u8) {
            self.calls.borrow_mut().push(Call::Peer(status, data1, data2));
        }
    }

    fn engine() -> (Engine<Surface>, Rc<RefCell<Vec<Call>>>) {
        let daw = FakeDaw::default();
        let calls = daw.calls.clone();
        let surface = Surface::new(Box::new(daw), SurfaceSettings::default());
        (Engine::new(surface), calls)
    }

    fn take(calls: &Rc<RefCell<Vec<Call>>>) -> Vec<Call> {
        std::mem::take(&mut *calls.borrow_mut())
    }

    const REC: u8 = launchkey::RECORD_BUTTON;
    const PLAY: u8 = launchkey::PLAY_BUTTON;
    const PAGE_UP: u8 = launchkey::PAGE_UP_BUTTON;
    const PAGE_DOWN: u8 = launchkey::PAGE_DOWN_BUTTON;

    #[test]
    fn test_init_turns_pads_off() {
        let (mut engine, calls) = engine();
        engine.on_init();
        let calls = take(&calls);
        assert_eq!(calls.len(), 16);
        assert_eq!(calls[0], Call::Peer(0x99, 0x28, 0x00));
    }

    #[test]
    fn test_record_then_play_pad() {
        let (mut engine, calls) = engine();

        // Hold record, strike pad: capture armed, pad blinks
        assert!(engine.on_midi(0xB0, REC, 0x7F, 0).handled());
        assert!(engine.on_midi(0x99, 0x28, 0x7F, 0).handled());
        engine.on_midi(0xB0, REC, 0x00, 5);
        assert_eq!(take(&calls), vec![Call::Peer(0x9B, 0x28, 0x05)]);
        assert_eq!(
            engine.state().recorder().recording_key(),
            Some(PatternKey::new(0x99, 0x28))
        );

        // Keys played while recording are captured and still reach the DAW
        let out = engine.on_midi(0x90, 60, 100, 10);
        assert!(!out.handled());
        engine.on_midi(0x90, 64, 90, 130);

        // Record press stops the capture, release does not toggle DAW recording
        engine.on_midi(0xB0, REC, 0x7F, 200);
        engine.on_midi(0xB0, REC, 0x00, 210);
        assert_eq!(take(&calls), vec![Call::Peer(0x99, 0x28, 0x00)]);
        let rec = engine.state().recorder().recording(PatternKey::new(0x99, 0x28)).unwrap();
        let offsets: Vec<u64> = rec.events().iter().map(|e| e.offset_ms).collect();
        assert_eq!(offsets, vec![10, 130]);

        // Strike the pad: one-shot replay
        assert!(engine.on_midi(0x99, 0x28, 0x7F, 1000).handled());
        assert_eq!(engine.on_idle(1010), 1);
        assert_eq!(engine.on_idle(1200), 1);
        assert_eq!(
            take(&calls),
            vec![Call::Note(0, 60, 100), Call::Note(0, 64, 90)]
        );
        assert!(!engine.state().recorder().is_playing(PatternKey::new(0x99, 0x28)));
    }

    #[test]
    fn test_record_release_without_capture_toggles_daw() {
        let (mut engine, calls) = engine();
        engine.on_midi(0xB0, REC, 0x7F, 0);
        engine.on_midi(0xB0, REC, 0x00, 10);
        assert_eq!(take(&calls), vec![Call::Record]);
    }

    #[test]
    fn test_play_button_and_looping() {
        let (mut engine, calls) = engine();
        engine.on_midi(0xB0, REC, 0x7F, 0);
        engine.on_midi(0x99, 0x29, 0x7F, 0);
        engine.on_midi(0xB0, REC, 0x00, 0);
        engine.on_midi(0x90, 60, 100, 0);
        engine.on_midi(0x90, 62, 100, 100);
        engine.on_midi(0xB0, REC, 0x7F, 150);
        engine.on_midi(0xB0, REC, 0x00, 150);
        take(&calls);

        // Hold play and strike: loop, and the release does not toggle transport
        engine.on_midi(0xB0, PLAY, 0x7F, 1000);
        engine.on_midi(0x99, 0x29, 0x7F, 1000);
        engine.on_midi(0xB0, PLAY, 0x00, 1001);
        assert_eq!(engine.state().play_pad_press(), Some(PatternKey::new(0x99, 0x29)));

        // Period is 100ms with no delay: passes start at 1000, 1100, 1200, 1300
        assert_eq!(engine.on_idle(1350), 10);
        let notes = take(&calls);
        assert_eq!(notes.len(), 7, "{:?}", notes);
        assert_eq!(notes[0], Call::Note(0, 60, 100));
        assert_eq!(notes[1], Call::Note(0, 62, 100));

        // Page-down stops everything and the transport
        engine.on_midi(0xB0, PAGE_DOWN, 0x7F, 1400);
        engine.on_midi(0xB0, PAGE_DOWN, 0x00, 1400);
        assert_eq!(take(&calls), vec![Call::Stop]);
        assert!(engine.state().recorder().playing_keys().is_empty());
        assert_eq!(engine.on_idle(5000), 0);

        // A plain play tap toggles transport
        engine.on_midi(0xB0, PLAY, 0x7F, 6000);
        engine.on_midi(0xB0, PLAY, 0x00, 6001);
        assert_eq!(take(&calls), vec![Call::TogglePlay]);
    }

    #[test]
    fn test_page_up_selects_channel() {
        let (mut engine, calls) = engine();
        engine.on_midi(0xB0, PAGE_UP, 0x7F, 0);
        assert!(engine.on_midi(0x99, 0x2A, 0x7F, 0).handled());
        // Slot 15 is past the 12 channels the rack has
        assert!(engine.on_midi(0x99, 0x2F, 0x7F, 0).handled());
        engine.on_midi(0xB0, PAGE_UP, 0x00, 0);
        assert_eq!(take(&calls), vec![Call::Select(2)]);

        // Pads without a recording are left for the DAW
        assert!(!engine.on_midi(0x99, 0x2A, 0x7F, 10).handled());
    }

    #[test]
    fn test_pad_release_is_ignored() {
        let (mut engine, calls) = engine();
        engine.on_midi(0xB0, REC, 0x7F, 0);
        assert!(!engine.on_midi(0x89, 0x28, 0x00, 0).handled());
        assert!(!engine.state().recorder().is_recording());
        engine.on_midi(0xB0, REC, 0x00, 0);
        assert_eq!(take(&calls), vec![Call::Record]);
    }

    #[test]
    fn test_stop_while_recording_seals() {
        let (mut engine, calls) = engine();
        engine.on_midi(0xB0, REC, 0x7F, 0);
        engine.on_midi(0x99, 0x28, 0x7F, 0);
        engine.on_midi(0xB0, REC, 0x00, 0);
        engine.on_midi(0x90, 60, 100, 20);
        take(&calls);

        engine.on_midi(0xB0, PAGE_DOWN, 0x7F, 50);
        engine.on_midi(0xB0, PAGE_DOWN, 0x00, 60);
        assert_eq!(take(&calls), vec![Call::Peer(0x99, 0x28, 0x00), Call::Stop]);
        assert!(!engine.state().recorder().is_recording());
        assert!(engine.state().recorder().has_recording(PatternKey::new(0x99, 0x28)));
    }
}
