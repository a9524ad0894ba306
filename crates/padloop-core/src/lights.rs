//! Lights script: the DAW-port peer that turns relayed LED requests into
//! device commands.

use crate::daw::Daw;
use crate::dispatch::Dispatcher;
use crate::engine::Script;
use crate::launchkey::{LedCommandBuilder, BLINK_LED_STATUS, SOLID_LED_STATUS};
use crate::matchers::MidiHas;
use crate::message::Message;

pub struct Lights {
    daw: Box<dyn Daw>,
    daw_mode: bool,
}

impl Lights {
    pub fn new(daw: Box<dyn Daw>, daw_mode: bool) -> Self {
        Self { daw, daw_mode }
    }

    pub fn daw_mode(&self) -> bool {
        self.daw_mode
    }

    fn send(&mut self, leds: LedCommandBuilder, msg: &mut Message) -> anyhow::Result<()> {
        let bytes = leds.build(self.daw_mode);
        log::trace!("[LIGHTS] {:02X?}", bytes);
        self.daw.send_sysex(&bytes);
        msg.mark_handled();
        Ok(())
    }

    fn on_set_led(&mut self, msg: &mut Message) -> anyhow::Result<()> {
        let leds = LedCommandBuilder::new().light_color(msg.data1, msg.data2);
        self.send(leds, msg)
    }

    fn on_blink_led(&mut self, msg: &mut Message) -> anyhow::Result<()> {
        let leds = LedCommandBuilder::new().blinking_light(msg.data1, msg.data2);
        self.send(leds, msg)
    }
}

impl Script for Lights {
    fn install(rules: &mut Dispatcher<Self>) {
        rules
            .when(MidiHas::new().status(SOLID_LED_STATUS))
            .then(Lights::on_set_led);
        rules
            .when(MidiHas::new().status(BLINK_LED_STATUS))
            .then(Lights::on_blink_led);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct SysexLog(Rc<RefCell<Vec<Vec<u8>>>>);

    impl Daw for SysexLog {
        fn active_channel(&self) -> usize {
            0
        }
        fn channel_count(&self) -> usize {
            0
        }
        fn set_active_channel(&mut self, _index: usize) {}
        fn play_note(&mut self, _channel: usize, _note: u8, _velocity: u8) {}
        fn toggle_play(&mut self) {}
        fn stop(&mut self) {}
        fn record(&mut self) {}
        fn send_sysex(&mut self, bytes: &[u8]) {
            self.0.borrow_mut().push(bytes.to_vec());
        }
        fn dispatch_to_peers(&mut self, _status: u8, _data1: u8, _data2: u8) {}
    }

    fn lights(daw_mode: bool) -> (Engine<Lights>, Rc<RefCell<Vec<Vec<u8>>>>) {
        let daw = SysexLog::default();
        let sent = daw.0.clone();
        (Engine::new(Lights::new(Box::new(daw), daw_mode)), sent)
    }

    #[test]
    fn test_solid_and_blink() {
        let (mut engine, sent) = lights(true);
        assert!(engine.on_midi(0x99, 0x28, 0x05, 0).handled());
        assert!(engine.on_midi(0x9B, 0x29, 0x05, 0).handled());
        assert_eq!(
            *sent.borrow(),
            vec![
                vec![0x9F, 0x0C, 0x00, 0x99, 0x28, 0x05],
                vec![0x9F, 0x0C, 0x00, 0x9B, 0x29, 0x05],
            ]
        );
    }

    #[test]
    fn test_without_daw_mode() {
        let (mut engine, sent) = lights(false);
        engine.on_midi(0x99, 0x30, 0x00, 0);
        assert!(!engine.on_midi(0x90, 0x30, 0x10, 0).handled());
        assert_eq!(*sent.borrow(), vec![vec![0x99, 0x30, 0x00]]);
    }
}
