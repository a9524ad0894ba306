//! Novation Launchkey Mini Mk3 device profile.
//!
//! Control ids follow the drum layout the keyboard powers up in. The
//! device keeps separate light state per layout, so lighting the drum
//! layout never disturbs the session layout.
//!
//! Reference: Novation Launchkey Programmer's Reference Manual.

use crate::matchers::{Matcher, MidiHas};

/// Exit DAW mode (falls back to the drum layout).
pub const CMD_PREAMBLE: [u8; 3] = [0x9F, 0x0C, 0x00];

/// Status byte that sets a pad LED to a solid color.
pub const SOLID_LED_STATUS: u8 = 0x99;
/// Status byte that makes a pad LED blink.
pub const BLINK_LED_STATUS: u8 = 0x9B;

/// Color value used by [`LedCommandBuilder::light_on`].
pub const LED_ON_COLOR: u8 = 0x77;
/// Color value that turns an LED off.
pub const LED_OFF_COLOR: u8 = 0x00;

/// Pad note-on status (channel 10).
pub const DRUM_PAD_DOWN_STATUS: u8 = 0x99;
/// Pad note-off status (channel 10).
pub const DRUM_PAD_UP_STATUS: u8 = 0x89;
/// Zero-based MIDI channel the pads send on.
pub const DRUM_PAD_MIDI_CHANNEL: u8 = 9;

/// Pad ids, top row first, left to right.
pub const DRUM_PAD_IDS: [[u8; 8]; 2] = [
    [0x28, 0x29, 0x2A, 0x2B, 0x30, 0x31, 0x32, 0x33],
    [0x24, 0x25, 0x26, 0x27, 0x2C, 0x2D, 0x2E, 0x2F],
];

/// CC numbers of the eight encoders.
pub const ENCODER_IDS: [u8; 8] = [0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C];

pub const RECORD_BUTTON: u8 = 0x75;
pub const PLAY_BUTTON: u8 = 0x73;
pub const PAGE_UP_BUTTON: u8 = 0x68;
pub const PAGE_DOWN_BUTTON: u8 = 0x69;

/// Every pad id in channel order.
pub fn drum_pad_ids() -> impl Iterator<Item = u8> {
    DRUM_PAD_IDS.into_iter().flatten()
}

/// Channel-rack slot a pad selects: top row 0-7, bottom row 8-15.
pub fn channel_for_pad(pad_id: u8) -> Option<usize> {
    drum_pad_ids().position(|id| id == pad_id)
}

/// Encoder index (0-7) for a CC number.
pub fn encoder_index(cc: u8) -> Option<usize> {
    ENCODER_IDS.iter().position(|&id| id == cc)
}

fn button(cc: u8) -> Matcher {
    MidiHas::new().status_range(0xB0, 0xBF).data1(cc).build()
}

pub fn is_record_button() -> Matcher {
    button(RECORD_BUTTON)
}

pub fn is_play_button() -> Matcher {
    button(PLAY_BUTTON)
}

pub fn is_page_up_button() -> Matcher {
    button(PAGE_UP_BUTTON)
}

pub fn is_page_down_button() -> Matcher {
    button(PAGE_DOWN_BUTTON)
}

/// Any pad press or release.
pub fn is_drum_pad() -> Matcher {
    MidiHas::new()
        .status_in([DRUM_PAD_UP_STATUS, DRUM_PAD_DOWN_STATUS])
        .data1_range(0x24, 0x33)
        .build()
}

/// Matcher for encoder `index` (0-7).
pub fn is_encoder(index: usize) -> Option<Matcher> {
    ENCODER_IDS.get(index).map(|&cc| button(cc))
}

/// Per-pad press matchers, shaped like [`DRUM_PAD_IDS`].
pub fn drum_pad_down_matchers() -> Vec<Vec<Matcher>> {
    pad_grid(DRUM_PAD_DOWN_STATUS)
}

/// Per-pad release matchers, shaped like [`DRUM_PAD_IDS`].
pub fn drum_pad_up_matchers() -> Vec<Vec<Matcher>> {
    pad_grid(DRUM_PAD_UP_STATUS)
}

fn pad_grid(status: u8) -> Vec<Vec<Matcher>> {
    DRUM_PAD_IDS
        .iter()
        .map(|row| {
            row.iter()
                .map(|&id| MidiHas::new().status(status).data1(id).build())
                .collect()
        })
        .collect()
}

/// Builds the byte sequence that updates pad LEDs.
///
/// ```
/// use padloop_core::launchkey::LedCommandBuilder;
///
/// let bytes = LedCommandBuilder::new().light_off(0x28).build(false);
/// assert_eq!(bytes, vec![0x99, 0x28, 0x00]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LedCommandBuilder {
    lights_off: Vec<u8>,
    lights_on: Vec<u8>,
    colors: Vec<(u8, u8)>,
    blinking: Vec<(u8, u8)>,
}

impl LedCommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn light_off(mut self, led_id: u8) -> Self {
        self.lights_off.push(led_id);
        self
    }

    pub fn light_on(mut self, led_id: u8) -> Self {
        self.lights_on.push(led_id);
        self
    }

    pub fn light_color(mut self, led_id: u8, color: u8) -> Self {
        self.colors.push((led_id, color));
        self
    }

    pub fn blinking_light(mut self, led_id: u8, color: u8) -> Self {
        self.blinking.push((led_id, color));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.lights_off.is_empty()
            && self.lights_on.is_empty()
            && self.colors.is_empty()
            && self.blinking.is_empty()
    }

    /// Encode the queued changes. In DAW mode the preamble goes first.
    /// An empty builder encodes to nothing.
    pub fn build(&self, daw_mode: bool) -> Vec<u8> {
        let mut cmd = Vec::new();
        if self.is_empty() {
            return cmd;
        }

        if daw_mode {
            cmd.extend_from_slice(&CMD_PREAMBLE);
        }
        for &led in &self.lights_off {
            cmd.extend_from_slice(&[SOLID_LED_STATUS, led, LED_OFF_COLOR]);
        }
        for &led in &self.lights_on {
            cmd.extend_from_slice(&[SOLID_LED_STATUS, led, LED_ON_COLOR]);
        }
        for &(led, color) in &self.colors {
            cmd.extend_from_slice(&[SOLID_LED_STATUS, led, color]);
        }
        for &(led, color) in &self.blinking {
            cmd.extend_from_slice(&[BLINK_LED_STATUS, led, color]);
        }
        cmd
    }
}
