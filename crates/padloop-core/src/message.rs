//! MIDI message model for the dispatch pass.
//!
//! A [`Message`] is built once per inbound host event and flows by
//! exclusive borrow through every matching rule of a single dispatch pass.
//! The raw bytes are never rewritten; rules annotate the message through
//! the [`Message::handled`] flag and the fixed-shape [`Userdata`].

use std::fmt;

/// Channel-voice status nibbles (channel bits cleared).
pub mod status {
    /// Note off.
    pub const NOTE_OFF: u8 = 0x80;
    /// Note on.
    pub const NOTE_ON: u8 = 0x90;
    /// Polyphonic aftertouch.
    pub const POLY_AFTERTOUCH: u8 = 0xA0;
    /// Control change.
    pub const CONTROL_CHANGE: u8 = 0xB0;
    /// Program change.
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    /// Channel aftertouch.
    pub const CHANNEL_AFTERTOUCH: u8 = 0xD0;
    /// Pitch bend.
    pub const PITCH_BEND: u8 = 0xE0;
}

/// Identity of one physical control: `(status, data1)`.
///
/// Recordings and playbacks are keyed by it, so a pad on channel 10
/// (`0x99`) and the same pad id on another channel are distinct keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatternKey {
    pub status: u8,
    pub data1: u8,
}

impl PatternKey {
    pub const fn new(status: u8, data1: u8) -> Self {
        Self { status, data1 }
    }
}

impl From<(u8, u8)> for PatternKey {
    fn from((status, data1): (u8, u8)) -> Self {
        Self::new(status, data1)
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:02X}, {:02X})", self.status, self.data1)
    }
}

/// Side-channel annotations a rule may attach for later rules.
///
/// The only value that travels between stages is the channel-rack slot a
/// note was played from, so it gets a named field instead of a map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Userdata {
    /// Channel-rack index active when the note was captured.
    pub active_channel: Option<usize>,
}

/// One inbound MIDI event plus its dispatch annotations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    /// Host-supplied monotonic timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Advisory flag; the dispatcher never reads it.
    pub handled: bool,
    pub userdata: Userdata,
}

impl Message {
    /// Create a message with a zero timestamp.
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self::at(status, data1, data2, 0)
    }

    /// Create a message stamped with the host time it arrived at.
    pub fn at(status: u8, data1: u8, data2: u8, timestamp_ms: u64) -> Self {
        Self {
            status,
            data1,
            data2,
            timestamp_ms,
            handled: false,
            userdata: Userdata::default(),
        }
    }

    /// Build a message from raw bytes. Missing data bytes read as zero and
    /// anything past the third byte is ignored.
    pub fn from_bytes(bytes: &[u8], timestamp_ms: u64) -> Option<Self> {
        let status = *bytes.first()?;
        let data1 = bytes.get(1).copied().unwrap_or(0);
        let data2 = bytes.get(2).copied().unwrap_or(0);
        Some(Self::at(status, data1, data2, timestamp_ms))
    }

    /// Status with the channel nibble cleared.
    #[inline]
    pub fn masked_status(&self) -> u8 {
        self.status & 0xF0
    }

    /// Channel nibble (0-15).
    #[inline]
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    /// The control this message came from.
    pub fn pattern_key(&self) -> PatternKey {
        PatternKey::new(self.status, self.data1)
    }

    /// A button or pad counts as "on" when it is not a note-off and the
    /// value byte is non-zero.
    pub fn is_on(&self) -> bool {
        self.masked_status() != status::NOTE_OFF && self.data2 > 0
    }

    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        [self.status, self.data1, self.data2]
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:02X} {:02X} {:02X} @{}ms]",
            self.status, self.data1, self.data2, self.timestamp_ms
        )?;
        if self.handled {
            write!(f, " handled")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_status_and_channel() {
        let msg = Message::new(0x99, 0x28, 0x7F);
        assert_eq!(msg.masked_status(), status::NOTE_ON);
        assert_eq!(msg.channel(), 9);
        // Raw fields stay untouched
        assert_eq!(msg.status, 0x99);
    }

    #[test]
    fn test_is_on() {
        assert!(Message::new(0xB0, 0x75, 0x7F).is_on());
        assert!(!Message::new(0xB0, 0x75, 0x00).is_on());
        assert!(!Message::new(0x89, 0x28, 0x40).is_on());
        assert!(!Message::new(0x99, 0x28, 0x00).is_on());
    }

    #[test]
    fn test_from_bytes() {
        let msg = Message::from_bytes(&[0x90, 60, 100], 42).unwrap();
        assert_eq!(msg.to_bytes(), [0x90, 60, 100]);
        assert_eq!(msg.timestamp_ms, 42);

        let short = Message::from_bytes(&[0xC0, 5], 0).unwrap();
        assert_eq!(short.data2, 0);

        assert!(Message::from_bytes(&[], 0).is_none());
    }

    #[test]
    fn test_out_of_range_bytes_accepted() {
        let msg = Message::new(0x12, 0xFF, 0xFF);
        assert_eq!(msg.data1, 0xFF);
        assert_eq!(msg.masked_status(), 0x10);
    }

    #[test]
    fn test_mark_handled() {
        let mut msg = Message::new(0x90, 60, 100);
        assert!(!msg.is_handled());
        msg.mark_handled();
        assert!(msg.is_handled());
        assert!(msg.to_string().ends_with("handled"));
    }

    #[test]
    fn test_pattern_key() {
        let msg = Message::new(0x99, 0x28, 0x7F);
        assert_eq!(msg.pattern_key(), PatternKey::from((0x99, 0x28)));
        assert_eq!(msg.pattern_key().to_string(), "(99, 28)");
    }
}
