//! The host DAW as seen by control-surface scripts.
//!
//! Scripts never talk to hardware or the sequencer directly; they go
//! through [`Daw`]. The host supplies a real implementation, tests supply a
//! fake, and [`NullDaw`] just logs.

/// Operations a control-surface script may request from the host.
pub trait Daw {
    /// Index of the selected channel-rack slot.
    fn active_channel(&self) -> usize;

    /// Number of channel-rack slots.
    fn channel_count(&self) -> usize;

    /// Select a channel-rack slot.
    fn set_active_channel(&mut self, index: usize);

    /// Play a note on a channel-rack slot.
    fn play_note(&mut self, channel: usize, note: u8, velocity: u8);

    /// Start or pause transport playback.
    fn toggle_play(&mut self);

    /// Stop the transport.
    fn stop(&mut self);

    /// Toggle transport recording.
    fn record(&mut self);

    /// Send raw bytes (SysEx or channel-voice) to the linked device.
    fn send_sysex(&mut self, bytes: &[u8]);

    /// Relay a three-byte message to the cooperating scripts.
    fn dispatch_to_peers(&mut self, status: u8, data1: u8, data2: u8);
}

/// Pack a peer message the way the host relays it: `status | data1 << 8 | data2 << 16`.
pub fn pack_peer_message(status: u8, data1: u8, data2: u8) -> u32 {
    status as u32 | (data1 as u32) << 8 | (data2 as u32) << 16
}

/// Inverse of [`pack_peer_message`].
pub fn unpack_peer_message(packed: u32) -> (u8, u8, u8) {
    (
        (packed & 0xFF) as u8,
        ((packed >> 8) & 0xFF) as u8,
        ((packed >> 16) & 0xFF) as u8,
    )
}

/// DAW that only logs (useful for testing or when no output is configured).
#[derive(Debug, Clone)]
pub struct NullDaw {
    active_channel: usize,
    channel_count: usize,
}

impl NullDaw {
    pub fn new(channel_count: usize) -> Self {
        Self {
            active_channel: 0,
            channel_count,
        }
    }
}

impl Default for NullDaw {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Daw for NullDaw {
    fn active_channel(&self) -> usize {
        self.active_channel
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn set_active_channel(&mut self, index: usize) {
        log::debug!("DAW select channel {}", index);
        self.active_channel = index;
    }

    fn play_note(&mut self, channel: usize, note: u8, velocity: u8) {
        log::debug!("DAW note: ch={} note={} vel={}", channel, note, velocity);
    }

    fn toggle_play(&mut self) {
        log::debug!("DAW toggle play");
    }

    fn stop(&mut self) {
        log::debug!("DAW stop");
    }

    fn record(&mut self) {
        log::debug!("DAW record");
    }

    fn send_sysex(&mut self, bytes: &[u8]) {
        log::debug!("DAW sysex: {:02X?}", bytes);
    }

    fn dispatch_to_peers(&mut self, status: u8, data1: u8, data2: u8) {
        log::debug!("DAW relay: {:02X} {:02X} {:02X}", status, data1, data2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_packing() {
        let packed = pack_peer_message(0x99, 0x28, 0x05);
        assert_eq!(packed, 0x05_28_99);
        assert_eq!(unpack_peer_message(packed), (0x99, 0x28, 0x05));
    }

    #[test]
    fn test_null_daw_tracks_channel() {
        let mut daw = NullDaw::new(8);
        assert_eq!(daw.channel_count(), 8);
        daw.set_active_channel(3);
        assert_eq!(daw.active_channel(), 3);
        daw.play_note(3, 60, 100);
    }
}
