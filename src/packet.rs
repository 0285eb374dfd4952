//! Control packet exchanged between the sender and the receiver.
//!
//! Layout (13 bytes): six little-endian `u16` channel readings followed by
//! one bit-field byte. Bits 0..6 carry digital outputs, bit 7 selects the
//! high rate. Frames of any other length are not control packets.

pub const CHANNEL_COUNT: usize = 6;
pub const DIGITAL_OUTPUTS: usize = 7;
pub const RATE_BIT: u8 = 0x80;
pub const PACKET_LEN: usize = CHANNEL_COUNT * 2 + 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlPacket {
    pub channels: [u16; CHANNEL_COUNT],
    pub digital: u8,
}

impl ControlPacket {
    pub fn new(channels: [u16; CHANNEL_COUNT], digital: u8) -> Self {
        ControlPacket { channels, digital }
    }

    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut frame = [0u8; PACKET_LEN];
        for (i, value) in self.channels.iter().enumerate() {
            frame[i * 2..i * 2 + 2].copy_from_slice(&value.to_le_bytes());
        }
        frame[PACKET_LEN - 1] = self.digital;
        frame
    }

    /// Returns `None` for any frame whose length is not `PACKET_LEN`.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() != PACKET_LEN {
            return None;
        }
        let mut channels = [0u16; CHANNEL_COUNT];
        for (i, value) in channels.iter_mut().enumerate() {
            *value = u16::from_le_bytes([frame[i * 2], frame[i * 2 + 1]]);
        }
        Some(ControlPacket {
            channels,
            digital: frame[PACKET_LEN - 1],
        })
    }

    pub fn is_high_rate(&self) -> bool {
        self.digital & RATE_BIT != 0
    }

    pub fn output(&self, index: usize) -> bool {
        index < DIGITAL_OUTPUTS && self.digital & (1 << index) != 0
    }

    pub fn set_output(&mut self, index: usize, on: bool) {
        if index >= DIGITAL_OUTPUTS {
            return;
        }
        if on {
            self.digital |= 1 << index;
        } else {
            self.digital &= !(1 << index);
        }
    }

    pub fn set_high_rate(&mut self, on: bool) {
        if on {
            self.digital |= RATE_BIT;
        } else {
            self.digital &= !RATE_BIT;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_length_is_fixed() {
        let packet = ControlPacket::new([0, 1, 2, 3, 4, 4095], 0x81);
        assert_eq!(packet.encode().len(), 13);
    }

    #[test]
    fn test_decode_reads_little_endian_channels() {
        let mut frame = [0u8; PACKET_LEN];
        frame[0] = 0xFF;
        frame[1] = 0x0F;
        frame[12] = 0x83;
        let packet = ControlPacket::decode(&frame).unwrap();
        assert_eq!(packet.channels[0], 4095);
        assert_eq!(packet.channels[1], 0);
        assert!(packet.is_high_rate());
        assert!(packet.output(0));
        assert!(packet.output(1));
        assert!(!packet.output(2));
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(ControlPacket::decode(&[]).is_none());
        assert!(ControlPacket::decode(&[0u8; PACKET_LEN - 1]).is_none());
        assert!(ControlPacket::decode(&[0u8; PACKET_LEN + 1]).is_none());
    }

    #[test]
    fn test_output_bits() {
        let mut packet = ControlPacket::default();
        packet.set_output(2, true);
        packet.set_high_rate(true);
        assert_eq!(packet.digital, 0x84);
        packet.set_output(2, false);
        assert_eq!(packet.digital, RATE_BIT);

        // the rate bit is not a digital output
        packet.set_output(7, true);
        assert!(!packet.output(7));
        assert_eq!(packet.digital, RATE_BIT);
    }
}
