//! RTP integration
//!
//! RTP packet encoding/decoding (RFC 3550), outbound packet numbering and
//! inbound sequence tracking.

use crate::error::{AudioError, AudioResult};

/// Fixed RTP header length without CSRCs
pub const RTP_HEADER_LEN: usize = 12;

/// RTP packet structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Parse RTP packet from raw data.
    ///
    /// CSRC lists, header extensions and padding are skipped.
    pub fn parse(data: &[u8]) -> AudioResult<Self> {
        if data.len() < RTP_HEADER_LEN {
            return Err(AudioError::invalid_data("RTP packet too short"));
        }

        let version = (data[0] >> 6) & 0x03;
        if version != 2 {
            return Err(AudioError::invalid_data(format!("unsupported RTP version {}", version)));
        }
        let padding = (data[0] & 0x20) != 0;
        let extension = (data[0] & 0x10) != 0;
        let csrc_count = (data[0] & 0x0F) as usize;
        let marker = (data[1] & 0x80) != 0;
        let payload_type = data[1] & 0x7F;
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = RTP_HEADER_LEN + csrc_count * 4;
        if extension {
            if data.len() < offset + 4 {
                return Err(AudioError::invalid_data("RTP extension header truncated"));
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
        }

        let mut end = data.len();
        if padding {
            let pad = *data.last().unwrap_or(&0) as usize;
            if pad == 0 || pad > end.saturating_sub(offset) {
                return Err(AudioError::invalid_data("invalid RTP padding"));
            }
            end -= pad;
        }
        if offset > end {
            return Err(AudioError::invalid_data("RTP header longer than packet"));
        }

        Ok(Self {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            payload: data[offset..end].to_vec(),
        })
    }

    /// Serialize RTP packet to raw data
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(RTP_HEADER_LEN + self.payload.len());

        // V=2, no padding, no extension, no CSRCs
        data.push(0x80);
        data.push((if self.marker { 0x80 } else { 0 }) | (self.payload_type & 0x7F));
        data.extend_from_slice(&self.sequence_number.to_be_bytes());
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&self.ssrc.to_be_bytes());
        data.extend_from_slice(&self.payload);

        data
    }
}

/// Numbers outbound packets of one RTP stream
#[derive(Debug, Clone)]
pub struct RtpPacketizer {
    payload_type: u8,
    ssrc: u32,
    sequence_number: u16,
    timestamp: u32,
    first: bool,
}

impl RtpPacketizer {
    /// Create a packetizer. Random initial values are the caller's choice.
    pub fn new(payload_type: u8, ssrc: u32, initial_sequence: u16, initial_timestamp: u32) -> Self {
        Self {
            payload_type,
            ssrc,
            sequence_number: initial_sequence,
            timestamp: initial_timestamp,
            first: true,
        }
    }

    /// Wrap an encoded payload covering `frames` sample periods
    pub fn packetize(&mut self, payload: Vec<u8>, frames: u32) -> RtpPacket {
        let packet = RtpPacket {
            marker: self.first,
            payload_type: self.payload_type,
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
            payload,
        };

        self.first = false;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(frames);

        packet
    }

    /// SSRC of this stream
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }
}

/// Rejects duplicate and late inbound packets by sequence number.
///
/// Tracking is per source: a packet from a new SSRC restarts it.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    ssrc: Option<u32>,
    highest: Option<u16>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `sequence` is newer than anything seen so far from
    /// `ssrc` (modulo 2^16, RFC 3550 style half-window comparison).
    pub fn accept(&mut self, ssrc: u32, sequence: u16) -> bool {
        if self.ssrc != Some(ssrc) {
            self.ssrc = Some(ssrc);
            self.highest = Some(sequence);
            return true;
        }
        match self.highest {
            None => {
                self.highest = Some(sequence);
                true
            }
            Some(highest) => {
                let delta = sequence.wrapping_sub(highest);
                if delta != 0 && delta < 0x8000 {
                    self.highest = Some(sequence);
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_then_parse() {
        let packet = RtpPacket {
            marker: true,
            payload_type: 0,
            sequence_number: 0xBEEF,
            timestamp: 160,
            ssrc: 0x1234_5678,
            payload: vec![0xFF; 160],
        };
        let parsed = RtpPacket::parse(&packet.serialize()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_parse_skips_csrc_and_extension() {
        let mut data = vec![0x91, 0x08, 0x00, 0x01, 0, 0, 0, 10, 0, 0, 0, 1];
        data.extend_from_slice(&[0xAA; 4]); // one CSRC
        data.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01]); // extension, one word
        data.extend_from_slice(&[0x00; 4]);
        data.extend_from_slice(&[1, 2, 3]);

        let parsed = RtpPacket::parse(&data).unwrap();
        assert_eq!(parsed.payload_type, 8);
        assert_eq!(parsed.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_strips_padding() {
        let mut data = vec![0xA0, 0x00, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        data.extend_from_slice(&[7, 7, 0, 2]);
        let parsed = RtpPacket::parse(&data).unwrap();
        assert_eq!(parsed.payload, vec![7, 7]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RtpPacket::parse(&[0x80, 0x00]).is_err());
        assert!(RtpPacket::parse(&[0x40; 12]).is_err());
    }

    #[test]
    fn test_packetizer_advances_sequence_and_timestamp() {
        let mut packetizer = RtpPacketizer::new(0, 42, u16::MAX, 1000);
        let first = packetizer.packetize(vec![0; 160], 160);
        let second = packetizer.packetize(vec![0; 160], 160);

        assert!(first.marker);
        assert!(!second.marker);
        assert_eq!(first.sequence_number, u16::MAX);
        assert_eq!(second.sequence_number, 0);
        assert_eq!(second.timestamp, 1160);
    }

    #[test]
    fn test_sequence_tracker_handles_wraparound() {
        let mut tracker = SequenceTracker::new();
        assert!(tracker.accept(1, 65534));
        assert!(tracker.accept(1, 65535));
        assert!(tracker.accept(1, 0));
        assert!(!tracker.accept(1, 65535));
        assert!(!tracker.accept(1, 0));
        assert!(tracker.accept(1, 5));
    }

    #[test]
    fn test_sequence_tracker_restarts_on_new_ssrc() {
        let mut tracker = SequenceTracker::new();
        assert!(tracker.accept(111, 100));

        // A restarted sender with a sequence base behind the old one
        assert!(tracker.accept(222, 40000));
        for seq in 40001..40050 {
            assert!(tracker.accept(222, seq));
        }
        assert!(!tracker.accept(222, 40010));
    }
}
