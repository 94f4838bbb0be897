//! RTP payload codecs
//!
//! The codecs a plain RTP/AVP peer can negotiate without external libraries:
//! G.711 μ-law and A-law (8 kHz mono) and uncompressed big-endian L16.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AudioError, AudioResult};
use crate::types::AudioFormat;

pub mod g711;

/// Payload encodings supported on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadCodec {
    /// G.711 μ-law
    Pcmu,
    /// G.711 A-law
    Pcma,
    /// Linear 16-bit big-endian PCM, any rate and channel count
    L16,
}

impl PayloadCodec {
    /// Encoding name as used in `a=rtpmap`
    pub fn sdp_name(&self) -> &'static str {
        match self {
            PayloadCodec::Pcmu => "PCMU",
            PayloadCodec::Pcma => "PCMA",
            PayloadCodec::L16 => "L16",
        }
    }

    /// Look up a codec by its `a=rtpmap` encoding name (case-insensitive)
    pub fn from_sdp_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("PCMU") {
            Some(PayloadCodec::Pcmu)
        } else if name.eq_ignore_ascii_case("PCMA") {
            Some(PayloadCodec::Pcma)
        } else if name.eq_ignore_ascii_case("L16") {
            Some(PayloadCodec::L16)
        } else {
            None
        }
    }

    /// Codec and format implied by a static RTP/AVP payload type (RFC 3551)
    pub fn from_static_payload_type(payload_type: u8) -> Option<(Self, AudioFormat)> {
        match payload_type {
            0 => Some((PayloadCodec::Pcmu, AudioFormat::new(8000, 1))),
            8 => Some((PayloadCodec::Pcma, AudioFormat::new(8000, 1))),
            10 => Some((PayloadCodec::L16, AudioFormat::new(44100, 2))),
            11 => Some((PayloadCodec::L16, AudioFormat::new(44100, 1))),
            _ => None,
        }
    }

    /// Check whether this codec can carry the given format
    pub fn supports(&self, format: &AudioFormat) -> bool {
        match self {
            PayloadCodec::Pcmu | PayloadCodec::Pcma => {
                format.sample_rate == 8000 && format.channels == 1
            }
            PayloadCodec::L16 => format.sample_rate > 0 && format.channels > 0,
        }
    }

    /// Encoded bytes per sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PayloadCodec::Pcmu | PayloadCodec::Pcma => 1,
            PayloadCodec::L16 => 2,
        }
    }

    /// Append the encoded form of `samples` to `out`
    pub fn encode(&self, samples: &[i16], out: &mut Vec<u8>) {
        match self {
            PayloadCodec::Pcmu => g711::encode_mu_law(samples, out),
            PayloadCodec::Pcma => g711::encode_a_law(samples, out),
            PayloadCodec::L16 => {
                out.reserve(samples.len() * 2);
                for sample in samples {
                    out.extend_from_slice(&sample.to_be_bytes());
                }
            }
        }
    }

    /// Append the decoded samples of `payload` to `out`
    pub fn decode(&self, payload: &[u8], out: &mut Vec<i16>) -> AudioResult<()> {
        match self {
            PayloadCodec::Pcmu => g711::decode_mu_law(payload, out),
            PayloadCodec::Pcma => g711::decode_a_law(payload, out),
            PayloadCodec::L16 => {
                if payload.len() % 2 != 0 {
                    return Err(AudioError::invalid_data(format!(
                        "L16 payload has odd length {}",
                        payload.len()
                    )));
                }
                out.extend(
                    payload
                        .chunks_exact(2)
                        .map(|pair| i16::from_be_bytes([pair[0], pair[1]])),
                );
            }
        }
        Ok(())
    }
}

impl fmt::Display for PayloadCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sdp_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_payload_types() {
        assert_eq!(
            PayloadCodec::from_static_payload_type(0),
            Some((PayloadCodec::Pcmu, AudioFormat::new(8000, 1)))
        );
        assert_eq!(
            PayloadCodec::from_static_payload_type(8).map(|(c, _)| c),
            Some(PayloadCodec::Pcma)
        );
        assert!(PayloadCodec::from_static_payload_type(96).is_none());
    }

    #[test]
    fn test_sdp_names() {
        assert_eq!(PayloadCodec::from_sdp_name("pcmu"), Some(PayloadCodec::Pcmu));
        assert_eq!(PayloadCodec::from_sdp_name("L16"), Some(PayloadCodec::L16));
        assert_eq!(PayloadCodec::from_sdp_name("opus"), None);
    }

    #[test]
    fn test_g711_restricted_to_narrowband_mono() {
        assert!(PayloadCodec::Pcmu.supports(&AudioFormat::new(8000, 1)));
        assert!(!PayloadCodec::Pcma.supports(&AudioFormat::new(48000, 1)));
        assert!(PayloadCodec::L16.supports(&AudioFormat::new(48000, 2)));
    }

    #[test]
    fn test_l16_is_big_endian() {
        let mut encoded = Vec::new();
        PayloadCodec::L16.encode(&[0x0102, -2], &mut encoded);
        assert_eq!(encoded, vec![0x01, 0x02, 0xFF, 0xFE]);

        let mut decoded = Vec::new();
        PayloadCodec::L16.decode(&encoded, &mut decoded).unwrap();
        assert_eq!(decoded, vec![0x0102, -2]);
    }

    #[test]
    fn test_l16_rejects_odd_payload() {
        let mut decoded = Vec::new();
        assert!(PayloadCodec::L16.decode(&[1, 2, 3], &mut decoded).is_err());
    }
}
