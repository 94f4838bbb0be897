//! G.711 companding (ITU-T G.711), μ-law (PCMU) and A-law (PCMA)
//!
//! Stateless sample-by-sample conversion between 16-bit linear PCM and
//! 8-bit companded bytes.

const MU_LAW_BIAS: i32 = 0x84;
const MU_LAW_CLIP: i32 = 32635;

/// Upper bound of each A-law segment, on 13-bit magnitudes
const A_LAW_SEGMENT_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

/// Encode a block of samples as μ-law
pub fn encode_mu_law(samples: &[i16], out: &mut Vec<u8>) {
    out.extend(samples.iter().map(|s| linear_to_mu_law(*s)));
}

/// Decode a block of μ-law bytes
pub fn decode_mu_law(data: &[u8], out: &mut Vec<i16>) {
    out.extend(data.iter().map(|b| mu_law_to_linear(*b)));
}

/// Encode a block of samples as A-law
pub fn encode_a_law(samples: &[i16], out: &mut Vec<u8>) {
    out.extend(samples.iter().map(|s| linear_to_a_law(*s)));
}

/// Decode a block of A-law bytes
pub fn decode_a_law(data: &[u8], out: &mut Vec<i16>) {
    out.extend(data.iter().map(|b| a_law_to_linear(*b)));
}

/// Convert linear PCM sample to μ-law
pub fn linear_to_mu_law(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    pcm = pcm.min(MU_LAW_CLIP) + MU_LAW_BIAS;

    // Highest set bit is between 7 and 14 after biasing
    let exponent = (31 - pcm.leading_zeros() as i32 - 7).clamp(0, 7);
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Convert μ-law to linear PCM sample
pub fn mu_law_to_linear(mu_law: u8) -> i16 {
    let value = !mu_law;
    let sign = value & 0x80;
    let exponent = ((value >> 4) & 0x07) as i32;
    let mantissa = (value & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + MU_LAW_BIAS) << exponent) - MU_LAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Convert linear PCM sample to A-law
pub fn linear_to_a_law(sample: i16) -> u8 {
    let mut pcm = (sample as i32) >> 3;
    let mask = if pcm >= 0 {
        0xD5
    } else {
        pcm = -pcm - 1;
        0x55
    };

    let segment = A_LAW_SEGMENT_END
        .iter()
        .position(|end| pcm <= *end)
        .unwrap_or(A_LAW_SEGMENT_END.len()) as i32;

    if segment >= 8 {
        return (0x7F ^ mask) as u8;
    }

    let mantissa = if segment < 2 {
        (pcm >> 1) & 0x0F
    } else {
        (pcm >> segment) & 0x0F
    };
    (((segment << 4) | mantissa) ^ mask) as u8
}

/// Convert A-law to linear PCM sample
pub fn a_law_to_linear(a_law: u8) -> i16 {
    let value = a_law ^ 0x55;
    let mut magnitude = ((value & 0x0F) as i32) << 4;
    let segment = ((value & 0x70) >> 4) as i32;

    match segment {
        0 => magnitude += 8,
        1 => magnitude += 0x108,
        _ => {
            magnitude += 0x108;
            magnitude <<= segment - 1;
        }
    }

    if value & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [i16; 11] = [
        0, 100, -100, 8192, 16384, 24576, 32767, -8192, -16384, -24576, -32768,
    ];

    #[test]
    fn test_mu_law_conversion_functions() {
        for sample in SAMPLES {
            let encoded = linear_to_mu_law(sample);
            let decoded = mu_law_to_linear(encoded);
            let error = (sample as i32 - decoded as i32).abs();
            assert!(error < 1000, "μ-law conversion error: {} -> {} -> {}", sample, encoded, decoded);
        }
    }

    #[test]
    fn test_a_law_conversion_functions() {
        for sample in SAMPLES {
            let encoded = linear_to_a_law(sample);
            let decoded = a_law_to_linear(encoded);
            let error = (sample as i32 - decoded as i32).abs();
            assert!(error < 1000, "A-law conversion error: {} -> {} -> {}", sample, encoded, decoded);
        }
    }

    #[test]
    fn test_known_code_points() {
        // Silence encodes to the canonical idle patterns
        assert_eq!(linear_to_mu_law(0), 0xFF);
        assert_eq!(linear_to_a_law(0), 0xD5);
        assert_eq!(mu_law_to_linear(0xFF), 0);
        assert_eq!(a_law_to_linear(0xD5), 8);
    }

    #[test]
    fn test_sign_is_preserved() {
        for sample in [1000i16, 5000, 20000] {
            assert!(mu_law_to_linear(linear_to_mu_law(sample)) > 0);
            assert!(mu_law_to_linear(linear_to_mu_law(-sample)) < 0);
            assert!(a_law_to_linear(linear_to_a_law(sample)) > 0);
            assert!(a_law_to_linear(linear_to_a_law(-sample)) < 0);
        }
    }
}
