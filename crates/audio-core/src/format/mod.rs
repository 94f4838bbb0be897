//! Audio format conversion
//!
//! Channel mapping and sample rate conversion between the format a device
//! runs at and the format a media connection negotiated. Conversion is
//! stateful across calls so consecutive blocks join without clicks. It is
//! meant for the non-real-time side of a ring, never for a device callback.

use crate::error::{AudioError, AudioResult};
use crate::types::AudioFormat;

/// Streaming format converter for interleaved f32 audio
#[derive(Debug, Clone)]
pub struct FormatConverter {
    /// Format of the samples fed in
    input_format: AudioFormat,
    /// Format of the samples produced
    output_format: AudioFormat,
    /// Input frames advanced per output frame
    step: f64,
    /// Position of the next output frame, relative to the start of the next
    /// input chunk. `-1.0 ..= 0.0` means it lies between the carried frame
    /// and the first new one.
    position: f64,
    /// Last channel-mapped frame of the previous chunk
    previous: Vec<f32>,
    have_previous: bool,
    /// Channel-mapped scratch
    mapped: Vec<f32>,
}

impl FormatConverter {
    /// Create a new format converter
    pub fn new(input_format: AudioFormat, output_format: AudioFormat) -> AudioResult<Self> {
        for format in [&input_format, &output_format] {
            if format.sample_rate == 0 || format.channels == 0 {
                return Err(AudioError::configuration(format!(
                    "cannot convert {} to {}: rate and channels must be non-zero",
                    input_format.description(),
                    output_format.description()
                )));
            }
        }

        Ok(Self {
            input_format,
            output_format,
            step: input_format.sample_rate as f64 / output_format.sample_rate as f64,
            position: 0.0,
            previous: vec![0.0; output_format.channels as usize],
            have_previous: false,
            mapped: Vec::new(),
        })
    }

    /// Input format
    pub fn input_format(&self) -> AudioFormat {
        self.input_format
    }

    /// Output format
    pub fn output_format(&self) -> AudioFormat {
        self.output_format
    }

    /// Whether samples pass through untouched
    pub fn is_passthrough(&self) -> bool {
        self.input_format == self.output_format
    }

    /// Convert `input` and append the result to `out`.
    ///
    /// A trailing partial frame in `input` is ignored.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }

        let mut mapped = std::mem::take(&mut self.mapped);
        mapped.clear();
        self.map_channels(input, &mut mapped);

        if self.input_format.sample_rate == self.output_format.sample_rate {
            out.extend_from_slice(&mapped);
        } else {
            self.resample(&mapped, out);
        }
        self.mapped = mapped;
    }

    /// Reset interpolation state, e.g. after a discontinuity
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.have_previous = false;
        self.previous.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Map input channels onto output channels.
    ///
    /// Upmixing repeats input channels round-robin (mono duplicates);
    /// downmixing averages every input channel congruent to the output
    /// channel (stereo to mono averages left and right).
    fn map_channels(&self, input: &[f32], out: &mut Vec<f32>) {
        let in_ch = self.input_format.channels as usize;
        let out_ch = self.output_format.channels as usize;

        if in_ch == out_ch {
            out.extend_from_slice(&input[..input.len() - input.len() % in_ch]);
            return;
        }

        for frame in input.chunks_exact(in_ch) {
            if out_ch > in_ch {
                for c in 0..out_ch {
                    out.push(frame[c % in_ch]);
                }
            } else {
                for c in 0..out_ch {
                    let mut sum = 0.0f32;
                    let mut count = 0u32;
                    for i in (c..in_ch).step_by(out_ch) {
                        sum += frame[i];
                        count += 1;
                    }
                    out.push(sum / count as f32);
                }
            }
        }
    }

    /// Linear interpolation between adjacent frames
    fn resample(&mut self, frames: &[f32], out: &mut Vec<f32>) {
        let ch = self.output_format.channels as usize;
        let n = frames.len() / ch;
        if n == 0 {
            return;
        }
        if !self.have_previous && self.position < 0.0 {
            self.position = 0.0;
        }

        let last = (n - 1) as f64;
        while self.position <= last {
            let index = self.position.floor();
            let fraction = (self.position - index) as f32;
            let index = index as isize;

            for c in 0..ch {
                let a = if index < 0 {
                    self.previous[c]
                } else {
                    frames[index as usize * ch + c]
                };
                let b_index = index + 1;
                let b = if (b_index as usize) < n {
                    frames[b_index as usize * ch + c]
                } else {
                    a
                };
                out.push(a + (b - a) * fraction);
            }
            self.position += self.step;
        }

        self.position -= n as f64;
        self.previous.copy_from_slice(&frames[(n - 1) * ch..n * ch]);
        self.have_previous = true;
    }
}

/// Convert a normalized f32 sample to 16-bit PCM
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}

/// Convert a 16-bit PCM sample to normalized f32
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}
