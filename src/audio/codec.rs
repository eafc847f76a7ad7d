// PCM conversion helpers shared by the capture and playback pipelines
//
// Wire audio is 16-bit signed little-endian PCM, base64 encoded in JSON.
// Device audio is f32 in [-1.0, 1.0], possibly interleaved multi-channel.

use anyhow::{Context, Result};
use base64::Engine;

/// Convert a float sample in [-1.0, 1.0] to i16 PCM
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Serialize i16 samples as little-endian bytes
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian PCM16 bytes. A trailing odd byte is ignored.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .context("Invalid base64 audio payload")
}

/// Root-mean-square level of a block of float samples, clamped to [0, 1]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt().clamp(0.0, 1.0)
}

/// Average interleaved channels down to mono
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming linear-interpolation resampler
///
/// Keeps the last input sample and the fractional read position between
/// calls so block boundaries do not produce clicks or drift.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    /// Input samples advanced per output sample
    step: f64,
    /// Read position relative to the current virtual input (previous sample + block)
    position: f64,
    previous: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            previous: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if self.is_passthrough() {
            output.extend_from_slice(input);
            return;
        }
        if input.is_empty() {
            return;
        }

        let offset = usize::from(self.previous.is_some());
        let len = input.len() + offset;
        let sample_at = |i: usize| -> f32 {
            if i < offset {
                self.previous.unwrap_or(0.0)
            } else {
                input[i - offset]
            }
        };

        loop {
            let index = self.position.floor() as usize;
            if index + 1 >= len {
                break;
            }
            let frac = (self.position - index as f64) as f32;
            let a = sample_at(index);
            let b = sample_at(index + 1);
            output.push(a + (b - a) * frac);
            self.position += self.step;
        }

        // The last input sample becomes index 0 of the next call
        self.position -= (len - 1) as f64;
        self.previous = input.last().copied();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_bytes_roundtrip() {
        let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN, 12345];
        let bytes = samples_to_pcm_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        assert_eq!(pcm_bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn test_odd_trailing_byte_ignored() {
        let samples = pcm_bytes_to_samples(&[0x01, 0x00, 0xff]);
        assert_eq!(samples, vec![1]);
    }

    #[test]
    fn test_f32_to_i16_clips() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(0.5), 16384);
    }

    #[test]
    fn test_rms_levels() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 128]), 0.0);
        let level = rms(&[0.5; 128]);
        assert!((level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix_to_mono(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn test_resampler_passthrough() {
        let mut resampler = LinearResampler::new(16000, 16000);
        let mut out = Vec::new();
        resampler.process(&[0.1, 0.2, 0.3], &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_resampler_48k_to_16k_across_blocks() {
        let mut resampler = LinearResampler::new(48000, 16000);
        let mut out = Vec::new();

        // 10 blocks of 480 samples (100ms total at 48kHz)
        for _ in 0..10 {
            resampler.process(&[0.25; 480], &mut out);
        }

        // ~1600 output samples, within one sample of the exact ratio
        assert!((out.len() as i64 - 1600).abs() <= 1, "got {}", out.len());
        assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_resampler_upsample_ramp() {
        let mut resampler = LinearResampler::new(8000, 16000);
        let mut out = Vec::new();
        resampler.process(&[0.0, 1.0], &mut out);
        resampler.process(&[2.0], &mut out);

        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5]);
    }
}
