use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::codec;
use super::playback::OutputDevice;
use crate::error::VoiceResult;

/// Sample rate the remote model accepts for input audio
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Audio sample data (16-bit PCM, mono)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Position of this frame in the capture sequence
    pub sequence: u64,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() as u64 / self.channels.max(1) as u64;
        per_channel * 1000 / self.sample_rate.max(1) as u64
    }

    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        codec::samples_to_pcm_bytes(&self.samples)
    }

    /// Encode as a realtime media chunk (`audio/pcm;rate=<hz>`, base64 data)
    pub fn to_media_chunk(&self) -> MediaChunk {
        MediaChunk {
            mime_type: format!("audio/pcm;rate={}", self.sample_rate),
            data: codec::encode_base64(&self.to_pcm_bytes()),
        }
    }
}

/// Base64 encoded media payload as it travels on the realtime channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

impl MediaChunk {
    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        codec::decode_base64(&self.data)
    }
}

/// Configuration for the capture pipeline
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Samples per emitted frame (2048 = 128ms at 16kHz)
    pub frame_samples: usize,
    /// Samples per volume measurement
    pub quantum_samples: usize,
    /// Frames buffered between the framing stage and the consumer
    pub channel_capacity: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: CAPTURE_SAMPLE_RATE, // 16kHz for the live model
            frame_samples: 2048,
            quantum_samples: 128, // one audio processing quantum
            channel_capacity: 64,
        }
    }
}

/// Raw device input handed to the framing stage
pub struct RawInput {
    /// Device sample rate
    pub sample_rate: u32,
    /// Device channel count (interleaved)
    pub channels: u16,
    /// Blocks of interleaved f32 samples in [-1.0, 1.0]
    pub blocks: mpsc::Receiver<Vec<f32>>,
}

/// Microphone backend trait
///
/// Implementations:
/// - `CpalMicrophone`: default input device (`device` feature)
/// - `FileMicrophone`: streams an audio file in real time
/// - `ChannelMicrophone`: samples pushed programmatically
/// - `SilentMicrophone`: produces nothing (headless sessions)
#[async_trait::async_trait]
pub trait MicrophoneBackend: Send + Sync {
    /// Acquire the device and start delivering raw blocks
    ///
    /// Fails with `DeviceUnavailable` if there is no input capability or
    /// permission is denied.
    async fn start(&mut self) -> VoiceResult<RawInput>;

    /// Release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a microphone backend for the configured source
    pub fn microphone(source: AudioSource) -> Result<Box<dyn MicrophoneBackend>> {
        match source {
            AudioSource::Device => {
                #[cfg(feature = "device")]
                {
                    Ok(Box::new(super::device::CpalMicrophone::new()))
                }

                #[cfg(not(feature = "device"))]
                {
                    anyhow::bail!("Microphone capture requires the `device` feature")
                }
            }

            AudioSource::File(path) => Ok(Box::new(super::file::FileMicrophone::new(path))),

            AudioSource::Silence => Ok(Box::new(super::channel::SilentMicrophone::default())),
        }
    }

    /// Create an output device: `device` (speakers) or `virtual` (no hardware)
    pub fn output(kind: &str, sample_rate: u32) -> Result<Arc<dyn OutputDevice>> {
        match kind.trim() {
            "virtual" | "none" => Ok(Arc::new(super::playback::VirtualOutputDevice::new(
                sample_rate,
            ))),

            "device" | "speaker" | "speakers" => {
                #[cfg(feature = "device")]
                {
                    Ok(Arc::new(super::device::CpalOutputDevice::open()?))
                }

                #[cfg(not(feature = "device"))]
                {
                    anyhow::bail!("Speaker output requires the `device` feature")
                }
            }

            other => anyhow::bail!("Unknown audio output: {}", other),
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default input device (requires the `device` feature)
    Device,
    /// Audio file streamed as if it were a microphone
    File(String),
    /// No input at all
    Silence,
}

impl AudioSource {
    /// Parse a configured input: `device`, `silence`, or a file path
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "device" | "mic" | "microphone" => AudioSource::Device,
            "" | "silence" | "none" => AudioSource::Silence,
            path => AudioSource::File(shellexpand::tilde(path).into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame {
            samples: vec![0; 2048],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
            sequence: 0,
        };
        assert_eq!(frame.duration_ms(), 128);
    }

    #[test]
    fn test_media_chunk_mime_type() {
        let frame = AudioFrame {
            samples: vec![1, -1],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
            sequence: 0,
        };
        let chunk = frame.to_media_chunk();
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert!(chunk.is_audio());
        assert_eq!(chunk.decode().unwrap(), vec![0x01, 0x00, 0xff, 0xff]);
    }

    #[test]
    fn test_audio_source_parse() {
        assert_eq!(AudioSource::parse("device"), AudioSource::Device);
        assert_eq!(AudioSource::parse("silence"), AudioSource::Silence);
        assert_eq!(
            AudioSource::parse("/tmp/input.wav"),
            AudioSource::File("/tmp/input.wav".to_string())
        );
    }
}
