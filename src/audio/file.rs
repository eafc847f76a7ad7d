use anyhow::{Context, Result};
use hound::WavReader;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{MicrophoneBackend, RawInput};
use super::codec;
use crate::error::{VoiceError, VoiceResult};

/// Decoded audio file (interleaved i16 samples)
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    /// Open a WAV file directly, anything else through symphonia
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        let (sample_rate, channels, samples) = if is_wav {
            Self::read_wav(path)?
        } else {
            Self::decode_with_symphonia(path)?
        };

        let duration_seconds =
            samples.len() as f64 / (sample_rate as f64 * channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            sample_rate,
            channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate,
            channels,
            samples,
        })
    }

    fn read_wav(path: &Path) -> Result<(u32, u16, Vec<i16>)> {
        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int => reader
                .into_samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .map(|s| s.map(codec::f32_to_i16))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
        };

        Ok((spec.sample_rate, spec.channels, samples))
    }

    fn decode_with_symphonia(path: &Path) -> Result<(u32, u16, Vec<i16>)> {
        use symphonia::core::audio::SampleBuffer;
        use symphonia::core::codecs::DecoderOptions;
        use symphonia::core::errors::Error as SymphoniaError;
        use symphonia::core::formats::FormatOptions;
        use symphonia::core::io::MediaSourceStream;
        use symphonia::core::meta::MetadataOptions;
        use symphonia::core::probe::Hint;

        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file: {:?}", path))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Unsupported audio format")?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .context("Audio file has no default track")?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("Unsupported audio codec")?;

        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
        let mut channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);
        let mut samples = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;

                    let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buffer.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(e).context("Failed to decode audio"),
            }
        }

        if sample_rate == 0 || channels == 0 {
            anyhow::bail!("Could not determine audio format of {:?}", path);
        }

        Ok((sample_rate, channels, samples))
    }
}

/// Microphone backend that plays an audio file into the capture pipeline
///
/// Blocks are paced in real time so the remote side sees a live stream.
pub struct FileMicrophone {
    path: String,
    block_duration: Duration,
    task: Option<JoinHandle<()>>,
}

impl FileMicrophone {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            block_duration: Duration::from_millis(20),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl MicrophoneBackend for FileMicrophone {
    async fn start(&mut self) -> VoiceResult<RawInput> {
        if self.task.is_some() {
            return Err(VoiceError::device("file microphone already capturing"));
        }

        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(&path))
            .await
            .map_err(|e| VoiceError::device(format!("file loader panicked: {}", e)))?
            .map_err(|e| VoiceError::device(format!("{:#}", e)))?;

        let sample_rate = audio.sample_rate;
        let channels = audio.channels.max(1);
        let frames_per_block = (sample_rate as u64 * self.block_duration.as_millis() as u64 / 1000)
            .max(1) as usize;
        let block_len = frames_per_block * channels as usize;
        let block_duration = self.block_duration;

        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(block_duration);
            for block in audio.samples.chunks(block_len) {
                ticker.tick().await;
                let floats: Vec<f32> = block.iter().map(|&s| codec::i16_to_f32(s)).collect();
                if tx.send(floats).await.is_err() {
                    return;
                }
            }
            info!("File microphone reached end of {}", audio.path);
        });

        self.task = Some(task);

        Ok(RawInput {
            sample_rate,
            channels,
            blocks: rx,
        })
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        "file"
    }
}
