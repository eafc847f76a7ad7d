use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackendConfig, AudioFrame, MediaChunk, MicrophoneBackend, RawInput};
use super::codec::{self, LinearResampler};
use crate::error::{VoiceError, VoiceResult};

/// Live outputs of a running capture
///
/// The chunk stream is push-based and cannot be restarted; a new `start`
/// hands out a new pair of receivers.
pub struct CaptureStreams {
    /// Encoded frames in capture order
    pub chunks: mpsc::Receiver<MediaChunk>,
    /// Latest input level (RMS of one processing quantum)
    pub volume: watch::Receiver<f32>,
}

struct CaptureState {
    backend: Box<dyn MicrophoneBackend>,
    task: Option<JoinHandle<()>>,
}

/// Microphone capture pipeline
///
/// Start and stop are serialized on one lifecycle lock, so a `stop` issued
/// while `start` is still waiting on the device is applied once the device
/// is acquired.
#[derive(Clone)]
pub struct CapturePipeline {
    config: AudioBackendConfig,
    state: Arc<Mutex<CaptureState>>,
    recording: Arc<AtomicBool>,
}

impl CapturePipeline {
    pub fn new(backend: Box<dyn MicrophoneBackend>, config: AudioBackendConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CaptureState {
                backend,
                task: None,
            })),
            recording: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquire the microphone and start emitting frames
    pub async fn start(&self) -> VoiceResult<CaptureStreams> {
        let mut state = self.state.lock().await;

        if self.recording.load(Ordering::SeqCst) {
            return Err(VoiceError::device("capture already running"));
        }

        let input = state.backend.start().await?;

        info!(
            "Capture started on {} backend ({}Hz, {} channels)",
            state.backend.name(),
            input.sample_rate,
            input.channels
        );

        // Create channels for encoded frames and volume
        let (chunk_tx, chunk_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (volume_tx, volume_rx) = watch::channel(0.0f32);

        let config = self.config.clone();
        let task = tokio::spawn(async move {
            run_framing(input, config, chunk_tx, volume_tx).await;
        });

        state.task = Some(task);
        self.recording.store(true, Ordering::SeqCst);

        Ok(CaptureStreams {
            chunks: chunk_rx,
            volume: volume_rx,
        })
    }

    /// Release the microphone
    ///
    /// No frame is produced after this returns. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(task) = state.task.take() {
            task.abort();
            // Wait until the framing task is gone so nothing else is sent
            let _ = task.await;
        }

        if self.recording.swap(false, Ordering::SeqCst) {
            state.backend.stop().await?;
            info!("Capture stopped ({} backend)", state.backend.name());
        }

        Ok(())
    }

    pub fn is_capturing(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}

/// Downmix, resample, measure and frame raw device blocks
async fn run_framing(
    mut input: RawInput,
    config: AudioBackendConfig,
    chunk_tx: mpsc::Sender<MediaChunk>,
    volume_tx: watch::Sender<f32>,
) {
    let target_rate = config.target_sample_rate;
    let frame_samples = config.frame_samples.max(1);
    let quantum_samples = config.quantum_samples.max(1);

    let mut resampler = LinearResampler::new(input.sample_rate, target_rate);
    let mut resampled = Vec::new();
    let mut quantum: Vec<f32> = Vec::with_capacity(quantum_samples);
    let mut frame: Vec<i16> = Vec::with_capacity(frame_samples);
    let mut sequence: u64 = 0;

    while let Some(block) = input.blocks.recv().await {
        let mono = codec::downmix_to_mono(&block, input.channels);
        resampled.clear();
        resampler.process(&mono, &mut resampled);

        for &sample in &resampled {
            quantum.push(sample);
            if quantum.len() == quantum_samples {
                volume_tx.send_replace(codec::rms(&quantum));
                quantum.clear();
            }

            frame.push(codec::f32_to_i16(sample));
            if frame.len() == frame_samples {
                let audio_frame = AudioFrame {
                    samples: std::mem::replace(&mut frame, Vec::with_capacity(frame_samples)),
                    sample_rate: target_rate,
                    channels: 1,
                    timestamp_ms: sequence * frame_samples as u64 * 1000 / target_rate as u64,
                    sequence,
                };

                if chunk_tx.send(audio_frame.to_media_chunk()).await.is_err() {
                    debug!("Capture consumer dropped, framing stopped");
                    return;
                }
                sequence += 1;
            }
        }
    }

    if !frame.is_empty() {
        debug!("Discarding partial frame of {} samples", frame.len());
    }
    warn!("Microphone input ended after {} frames", sequence);
}
