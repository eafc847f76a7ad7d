// Hardware audio through cpal (enabled with the `device` feature)
//
// cpal streams are not `Send` on every host, so each stream lives on its
// own thread and is torn down by dropping the stop channel.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{MicrophoneBackend, RawInput};
use super::codec::LinearResampler;
use super::playback::{OutputDevice, ScheduledBuffer};
use crate::error::{VoiceError, VoiceResult};

/// Default system microphone
pub struct CpalMicrophone {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            stop_tx: None,
            thread: None,
        }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MicrophoneBackend for CpalMicrophone {
    async fn start(&mut self) -> VoiceResult<RawInput> {
        if self.thread.is_some() {
            return Err(VoiceError::device("microphone already in use"));
        }

        let (ready_tx, ready_rx) = oneshot::channel::<Result<(u32, u16), String>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (block_tx, block_rx) = mpsc::channel::<Vec<f32>>(64);

        let thread = std::thread::spawn(move || {
            let stream = match open_input_stream(block_tx) {
                Ok((stream, rate, channels)) => {
                    let _ = ready_tx.send(Ok((rate, channels)));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("{:#}", e)));
                    return;
                }
            };

            // Park until stop (or the backend is dropped)
            let _ = stop_rx.recv();
            drop(stream);
        });

        let (sample_rate, channels) = ready_rx
            .await
            .map_err(|_| VoiceError::device("microphone thread exited"))?
            .map_err(VoiceError::device)?;

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);

        Ok(RawInput {
            sample_rate,
            channels,
            blocks: block_rx,
        })
    }

    async fn stop(&mut self) -> Result<()> {
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .context("Failed to join microphone thread")?
                .map_err(|_| anyhow::anyhow!("Microphone thread panicked"))?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        "device"
    }
}

fn open_input_stream(block_tx: mpsc::Sender<Vec<f32>>) -> Result<(cpal::Stream, u32, u16)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .context("No input device available")?;

    let supported = device
        .default_input_config()
        .context("Failed to query input config")?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate;
    let channels = config.channels;

    let err_fn = |err: cpal::StreamError| error!("Input stream error: {}", err);

    macro_rules! build_input {
        ($sample:ty, $convert:expr) => {{
            let tx = block_tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[$sample], _: &cpal::InputCallbackInfo| {
                    let convert = $convert;
                    let block: Vec<f32> = data.iter().map(|&s| convert(s)).collect();
                    // Drop the block if the framing stage is behind
                    let _ = tx.try_send(block);
                },
                err_fn,
                None,
            )
        }};
    }

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_input!(f32, |s: f32| s),
        cpal::SampleFormat::I16 => build_input!(i16, |s: i16| s as f32 / 32768.0),
        cpal::SampleFormat::U16 => build_input!(u16, |s: u16| (s as f32 - 32768.0) / 32768.0),
        other => anyhow::bail!("Unsupported input sample format: {:?}", other),
    }
    .context("Failed to build input stream")?;

    stream.play().context("Failed to start input stream")?;
    info!("Input device opened ({}Hz, {} channels)", sample_rate, channels);

    Ok((stream, sample_rate, channels))
}

struct OutputQueue {
    /// Mono samples at the device rate, starting at frame `start_frame`
    samples: VecDeque<f32>,
    start_frame: u64,
}

/// Default system speaker
///
/// Scheduled buffers are resampled to the device rate and placed into a
/// frame-addressed queue that the output callback drains.
pub struct CpalOutputDevice {
    sample_rate: u32,
    played_frames: Arc<AtomicU64>,
    queue: Arc<Mutex<OutputQueue>>,
    _stop_tx: std_mpsc::Sender<()>,
}

impl CpalOutputDevice {
    pub fn open() -> Result<Self> {
        let played_frames = Arc::new(AtomicU64::new(0));
        let queue = Arc::new(Mutex::new(OutputQueue {
            samples: VecDeque::new(),
            start_frame: 0,
        }));

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, String>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_played = played_frames.clone();
        let thread_queue = queue.clone();
        std::thread::spawn(move || {
            match open_output_stream(thread_played, thread_queue) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("{:#}", e)));
                }
            }
        });

        let sample_rate = ready_rx
            .recv()
            .context("Output thread exited")?
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(Self {
            sample_rate,
            played_frames,
            queue,
            _stop_tx: stop_tx,
        })
    }
}

fn open_output_stream(
    played_frames: Arc<AtomicU64>,
    queue: Arc<Mutex<OutputQueue>>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("No output device available")?;

    let supported = device
        .default_output_config()
        .context("Failed to query output config")?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        anyhow::bail!("Unsupported output sample format: {:?}", supported.sample_format());
    }

    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate;
    let channels = config.channels.max(1) as usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                let Ok(mut queue) = queue.lock() else {
                    data.fill(0.0);
                    return;
                };

                let mut position = played_frames.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = if position >= queue.start_frame {
                        queue.start_frame += 1;
                        queue.samples.pop_front().unwrap_or(0.0)
                    } else {
                        0.0
                    };
                    frame.fill(sample);
                    position += 1;
                }

                played_frames.fetch_add(frames as u64, Ordering::Relaxed);
            },
            |err| error!("Output stream error: {}", err),
            None,
        )
        .context("Failed to build output stream")?;

    stream.play().context("Failed to start output stream")?;
    info!("Output device opened ({}Hz, {} channels)", sample_rate, channels);

    Ok((stream, sample_rate))
}

impl OutputDevice for CpalOutputDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.played_frames.load(Ordering::Relaxed) as f64 / self.sample_rate.max(1) as f64
    }

    fn schedule(&self, buffer: ScheduledBuffer) -> Result<()> {
        let mut samples = Vec::with_capacity(buffer.samples.len());
        let mut resampler = LinearResampler::new(buffer.sample_rate, self.sample_rate);
        resampler.process(&buffer.samples, &mut samples);

        let start_frame = (buffer.start_time * self.sample_rate as f64).round() as u64;
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| anyhow::anyhow!("Output queue poisoned"))?;

        let played = self.played_frames.load(Ordering::Relaxed);
        if queue.samples.is_empty() {
            queue.start_frame = start_frame.max(played);
        } else {
            // Pad any gap between the queued audio and the requested start
            let queued_end = queue.start_frame + queue.samples.len() as u64;
            if start_frame > queued_end {
                let gap = (start_frame - queued_end) as usize;
                queue.samples.extend(std::iter::repeat(0.0).take(gap));
            } else if start_frame < queued_end {
                warn!(
                    "Buffer {} overlaps queued audio by {} frames",
                    buffer.id,
                    queued_end - start_frame
                );
            }
        }
        queue.samples.extend(samples);

        Ok(())
    }

    fn cancel(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.samples.clear();
        }
    }
}
