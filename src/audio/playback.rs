use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use super::codec;
use super::sink::SinkRegistry;

/// Default rate of inbound model audio
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Lead time applied whenever the playback timeline restarts
pub const INITIAL_BUFFER_TIME: f64 = 0.1;

/// Mono buffer placed at an absolute time on the output device clock
#[derive(Debug, Clone)]
pub struct ScheduledBuffer {
    pub id: u64,
    /// Device time in seconds at which the first sample plays
    pub start_time: f64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl ScheduledBuffer {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration()
    }
}

/// Audio output capability with a sample-accurate clock
pub trait OutputDevice: Send + Sync {
    /// Native rate of the device
    fn sample_rate(&self) -> u32;

    /// Device clock in seconds
    fn current_time(&self) -> f64;

    /// Queue a buffer to start at `buffer.start_time`
    fn schedule(&self, buffer: ScheduledBuffer) -> Result<()>;

    /// Drop everything that has not played yet
    fn cancel(&self);
}

struct PlaybackState {
    playing: bool,
    /// Device time at which the next buffer starts
    scheduled_time: f64,
    next_id: u64,
}

type OpenOutput = Arc<dyn Fn() -> Result<Arc<dyn OutputDevice>> + Send + Sync>;

#[derive(Clone)]
enum Output {
    Device(Arc<dyn OutputDevice>),
    /// Opened through the registry when the first buffer arrives
    Sink {
        registry: SinkRegistry,
        id: String,
        open: OpenOutput,
    },
}

impl Output {
    fn device(&self) -> Result<Arc<dyn OutputDevice>> {
        match self {
            Output::Device(device) => Ok(device.clone()),
            Output::Sink { registry, id, open } => registry.get_or_create(id, || open()),
        }
    }

    /// The device, if it has been opened
    fn opened(&self) -> Option<Arc<dyn OutputDevice>> {
        match self {
            Output::Device(device) => Some(device.clone()),
            Output::Sink { registry, id, .. } => registry.get(id),
        }
    }
}

/// Gapless scheduler for inbound PCM16 audio
///
/// Each buffer starts exactly where the previous one ends. After an
/// underrun (or on the first buffer) the timeline restarts slightly in
/// the future so the device never plays a partial buffer.
#[derive(Clone)]
pub struct PlaybackPipeline {
    output: Output,
    sample_rate: u32,
    initial_buffer_time: f64,
    state: Arc<Mutex<PlaybackState>>,
    volume: Arc<watch::Sender<f32>>,
}

impl PlaybackPipeline {
    pub fn new(device: Arc<dyn OutputDevice>) -> Self {
        Self::with_sample_rate(device, PLAYBACK_SAMPLE_RATE)
    }

    /// Create a pipeline for inbound audio at `sample_rate`
    pub fn with_sample_rate(device: Arc<dyn OutputDevice>, sample_rate: u32) -> Self {
        Self::from_output(Output::Device(device), sample_rate)
    }

    /// Create a pipeline that plays on the registry's sink `id`
    ///
    /// The device is opened with `open` when the first buffer is scheduled
    /// and shared with every other pipeline on the same sink.
    pub fn on_sink<F>(
        registry: SinkRegistry,
        id: impl Into<String>,
        sample_rate: u32,
        open: F,
    ) -> Self
    where
        F: Fn() -> Result<Arc<dyn OutputDevice>> + Send + Sync + 'static,
    {
        let output = Output::Sink {
            registry,
            id: id.into(),
            open: Arc::new(open),
        };
        Self::from_output(output, sample_rate)
    }

    fn from_output(output: Output, sample_rate: u32) -> Self {
        let (volume, _) = watch::channel(0.0f32);

        Self {
            output,
            sample_rate,
            initial_buffer_time: INITIAL_BUFFER_TIME,
            state: Arc::new(Mutex::new(PlaybackState {
                playing: false,
                scheduled_time: 0.0,
                next_id: 0,
            })),
            volume: Arc::new(volume),
        }
    }

    pub fn with_initial_buffer_time(mut self, seconds: f64) -> Self {
        self.initial_buffer_time = seconds.max(0.0);
        self
    }

    /// Schedule a block of little-endian PCM16 mono audio
    pub fn enqueue(&self, pcm: &[u8]) -> Result<()> {
        let samples: Vec<f32> = codec::pcm_bytes_to_samples(pcm)
            .into_iter()
            .map(codec::i16_to_f32)
            .collect();

        if samples.is_empty() {
            return Ok(());
        }

        let device = self.output.device()?;
        let now = device.current_time();
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("Playback state poisoned"))?;

        if !state.playing || state.scheduled_time < now {
            if state.playing {
                debug!("Playback underrun, restarting timeline");
            }
            state.scheduled_time = now + self.initial_buffer_time;
        }

        self.volume.send_replace(codec::rms(&samples));

        let buffer = ScheduledBuffer {
            id: state.next_id,
            start_time: state.scheduled_time,
            samples,
            sample_rate: self.sample_rate,
        };
        let duration = buffer.duration();

        device.schedule(buffer)?;

        state.next_id += 1;
        state.scheduled_time += duration;
        state.playing = true;

        Ok(())
    }

    /// Flush all scheduled audio and reset the timeline
    pub fn stop(&self) {
        if let Some(device) = self.output.opened() {
            device.cancel();
        }

        if let Ok(mut state) = self.state.lock() {
            if state.playing {
                info!("Playback stopped, queued audio discarded");
            }
            state.playing = false;
            state.scheduled_time = 0.0;
        }

        self.volume.send_replace(0.0);
    }

    /// Whether scheduled audio is still ahead of the device clock
    pub fn is_playing(&self) -> bool {
        let Some(device) = self.output.opened() else {
            return false;
        };
        let now = device.current_time();
        self.state
            .lock()
            .map(|s| s.playing && s.scheduled_time > now)
            .unwrap_or(false)
    }

    /// Device time at which the queue drains
    pub fn scheduled_until(&self) -> f64 {
        self.state.lock().map(|s| s.scheduled_time).unwrap_or(0.0)
    }

    /// Output level of the most recently scheduled buffer
    pub fn volume(&self) -> watch::Receiver<f32> {
        self.volume.subscribe()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Entry recorded by `VirtualOutputDevice`
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub id: u64,
    pub start_time: f64,
    pub duration: f64,
}

impl TimelineEntry {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Output device without hardware
///
/// The clock follows tokio time, so paused-time tests drive it. Scheduled
/// buffers are recorded on a timeline; cancelling drops the entries that
/// have not finished playing.
pub struct VirtualOutputDevice {
    sample_rate: u32,
    origin: Instant,
    timeline: Mutex<Vec<TimelineEntry>>,
}

impl VirtualOutputDevice {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            origin: Instant::now(),
            timeline: Mutex::new(Vec::new()),
        }
    }

    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.timeline.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl Default for VirtualOutputDevice {
    fn default() -> Self {
        Self::new(PLAYBACK_SAMPLE_RATE)
    }
}

impl OutputDevice for VirtualOutputDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&self, buffer: ScheduledBuffer) -> Result<()> {
        let entry = TimelineEntry {
            id: buffer.id,
            start_time: buffer.start_time,
            duration: buffer.duration(),
        };

        self.timeline
            .lock()
            .map_err(|_| anyhow::anyhow!("Timeline poisoned"))?
            .push(entry);
        Ok(())
    }

    fn cancel(&self) {
        let now = self.current_time();
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.retain(|entry| entry.end_time() <= now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: usize, value: i16) -> Vec<u8> {
        codec::samples_to_pcm_bytes(&vec![value; samples])
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_buffer_starts_after_initial_delay() {
        let device = Arc::new(VirtualOutputDevice::default());
        let playback = PlaybackPipeline::new(device.clone());

        playback.enqueue(&pcm(2400, 100)).unwrap();

        let timeline = device.timeline();
        assert_eq!(timeline.len(), 1);
        assert!((timeline[0].start_time - 0.1).abs() < 1e-9);
        assert!((timeline[0].duration - 0.1).abs() < 1e-9);
        assert!(playback.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_is_ignored() {
        let device = Arc::new(VirtualOutputDevice::default());
        let playback = PlaybackPipeline::new(device.clone());

        playback.enqueue(&[]).unwrap();
        playback.enqueue(&[0x01]).unwrap();

        assert!(device.timeline().is_empty());
        assert!(!playback.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_opens_on_first_buffer_and_is_shared() {
        let registry = SinkRegistry::new();
        let device = Arc::new(VirtualOutputDevice::default());
        let opened = Arc::new(Mutex::new(0usize));

        let sink = |registry: &SinkRegistry| {
            let device = device.clone();
            let opened = opened.clone();
            PlaybackPipeline::on_sink(
                registry.clone(),
                "speaker",
                PLAYBACK_SAMPLE_RATE,
                move || {
                    *opened.lock().unwrap() += 1;
                    Ok(device.clone() as Arc<dyn OutputDevice>)
                },
            )
        };
        let first = sink(&registry);
        let second = sink(&registry);

        // Nothing is opened until audio arrives
        first.stop();
        assert!(!first.is_playing());
        assert!(!registry.contains("speaker"));

        first.enqueue(&pcm(2400, 100)).unwrap();
        second.enqueue(&pcm(2400, 100)).unwrap();

        assert_eq!(*opened.lock().unwrap(), 1);
        assert_eq!(device.timeline().len(), 2);
        assert!(second.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_open_failure_is_reported() {
        let playback =
            PlaybackPipeline::on_sink(SinkRegistry::new(), "speaker", PLAYBACK_SAMPLE_RATE, || {
                anyhow::bail!("no output device")
            });

        assert!(playback.enqueue(&pcm(480, 100)).is_err());
        assert!(!playback.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_follows_buffers_and_resets() {
        let device = Arc::new(VirtualOutputDevice::default());
        let playback = PlaybackPipeline::new(device);
        let volume = playback.volume();

        playback.enqueue(&pcm(480, 16384)).unwrap();
        assert!((*volume.borrow() - 0.5).abs() < 1e-3);

        playback.stop();
        assert_eq!(*volume.borrow(), 0.0);
    }
}
