// In-process microphone backends
//
// `ChannelMicrophone` lets an embedding application (or a test) push raw
// sample blocks as if they came from a device. `SilentMicrophone` opens
// successfully and never produces audio.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::backend::{MicrophoneBackend, RawInput};
use crate::error::{VoiceError, VoiceResult};

/// Handle used to push samples into a `ChannelMicrophone`
#[derive(Clone)]
pub struct MicrophoneFeed {
    sender: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
    open: Arc<AtomicBool>,
}

impl MicrophoneFeed {
    /// Push one block of interleaved samples
    ///
    /// Returns false when the microphone is not open (block dropped).
    pub async fn push(&self, block: Vec<f32>) -> bool {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };

        match sender {
            Some(tx) => tx.send(block).await.is_ok(),
            None => false,
        }
    }

    /// Whether the device is currently acquired
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Microphone fed from a `MicrophoneFeed`
pub struct ChannelMicrophone {
    sample_rate: u32,
    channels: u16,
    feed: MicrophoneFeed,
    start_delay: Option<Duration>,
    deny_reason: Option<String>,
}

impl ChannelMicrophone {
    pub fn new(sample_rate: u32, channels: u16) -> (Self, MicrophoneFeed) {
        let feed = MicrophoneFeed {
            sender: Arc::new(Mutex::new(None)),
            open: Arc::new(AtomicBool::new(false)),
        };

        let mic = Self {
            sample_rate,
            channels,
            feed: feed.clone(),
            start_delay: None,
            deny_reason: None,
        };

        (mic, feed)
    }

    /// Simulate a slow permission prompt
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// Simulate a denied permission prompt
    pub fn denied(mut self, reason: impl Into<String>) -> Self {
        self.deny_reason = Some(reason.into());
        self
    }
}

#[async_trait::async_trait]
impl MicrophoneBackend for ChannelMicrophone {
    async fn start(&mut self) -> VoiceResult<RawInput> {
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = &self.deny_reason {
            return Err(VoiceError::device(reason.clone()));
        }

        if self.feed.is_open() {
            return Err(VoiceError::device("microphone already in use"));
        }

        let (tx, rx) = mpsc::channel(64);
        if let Ok(mut sender) = self.feed.sender.lock() {
            *sender = Some(tx);
        }
        self.feed.open.store(true, Ordering::SeqCst);

        info!(
            "Channel microphone opened ({}Hz, {} channels)",
            self.sample_rate, self.channels
        );

        Ok(RawInput {
            sample_rate: self.sample_rate,
            channels: self.channels,
            blocks: rx,
        })
    }

    async fn stop(&mut self) -> Result<()> {
        if let Ok(mut sender) = self.feed.sender.lock() {
            sender.take();
        }
        self.feed.open.store(false, Ordering::SeqCst);
        debug!("Channel microphone closed");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.feed.is_open()
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Microphone that opens successfully and never produces audio
#[derive(Default)]
pub struct SilentMicrophone {
    // Held so the block receiver stays open until stop
    sender: Option<mpsc::Sender<Vec<f32>>>,
}

#[async_trait::async_trait]
impl MicrophoneBackend for SilentMicrophone {
    async fn start(&mut self) -> VoiceResult<RawInput> {
        let (tx, rx) = mpsc::channel(1);
        self.sender = Some(tx);

        Ok(RawInput {
            sample_rate: super::backend::CAPTURE_SAMPLE_RATE,
            channels: 1,
            blocks: rx,
        })
    }

    async fn stop(&mut self) -> Result<()> {
        self.sender = None;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.sender.is_some()
    }

    fn name(&self) -> &str {
        "silence"
    }
}
