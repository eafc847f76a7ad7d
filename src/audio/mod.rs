pub mod backend;
pub mod capture;
pub mod channel;
pub mod codec;
pub mod file;
pub mod playback;
pub mod sink;

#[cfg(feature = "device")]
pub mod device;

pub use backend::{
    AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, MediaChunk,
    MicrophoneBackend, RawInput, CAPTURE_SAMPLE_RATE,
};
pub use capture::{CapturePipeline, CaptureStreams};
pub use channel::{ChannelMicrophone, MicrophoneFeed, SilentMicrophone};
pub use file::{AudioFile, FileMicrophone};
pub use playback::{
    OutputDevice, PlaybackPipeline, ScheduledBuffer, TimelineEntry, VirtualOutputDevice,
    PLAYBACK_SAMPLE_RATE,
};
pub use sink::{SinkRegistry, DEFAULT_SINK_ID};

#[cfg(feature = "device")]
pub use device::{CpalMicrophone, CpalOutputDevice};
