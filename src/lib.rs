pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod live;
pub mod session;

pub use audio::{
    AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource, CapturePipeline,
    CaptureStreams, MediaChunk, MicrophoneBackend, OutputDevice, PlaybackPipeline, SinkRegistry,
};
pub use config::Config;
pub use error::{FailureHint, VoiceError, VoiceResult};
pub use http::{create_router, AppState};
pub use live::{
    ConnectionState, Connector, LiveClient, LogSink, MemoryLogSink, ServerEvent,
    WebSocketConnector,
};
pub use session::{
    ControllerConfig, ControllerDeps, PhaseController, SessionConfig, SessionPhase,
    SessionSnapshot,
};
