// Shared fixtures for integration tests
//
// `MockConnector` stands in for the realtime endpoint: every successful
// `open` hands the test a `MockServer` that sees what the client sends and
// can push inbound frames back.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use voice_session::audio::{
    AudioBackendConfig, CapturePipeline, ChannelMicrophone, MicrophoneFeed, PlaybackPipeline,
    VirtualOutputDevice,
};
use voice_session::audio::codec;
use voice_session::live::messages::SetupMessage;
use voice_session::live::{
    Channel, ClientMessage, CloseInfo, Connector, InboundFrame, LiveClient, MemoryLogSink,
};
use voice_session::session::{ControllerConfig, ControllerDeps, PhaseController, SessionConfig};
use voice_session::{VoiceError, VoiceResult};

pub const MODEL: &str = "models/test-model";

/// Server side of one mock channel
pub struct MockServer {
    pub setup: SetupMessage,
    pub outbound: mpsc::UnboundedReceiver<ClientMessage>,
    pub inbound: mpsc::UnboundedSender<InboundFrame>,
}

impl MockServer {
    pub fn send_json(&self, value: Value) {
        let _ = self.inbound.send(InboundFrame::Text(value.to_string()));
    }

    pub fn setup_complete(&self) {
        self.send_json(json!({ "setupComplete": {} }));
    }

    /// One model-turn message carrying `pcm` as inline audio
    pub fn audio(&self, pcm: &[u8]) {
        self.send_json(json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": codec::encode_base64(pcm) } }
            ]}}
        }));
    }

    pub fn turn_complete(&self) {
        self.send_json(json!({ "serverContent": { "turnComplete": true } }));
    }

    pub fn interrupted(&self) {
        self.send_json(json!({ "serverContent": { "interrupted": true } }));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.inbound.send(InboundFrame::Closed(CloseInfo::new(code, reason)));
    }

    /// Everything the client has sent so far
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Whether the client has dropped its side of the channel
    pub fn is_closed(&mut self) -> bool {
        matches!(
            self.outbound.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        )
    }
}

/// Text of every client content message
pub fn texts(messages: &[ClientMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| match message {
            ClientMessage::ClientContent(content) => Some(
                content
                    .turns
                    .iter()
                    .flat_map(|turn| turn.parts.iter())
                    .filter_map(|part| part.text.clone())
                    .collect::<Vec<_>>()
                    .join(""),
            ),
            _ => None,
        })
        .collect()
}

pub struct MockConnector {
    servers: mpsc::UnboundedSender<MockServer>,
    failure: Mutex<Option<String>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    pub opened: Mutex<usize>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            servers: tx,
            failure: Mutex::new(None),
            gate: Mutex::new(None),
            opened: Mutex::new(0),
        });
        (connector, rx)
    }

    /// Make the next `open` fail with `message`
    pub fn fail_next(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// Hold the next `open` until the returned sender fires
    pub fn gate_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn open_count(&self) -> usize {
        *self.opened.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn open(&self, setup: SetupMessage) -> VoiceResult<Channel> {
        *self.opened.lock().unwrap() += 1;

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if let Some(message) = self.failure.lock().unwrap().take() {
            return Err(VoiceError::connect(message));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let _ = self.servers.send(MockServer {
            setup,
            outbound: out_rx,
            inbound: in_tx,
        });

        Ok(Channel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Controller wired to mock endpoints and virtual audio
pub struct Harness {
    pub controller: PhaseController,
    pub connector: Arc<MockConnector>,
    pub servers: mpsc::UnboundedReceiver<MockServer>,
    pub feed: MicrophoneFeed,
    pub device: Arc<VirtualOutputDevice>,
    pub playback: PlaybackPipeline,
    pub logs: Arc<MemoryLogSink>,
}

impl Harness {
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_microphone(config, |mic| mic)
    }

    /// Harness whose microphone is adjusted by `configure` first
    pub fn with_microphone(
        config: ControllerConfig,
        configure: impl FnOnce(ChannelMicrophone) -> ChannelMicrophone,
    ) -> Self {
        let (connector, servers) = MockConnector::new();
        let logs = Arc::new(MemoryLogSink::new());
        let client = LiveClient::new(connector.clone(), logs.clone());

        let (mic, feed) = ChannelMicrophone::new(16000, 1);
        let mic = configure(mic);
        let capture = CapturePipeline::new(Box::new(mic), AudioBackendConfig::default());

        let device = Arc::new(VirtualOutputDevice::default());
        let playback = PlaybackPipeline::new(device.clone());

        let controller = PhaseController::spawn(
            ControllerDeps {
                client,
                capture,
                playback: playback.clone(),
            },
            MODEL,
            SessionConfig::default(),
            config,
        );

        Self {
            controller,
            connector,
            servers,
            feed,
            device,
            playback,
            logs,
        }
    }

    /// Start a session and return its server side
    pub async fn start(&mut self) -> MockServer {
        self.controller.start().await.expect("session should start");
        self.servers.recv().await.expect("connector should open a channel")
    }
}

pub fn prompts() -> voice_session::session::ScriptedPrompts {
    ControllerConfig::default().prompts
}

/// Let spawned tasks run without advancing paused time
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}

/// `samples` of PCM16 at a constant level, as little-endian bytes
pub fn pcm(samples: usize, value: i16) -> Vec<u8> {
    codec::samples_to_pcm_bytes(&vec![value; samples])
}
