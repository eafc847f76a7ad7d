use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::decoder;
use super::events::{CloseInfo, ConnectionState, ServerEvent};
use super::log::{LogLevel, LogSink, StreamingLog};
use super::messages::{ClientContent, ClientMessage, Content, Part, RealtimeInput, ToolResponse};
use super::transport::{Channel, Connector, InboundFrame};
use crate::audio::MediaChunk;
use crate::error::VoiceResult;
use crate::session::SessionConfig;

struct ClientInner {
    state: ConnectionState,
    /// Bumped on every connect and disconnect; stale tasks compare against it
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    reader: Option<JoinHandle<()>>,
    subscribers: Vec<mpsc::UnboundedSender<ServerEvent>>,
}

impl ClientInner {
    fn emit(&mut self, event: ServerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

struct Shared {
    inner: Mutex<ClientInner>,
    log: Arc<dyn LogSink>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ClientInner> {
        // A panicking subscriber must not take the client down with it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log(&self, level: LogLevel, kind: &str, message: impl Into<String>) {
        self.log.record(StreamingLog::new(level, kind, message));
    }

    async fn read_inbound(
        self: Arc<Self>,
        generation: u64,
        mut inbound: mpsc::UnboundedReceiver<InboundFrame>,
    ) {
        while let Some(frame) = inbound.recv().await {
            match frame {
                InboundFrame::Text(text) => self.handle_payload(generation, text.as_bytes()),
                InboundFrame::Binary(data) => self.handle_payload(generation, &data),
                InboundFrame::Closed(info) => {
                    self.remote_closed(generation, info);
                    return;
                }
                InboundFrame::Failed(message) => {
                    self.log(LogLevel::Error, "server.error", message.clone());
                    {
                        let mut inner = self.lock();
                        if inner.generation == generation {
                            inner.emit(ServerEvent::Error(message.clone()));
                        }
                    }
                    self.remote_closed(generation, CloseInfo::new(1006, message));
                    return;
                }
            }
        }

        self.remote_closed(generation, CloseInfo::new(1006, "channel ended"));
    }

    fn handle_payload(&self, generation: u64, payload: &[u8]) {
        let events = match decoder::decode(payload) {
            Ok(events) => events,
            Err(e) => {
                // Anomalies are dropped, the session keeps going
                self.log(LogLevel::Warn, "server.anomaly", e.to_string());
                return;
            }
        };

        let mut inner = self.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connected {
            return;
        }

        for event in events {
            match &event {
                ServerEvent::AudioChunk(pcm) => {
                    self.log(LogLevel::Audio, "server.audio", format!("{} bytes", pcm.len()))
                }
                ServerEvent::ContentChunk(parts) => {
                    self.log(LogLevel::Api, "server.content", format!("{} parts", parts.len()))
                }
                ServerEvent::ToolCall(call) => self.log(
                    LogLevel::Api,
                    "server.toolcall",
                    format!("{} function calls", call.function_calls.len()),
                ),
                other => self.log(LogLevel::Api, &format!("server.{}", other.name()), ""),
            }
            inner.emit(event);
        }
    }

    fn remote_closed(&self, generation: u64, info: CloseInfo) {
        let mut inner = self.lock();

        // Already torn down locally: the close was reported by `disconnect`
        if inner.generation != generation || inner.state != ConnectionState::Connected {
            return;
        }

        inner.state = ConnectionState::Disconnected;
        inner.outbound = None;
        inner.reader = None;

        let level = if info.is_normal() { LogLevel::Info } else { LogLevel::Error };
        let mut message = format!("code {} ({:?}): {}", info.code, info.category, info.reason);
        if info.rate_limited {
            message.push_str(" [rate limited]");
        }
        self.log(level, "server.close", message);

        inner.emit(ServerEvent::Close(info));
    }
}

/// Client for one realtime model session at a time
///
/// All state transitions happen under one lock, so concurrent `connect` /
/// `disconnect` calls never interleave. Events reach subscribers in the
/// order they were decoded.
#[derive(Clone)]
pub struct LiveClient {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl LiveClient {
    pub fn new(connector: Arc<dyn Connector>, log: Arc<dyn LogSink>) -> Self {
        Self {
            connector,
            shared: Arc::new(Shared {
                inner: Mutex::new(ClientInner {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    outbound: None,
                    reader: None,
                    subscribers: Vec::new(),
                }),
                log,
            }),
        }
    }

    /// Register a new event consumer
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }

    /// Open a channel to `model`
    ///
    /// Returns `Ok(false)` without side effects unless disconnected, and
    /// also when a `disconnect` abandons the attempt.
    pub async fn connect(&self, model: &str, config: &SessionConfig) -> VoiceResult<bool> {
        let (generation, setup) = {
            let mut inner = self.shared.lock();
            if inner.state != ConnectionState::Disconnected {
                self.shared.log(
                    LogLevel::Warn,
                    "client.connect",
                    format!("ignored, client is {:?}", inner.state),
                );
                return Ok(false);
            }

            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            (inner.generation, config.to_setup(model))
        };

        self.shared
            .log(LogLevel::Info, "client.connect", format!("connecting to {}", model));

        let result = self.connector.open(setup).await;

        let mut inner = self.shared.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connecting {
            drop(inner);
            // Dropping the late channel closes it
            drop(result);
            self.shared
                .log(LogLevel::Warn, "client.connect", "abandoned by disconnect");
            return Ok(false);
        }

        let Channel { outbound, inbound } = match result {
            Ok(channel) => channel,
            Err(e) => {
                inner.state = ConnectionState::Disconnected;
                drop(inner);
                self.shared.log(LogLevel::Error, "client.connect", e.to_string());
                return Err(e);
            }
        };

        inner.state = ConnectionState::Connected;
        inner.outbound = Some(outbound);
        inner.emit(ServerEvent::Open);

        let reader = tokio::spawn(self.shared.clone().read_inbound(generation, inbound));
        inner.reader = Some(reader);
        drop(inner);

        self.shared
            .log(LogLevel::Success, "client.open", format!("connected to {}", model));

        Ok(true)
    }

    /// Close the channel
    ///
    /// Returns whether anything was open. The state is `Disconnected` before
    /// the single `Close` event is delivered; repeated calls do nothing.
    pub fn disconnect(&self) -> bool {
        let mut inner = self.shared.lock();

        match inner.state {
            ConnectionState::Disconnected => false,
            ConnectionState::Connecting => {
                inner.generation += 1;
                inner.state = ConnectionState::Disconnected;
                drop(inner);
                self.shared
                    .log(LogLevel::Info, "client.close", "pending connect cancelled");
                true
            }
            ConnectionState::Connected => {
                inner.generation += 1;
                inner.state = ConnectionState::Disconnected;
                inner.outbound = None;
                if let Some(reader) = inner.reader.take() {
                    reader.abort();
                }
                inner.emit(ServerEvent::Close(CloseInfo::client_disconnect()));
                drop(inner);
                self.shared.log(LogLevel::Info, "client.close", "disconnected");
                true
            }
        }
    }

    /// Send content parts as one user turn
    pub fn send(&self, parts: Vec<Part>, turn_complete: bool) {
        let count = parts.len();
        let message = ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::user(parts)],
            turn_complete,
        });

        if self.dispatch(message) {
            self.shared.log(
                LogLevel::Api,
                "client.send",
                format!("{} parts, turn_complete={}", count, turn_complete),
            );
        }
    }

    /// Send a complete text turn
    pub fn send_text(&self, text: &str) {
        self.send(vec![Part::text(text)], true);
    }

    /// Stream media chunks (microphone audio)
    pub fn send_realtime_input(&self, chunks: Vec<MediaChunk>) {
        if chunks.is_empty() {
            return;
        }

        let audio = chunks.iter().filter(|c| c.is_audio()).count();
        let other = chunks.len() - audio;
        let message = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: chunks,
        });

        if self.dispatch(message) {
            let summary = match (audio, other) {
                (a, 0) => format!("audio x{}", a),
                (0, o) => format!("media x{}", o),
                (a, o) => format!("audio x{} + media x{}", a, o),
            };
            self.shared.log(LogLevel::Audio, "client.realtimeInput", summary);
        }
    }

    /// Answer a tool call; responses without function results are dropped
    pub fn send_tool_response(&self, response: ToolResponse) {
        if response.function_responses.is_empty() {
            self.shared
                .log(LogLevel::Warn, "client.toolResponse", "empty response not sent");
            return;
        }

        let count = response.function_responses.len();
        if self.dispatch(ClientMessage::ToolResponse(response)) {
            self.shared.log(
                LogLevel::Api,
                "client.toolResponse",
                format!("{} function responses", count),
            );
        }
    }

    fn dispatch(&self, message: ClientMessage) -> bool {
        let inner = self.shared.lock();
        if inner.state != ConnectionState::Connected {
            return false;
        }

        match &inner.outbound {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub fn status(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionState::Connected
    }

    /// Record a diagnostic entry in the client's log sink
    pub fn log(&self, level: LogLevel, kind: &str, message: impl Into<String>) {
        self.shared.log(level, kind, message);
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("state", &self.status())
            .finish()
    }
}

