use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::events::CloseInfo;
use super::messages::{ClientMessage, SetupMessage};
use crate::error::{VoiceError, VoiceResult};

/// Default Gemini Live endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Raw inbound traffic of an open channel
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    /// Remote close (or a dropped connection, reported as 1006)
    Closed(CloseInfo),
    /// Transport error; the channel is gone
    Failed(String),
}

/// Open realtime channel
///
/// Dropping `outbound` closes the channel with a normal close frame.
pub struct Channel {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<InboundFrame>,
}

/// Capability to open a realtime channel
///
/// The setup message is the first thing sent on a new channel.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, setup: SetupMessage) -> VoiceResult<Channel>;
}

/// WebSocket connector for the Live API
pub struct WebSocketConnector {
    endpoint: String,
    api_key: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

/// Connection lost without a closing handshake
fn is_dropped(error: &WsError) -> bool {
    match error {
        WsError::ConnectionClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

fn dropped() -> CloseInfo {
    CloseInfo::new(1006, "connection dropped")
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, setup: SetupMessage) -> VoiceResult<Channel> {
        if self.api_key.is_empty() {
            return Err(VoiceError::connect("API key is not configured"));
        }

        info!("Connecting to {}", self.endpoint);

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(self.url()))
                .await
                .map_err(|_| VoiceError::connect("connection timed out"))?
                .map_err(|e| VoiceError::connect(e.to_string()))?;

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        // The setup message always goes first
        let setup_json = serde_json::to_string(&ClientMessage::Setup(setup))
            .map_err(|e| VoiceError::connect(format!("failed to encode setup: {}", e)))?;
        ws_sink
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| VoiceError::connect(e.to_string()))?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<InboundFrame>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(message) = outgoing else {
                            let frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "client disconnect".into(),
                            };
                            let _ = ws_sink.send(Message::Close(Some(frame))).await;
                            debug!("WebSocket closed by client");
                            break;
                        };

                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to serialize {}: {}", message.kind(), e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!("Failed to send WebSocket message: {}", e);
                            let _ = in_tx.send(InboundFrame::Failed(e.to_string()));
                            break;
                        }
                    }

                    incoming = ws_stream.next() => {
                        let frame = match incoming {
                            Some(Ok(Message::Text(text))) => InboundFrame::Text(text.to_string()),
                            Some(Ok(Message::Binary(data))) => InboundFrame::Binary(data.to_vec()),
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    warn!("Failed to send pong: {}", e);
                                }
                                continue;
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let info = frame
                                    .map(|f| CloseInfo::new(u16::from(f.code), f.reason.to_string()))
                                    .unwrap_or_else(|| CloseInfo::new(1005, ""));
                                info!("WebSocket closed by server ({}): {}", info.code, info.reason);
                                let _ = in_tx.send(InboundFrame::Closed(info));
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) if is_dropped(&e) => {
                                warn!("WebSocket dropped without a close frame: {}", e);
                                let _ = in_tx.send(InboundFrame::Closed(dropped()));
                                break;
                            }
                            None => {
                                warn!("WebSocket stream ended without a close frame");
                                let _ = in_tx.send(InboundFrame::Closed(dropped()));
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                let _ = in_tx.send(InboundFrame::Failed(e.to_string()));
                                break;
                            }
                        };

                        if in_tx.send(frame).is_err() {
                            debug!("Inbound consumer gone, closing channel");
                            let _ = ws_sink.close().await;
                            break;
                        }
                    }
                }
            }
        });

        info!("Connected to Live API");

        Ok(Channel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
