use serde::Serialize;

use super::messages::{Part, ToolCall};
use crate::error::FailureHint;

/// Connection lifecycle of the session client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Diagnostic grouping of WebSocket close codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseCategory {
    /// 1000
    Normal,
    /// 1008
    PolicyViolation,
    /// 1011
    ServerError,
    /// 1012
    ServiceRestart,
    /// 1013
    TryAgainLater,
    Other,
}

impl CloseCategory {
    pub fn from_code(code: u16) -> Self {
        match code {
            1000 => CloseCategory::Normal,
            1008 => CloseCategory::PolicyViolation,
            1011 => CloseCategory::ServerError,
            1012 => CloseCategory::ServiceRestart,
            1013 => CloseCategory::TryAgainLater,
            _ => CloseCategory::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    pub category: CloseCategory,
    /// Looks like a rate limit or quota rejection (by reason text, or code 1011)
    pub rate_limited: bool,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            code,
            category: CloseCategory::from_code(code),
            // 1011 is what the endpoint sends when a quota runs out mid-session
            rate_limited: code == 1011 || FailureHint::classify(&reason) == FailureHint::RateLimited,
            reason,
        }
    }

    /// Close issued by `LiveClient::disconnect`
    pub fn client_disconnect() -> Self {
        Self::new(1000, "client disconnect")
    }

    pub fn is_normal(&self) -> bool {
        self.category == CloseCategory::Normal
    }
}

/// Event delivered to `LiveClient` subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Channel established
    Open,
    SetupComplete,
    /// Decoded PCM16 bytes of one inline audio part
    AudioChunk(Vec<u8>),
    TurnComplete,
    /// Model speech cut off by user barge-in
    Interrupted,
    ToolCall(ToolCall),
    /// Ids of tool calls the model no longer needs
    ToolCallCancellation(Vec<String>),
    /// Non-audio parts of a model turn
    ContentChunk(Vec<Part>),
    Error(String),
    Close(CloseInfo),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Open => "open",
            ServerEvent::SetupComplete => "setupcomplete",
            ServerEvent::AudioChunk(_) => "audio",
            ServerEvent::TurnComplete => "turncomplete",
            ServerEvent::Interrupted => "interrupted",
            ServerEvent::ToolCall(_) => "toolcall",
            ServerEvent::ToolCallCancellation(_) => "toolcallcancellation",
            ServerEvent::ContentChunk(_) => "content",
            ServerEvent::Error(_) => "error",
            ServerEvent::Close(_) => "close",
        }
    }
}
