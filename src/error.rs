//! Error taxonomy for the voice session core
//!
//! None of these errors is fatal to the hosting process:
//! - `DeviceUnavailable` / `ConnectFailure` are surfaced to the caller and
//!   recovered by reverting the session to `waiting`
//! - `ProtocolAnomaly` is logged and the offending message dropped
//! - `TimeoutExceeded` is treated as a forced success (the session proceeds
//!   to disconnect anyway)

use serde::Serialize;
use thiserror::Error;

/// Best-effort classification of a connect failure.
///
/// Derived from substring matching on the failure text, so it is a
/// diagnostic hint only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureHint {
    /// Rate limit, quota or HTTP 429
    RateLimited,
    /// Unknown / invalid model
    Model,
    /// Authentication or API key problem
    Auth,
    Unknown,
}

impl FailureHint {
    /// Classify a failure message or close reason
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();

        if msg.contains("rate")
            || msg.contains("limit")
            || msg.contains("quota")
            || msg.contains("exceeded")
            || msg.contains("billing")
            || msg.contains("429")
        {
            FailureHint::RateLimited
        } else if msg.contains("auth") || msg.contains("api key") || msg.contains("permission") {
            FailureHint::Auth
        } else if msg.contains("model") || msg.contains("not found") || msg.contains("invalid") {
            FailureHint::Model
        } else {
            FailureHint::Unknown
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum VoiceError {
    /// Microphone missing, permission denied or already in use
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Channel handshake failed
    #[error("Connection failed ({hint:?}): {message}")]
    ConnectFailure { message: String, hint: FailureHint },

    /// Inbound message with an unrecognized shape
    #[error("Protocol anomaly: {0}")]
    ProtocolAnomaly(String),

    #[error("Timed out: {0}")]
    TimeoutExceeded(String),

    /// Operation not valid in the current phase
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl VoiceError {
    pub fn connect(message: impl Into<String>) -> Self {
        let message = message.into();
        let hint = FailureHint::classify(&message);
        VoiceError::ConnectFailure { message, hint }
    }

    pub fn device(message: impl Into<String>) -> Self {
        VoiceError::DeviceUnavailable(message.into())
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        assert_eq!(FailureHint::classify("Quota exceeded"), FailureHint::RateLimited);
        assert_eq!(
            FailureHint::classify("HTTP error: 429 Too Many Requests"),
            FailureHint::RateLimited
        );
    }

    #[test]
    fn test_classify_billing_and_exceeded() {
        assert_eq!(
            FailureHint::classify("Billing account is not active"),
            FailureHint::RateLimited
        );
        assert_eq!(
            FailureHint::classify("Resource has been exhausted (e.g. check usage exceeded)"),
            FailureHint::RateLimited
        );
    }

    #[test]
    fn test_classify_auth_and_model() {
        assert_eq!(FailureHint::classify("API key not valid"), FailureHint::Auth);
        assert_eq!(
            FailureHint::classify("models/foo is not found for API version"),
            FailureHint::Model
        );
        assert_eq!(FailureHint::classify("connection reset"), FailureHint::Unknown);
    }

    #[test]
    fn test_connect_error_carries_hint() {
        let err = VoiceError::connect("resource exhausted: quota");
        match err {
            VoiceError::ConnectFailure { hint, .. } => assert_eq!(hint, FailureHint::RateLimited),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
