use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a conversation session
///
/// `Waiting -> Preparing -> Chatting -> Ending -> Waiting`. A failed start
/// goes from `Preparing` straight back to `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Waiting,
    Preparing,
    Chatting,
    Ending,
}

impl SessionPhase {
    /// Whether a live channel belongs to this phase
    pub fn is_active(&self) -> bool {
        matches!(self, SessionPhase::Chatting | SessionPhase::Ending)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Waiting => "waiting",
            SessionPhase::Preparing => "preparing",
            SessionPhase::Chatting => "chatting",
            SessionPhase::Ending => "ending",
        };
        f.write_str(name)
    }
}
