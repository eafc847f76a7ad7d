use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::phase::SessionPhase;
use crate::live::ConnectionState;

/// Observable state of the phase controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,

    pub connection: ConnectionState,

    /// Seconds left in the session budget
    pub seconds_left: u64,

    /// Model audio is being received
    pub assistant_speaking: bool,

    /// Mic level is above the speech threshold (debounced)
    pub user_speaking: bool,

    /// Session budget has expired
    pub time_up: bool,

    /// The time-up message went out and the user may end the session
    pub show_end_button: bool,

    /// Consecutive failed start attempts
    pub retry_count: u32,

    /// Dismissible error shown to the user
    pub last_error: Option<String>,

    /// Id of the current (or last) session
    pub session_id: Option<Uuid>,

    pub started_at: Option<DateTime<Utc>>,

    /// Model turns completed in the current session
    pub turns_completed: u32,
}

impl SessionSnapshot {
    pub fn new(countdown_secs: u64) -> Self {
        Self {
            phase: SessionPhase::Waiting,
            connection: ConnectionState::Disconnected,
            seconds_left: countdown_secs,
            assistant_speaking: false,
            user_speaking: false,
            time_up: false,
            show_end_button: false,
            retry_count: 0,
            last_error: None,
            session_id: None,
            started_at: None,
            turns_completed: 0,
        }
    }
}
