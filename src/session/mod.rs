//! Conversation session management
//!
//! This module provides the `PhaseController` that drives one time-boxed
//! voice conversation at a time:
//! - Microphone capture and forwarding to the live client
//! - Playback of model speech, flushed on barge-in
//! - Scripted opening, time-up and closing messages
//! - Countdown, silence polling and the wind-down handshake

mod activity;
mod config;
mod controller;
mod phase;
mod stats;
mod timers;

pub use activity::SpeakingActivity;
pub use config::{
    render_system_prompt, CompressionConfig, ControllerConfig, RetryPolicy, ScriptedPrompts,
    SessionConfig, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT,
};
pub use controller::{ControllerDeps, PhaseController};
pub use phase::SessionPhase;
pub use stats::SessionSnapshot;
pub use timers::{PendingTimers, TimerKind};
