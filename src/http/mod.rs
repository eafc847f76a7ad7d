//! HTTP API server for external control (browser or kiosk front-end)
//!
//! This module provides a REST API for driving the voice session:
//! - POST /voice/start - Acquire the microphone and connect
//! - POST /voice/end - Send the closing message and wind down
//! - GET /voice/status - Session snapshot (phase, countdown, speaking flags)
//! - GET /voice/logs?filter= - Recent diagnostic entries
//! - POST /voice/error/dismiss - Clear the error surface
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
