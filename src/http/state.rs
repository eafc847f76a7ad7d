use crate::live::MemoryLogSink;
use crate::session::PhaseController;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single voice session driven over HTTP
    pub controller: Arc<PhaseController>,

    /// Recent diagnostic entries
    pub logs: Arc<MemoryLogSink>,
}

impl AppState {
    pub fn new(controller: Arc<PhaseController>, logs: Arc<MemoryLogSink>) -> Self {
        Self { controller, logs }
    }
}
