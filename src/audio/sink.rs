use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::playback::OutputDevice;

/// Stable id of the sink used for model speech
pub const DEFAULT_SINK_ID: &str = "audio-out";

/// Output devices keyed by sink id
///
/// Opening an output device is expensive (and on some hosts limited), so
/// one device per id is created lazily and reused across connections.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: Arc<Mutex<HashMap<String, Arc<dyn OutputDevice>>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the device registered under `id`, creating it with `factory` if absent
    pub fn get_or_create<F>(&self, id: &str, factory: F) -> Result<Arc<dyn OutputDevice>>
    where
        F: FnOnce() -> Result<Arc<dyn OutputDevice>>,
    {
        let mut sinks = self
            .sinks
            .lock()
            .map_err(|_| anyhow::anyhow!("Sink registry poisoned"))?;

        if let Some(device) = sinks.get(id) {
            return Ok(device.clone());
        }

        let device = factory()?;
        info!("Created output sink '{}' ({}Hz)", id, device.sample_rate());
        sinks.insert(id.to_string(), device.clone());

        Ok(device)
    }

    /// The device registered under `id`, if it has been created
    pub fn get(&self, id: &str) -> Option<Arc<dyn OutputDevice>> {
        self.sinks.lock().ok()?.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sinks.lock().map(|s| s.contains_key(id)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
