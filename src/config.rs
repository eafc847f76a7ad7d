use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, AudioSource, PLAYBACK_SAMPLE_RATE};
use crate::live::DEFAULT_ENDPOINT;
use crate::session::{
    render_system_prompt, CompressionConfig, ControllerConfig, RetryPolicy, ScriptedPrompts,
    SessionConfig, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT,
};

/// Prefix of environment overrides, e.g. `VOICE_SESSION__LIVE__MODEL`
pub const ENV_PREFIX: &str = "VOICE_SESSION";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub session: SessionTimings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-session".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    pub voice: Option<String>,
    pub language_code: Option<String>,
    pub compression: Option<CompressionConfig>,
    pub connect_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: session.voice_name,
            language_code: session.language_code,
            compression: session.compression,
            connect_timeout_secs: 10,
        }
    }
}

impl LiveConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("Environment variable {} is not set", self.api_key_env))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// `device`, `silence`, or a path to an audio file
    pub input: String,
    /// `device` or `virtual`
    pub output: String,
    pub frame_samples: usize,
    pub output_sample_rate: u32,
    pub initial_buffer_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input: "device".to_string(),
            output: "device".to_string(),
            frame_samples: AudioBackendConfig::default().frame_samples,
            output_sample_rate: PLAYBACK_SAMPLE_RATE,
            initial_buffer_ms: 100,
        }
    }
}

impl AudioConfig {
    pub fn source(&self) -> AudioSource {
        AudioSource::parse(&self.input)
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            frame_samples: self.frame_samples,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionTimings {
    pub countdown_secs: u64,
    pub silence_poll_ms: u64,
    pub speech_debounce_ms: u64,
    pub speech_threshold: f32,
    pub end_wait_secs: u64,
    pub setup_grace_ms: u64,
    pub return_grace_ms: u64,
    pub prepare_delay_ms: u64,
    pub retry: RetryPolicy,
    pub prompts: ScriptedPrompts,
    /// System instruction with `{{userPerspective}}` / `{{oppositePerspective}}`
    pub system_prompt_template: String,
    pub user_perspective: String,
    pub opposite_perspective: String,
}

impl Default for SessionTimings {
    fn default() -> Self {
        let defaults = ControllerConfig::default();
        Self {
            countdown_secs: defaults.countdown.as_secs(),
            silence_poll_ms: defaults.silence_poll.as_millis() as u64,
            speech_debounce_ms: defaults.speech_debounce.as_millis() as u64,
            speech_threshold: defaults.speech_threshold,
            end_wait_secs: defaults.end_wait.as_secs(),
            setup_grace_ms: defaults.setup_grace.as_millis() as u64,
            return_grace_ms: defaults.return_grace.as_millis() as u64,
            prepare_delay_ms: defaults.prepare_delay.as_millis() as u64,
            retry: defaults.retry,
            prompts: defaults.prompts,
            system_prompt_template: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_perspective: String::new(),
            opposite_perspective: String::new(),
        }
    }
}

impl Config {
    /// Load `path` (extension optional) with environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let path = shellexpand::tilde(path);
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to build configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn session_config(&self) -> SessionConfig {
        let timings = &self.session;
        let instruction = render_system_prompt(
            &timings.system_prompt_template,
            &timings.user_perspective,
            &timings.opposite_perspective,
        );

        SessionConfig {
            voice_name: self.live.voice.clone(),
            language_code: self.live.language_code.clone(),
            system_instruction: (!instruction.is_empty()).then_some(instruction),
            compression: self.live.compression,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let t = &self.session;
        ControllerConfig {
            countdown: Duration::from_secs(t.countdown_secs),
            silence_poll: Duration::from_millis(t.silence_poll_ms),
            speech_debounce: Duration::from_millis(t.speech_debounce_ms),
            speech_threshold: t.speech_threshold,
            end_wait: Duration::from_secs(t.end_wait_secs),
            setup_grace: Duration::from_millis(t.setup_grace_ms),
            return_grace: Duration::from_millis(t.return_grace_ms),
            prepare_delay: Duration::from_millis(t.prepare_delay_ms),
            retry: t.retry,
            prompts: t.prompts.clone(),
        }
    }
}
