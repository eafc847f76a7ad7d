use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::live::messages::{
    Content, ContextWindowCompression, GenerationConfig, Modality, Part, PrebuiltVoiceConfig,
    SetupMessage, SlidingWindow, SpeechConfig, VoiceConfig,
};

/// Default model for new sessions
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Context window compression thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Token count that triggers compression
    pub trigger_tokens: u64,
    /// Tokens kept by the sliding window
    pub target_tokens: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            trigger_tokens: 25600,
            target_tokens: 12800,
        }
    }
}

/// Connection descriptor for one session
///
/// Fixed for the lifetime of a connection; changing it means reconnecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prebuilt voice (e.g. "Aoede")
    pub voice_name: Option<String>,

    /// BCP-47 language of the spoken response
    pub language_code: Option<String>,

    /// Rendered system instruction
    pub system_instruction: Option<String>,

    pub compression: Option<CompressionConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            voice_name: Some("Aoede".to_string()),
            language_code: Some("ja-JP".to_string()),
            system_instruction: None,
            compression: Some(CompressionConfig::default()),
        }
    }
}

impl SessionConfig {
    /// Build the setup message for `model`. Responses are always audio.
    pub fn to_setup(&self, model: &str) -> SetupMessage {
        let speech_config = if self.voice_name.is_some() || self.language_code.is_some() {
            Some(SpeechConfig {
                language_code: self.language_code.clone(),
                voice_config: self.voice_name.as_ref().map(|voice| VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.clone(),
                    },
                }),
            })
        } else {
            None
        };

        SetupMessage {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config,
            },
            system_instruction: self.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part::text(text.clone())],
            }),
            context_window_compression: self.compression.map(|c| ContextWindowCompression {
                trigger_tokens: Some(c.trigger_tokens),
                sliding_window: Some(SlidingWindow {
                    target_tokens: Some(c.target_tokens),
                }),
            }),
            tools: Vec::new(),
        }
    }
}

/// Bounded exponential backoff between failed start attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let factor = 1u64.checked_shl(failures - 1).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Scripted messages sent on the user's behalf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedPrompts {
    /// Sent once after the setup handshake
    pub start: String,
    /// Sent once when the countdown has expired and both sides are quiet
    pub time_up: String,
    /// Sent when the user ends the session
    pub end: String,
}

impl Default for ScriptedPrompts {
    fn default() -> Self {
        Self {
            start: "Please greet me and ask what topic I would like to discuss.".to_string(),
            time_up: "Our time is up. Please briefly summarize what we talked about.".to_string(),
            end: "I have to go now. Please say a short goodbye.".to_string(),
        }
    }
}

/// Default system instruction template
pub const DEFAULT_SYSTEM_PROMPT: &str = "You enjoy constructive discussion.

The user holds the following view:
{{userPerspective}}

A different view is the following:
{{oppositePerspective}}

Take the different view and have a constructive, interesting discussion with the user.
- Respect the user's opinion and never be aggressive
- Keep every answer to one or two sentences
- Use concrete examples and questions to deepen the conversation";

/// Fill the perspective placeholders of a system prompt template
pub fn render_system_prompt(template: &str, user_perspective: &str, opposite_perspective: &str) -> String {
    template
        .replace("{{userPerspective}}", user_perspective)
        .replace("{{oppositePerspective}}", opposite_perspective)
        .trim()
        .to_string()
}

/// Timings and thresholds of the phase controller
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Session budget
    pub countdown: Duration,
    /// Interval of the silence check after time-up
    pub silence_poll: Duration,
    /// User is considered quiet this long after the last loud quantum
    pub speech_debounce: Duration,
    /// Mic level above which the user is speaking
    pub speech_threshold: f32,
    /// Cap on waiting for the closing turn
    pub end_wait: Duration,
    /// Delay between setup handshake and the scripted opening message
    pub setup_grace: Duration,
    /// Lets queued playback finish before returning to waiting
    pub return_grace: Duration,
    /// Pause before acquiring the microphone
    pub prepare_delay: Duration,
    pub retry: RetryPolicy,
    pub prompts: ScriptedPrompts,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(60),
            silence_poll: Duration::from_millis(500),
            speech_debounce: Duration::from_millis(600),
            speech_threshold: 0.01,
            end_wait: Duration::from_secs(10),
            setup_grace: Duration::from_millis(500),
            return_grace: Duration::from_secs(2),
            prepare_delay: Duration::from_millis(100),
            retry: RetryPolicy::default(),
            prompts: ScriptedPrompts::default(),
        }
    }
}
