use chrono::Utc;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::activity::SpeakingActivity;
use super::config::{ControllerConfig, SessionConfig};
use super::phase::SessionPhase;
use super::stats::SessionSnapshot;
use super::timers::{PendingTimers, TimerKind};
use crate::audio::{CapturePipeline, MediaChunk, PlaybackPipeline};
use crate::error::{VoiceError, VoiceResult};
use crate::live::{LiveClient, LogLevel, ServerEvent};

/// Components driven by the phase controller
#[derive(Clone)]
pub struct ControllerDeps {
    pub client: LiveClient,
    pub capture: CapturePipeline,
    pub playback: PlaybackPipeline,
}

enum Command {
    Start(oneshot::Sender<VoiceResult<()>>),
    End(oneshot::Sender<bool>),
    DismissError,
    Shutdown(oneshot::Sender<()>),
}

enum Wake {
    Command(Option<Command>),
    Event(Option<ServerEvent>),
    Chunk(Option<MediaChunk>),
    Volume(Option<f32>),
    Timer,
}

/// Handle to the session phase controller
///
/// The controller runs as a single task that owns every timer and flag;
/// this handle only sends it commands and observes its snapshot.
pub struct PhaseController {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    deps: ControllerDeps,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PhaseController {
    pub fn spawn(
        deps: ControllerDeps,
        model: impl Into<String>,
        session_config: SessionConfig,
        config: ControllerConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) =
            watch::channel(SessionSnapshot::new(config.countdown.as_secs()));

        let actor = Actor {
            client: deps.client.clone(),
            capture: deps.capture.clone(),
            playback: deps.playback.clone(),
            model: model.into(),
            session_config,
            snapshot: SessionSnapshot::new(config.countdown.as_secs()),
            config,
            commands: command_rx,
            events: None,
            chunks: None,
            volume: None,
            timers: PendingTimers::new(),
            activity: SpeakingActivity::default(),
            setup_done: false,
            start_sent: false,
            awaiting_end_turn: false,
            consecutive_failures: 0,
            snapshot_tx,
        };

        let task = tokio::spawn(actor.run());

        Self {
            commands: command_tx,
            snapshot: snapshot_rx,
            deps,
            task: Mutex::new(Some(task)),
        }
    }

    /// Begin a session: connect, then acquire the microphone
    ///
    /// Only valid while waiting. A failure leaves the controller waiting
    /// with the error recorded and the retry counter incremented.
    pub async fn start(&self) -> VoiceResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx))?;
        rx.await.map_err(|_| stopped())?
    }

    /// Wind the session down; returns false outside `Chatting`
    pub async fn end(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::End(tx)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn dismiss_error(&self) {
        let _ = self.send(Command::DismissError);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Output level of model speech
    pub fn output_volume(&self) -> watch::Receiver<f32> {
        self.deps.playback.volume()
    }

    pub fn client(&self) -> &LiveClient {
        &self.deps.client
    }

    /// Tear everything down and stop the controller task
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }

        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command) -> VoiceResult<()> {
        self.commands.send(command).map_err(|_| stopped())
    }
}

fn stopped() -> VoiceError {
    VoiceError::InvalidState("phase controller stopped".to_string())
}

struct Actor {
    client: LiveClient,
    capture: CapturePipeline,
    playback: PlaybackPipeline,
    model: String,
    session_config: SessionConfig,
    config: ControllerConfig,

    commands: mpsc::UnboundedReceiver<Command>,
    events: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    chunks: Option<mpsc::Receiver<MediaChunk>>,
    volume: Option<watch::Receiver<f32>>,

    timers: PendingTimers,
    activity: SpeakingActivity,
    /// Server acknowledged this session's setup; audio is held back until then
    setup_done: bool,
    /// Scripted opening message already sent this session
    start_sent: bool,
    /// Closing message sent, waiting for the model's last turn
    awaiting_end_turn: bool,
    consecutive_failures: u32,

    snapshot: SessionSnapshot,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

async fn next_event(rx: &mut Option<mpsc::UnboundedReceiver<ServerEvent>>) -> Option<ServerEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_chunk(rx: &mut Option<mpsc::Receiver<MediaChunk>>) -> Option<MediaChunk> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_volume(rx: &mut Option<watch::Receiver<f32>>) -> Option<f32> {
    match rx {
        Some(rx) => {
            rx.changed().await.ok()?;
            let level = *rx.borrow_and_update();
            Some(level)
        }
        None => std::future::pending().await,
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(mut self) {
        info!("Phase controller started (model {})", self.model);

        loop {
            let deadline = self.timers.next_deadline();

            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                event = next_event(&mut self.events) => Wake::Event(event),
                chunk = next_chunk(&mut self.chunks) => Wake::Chunk(chunk),
                level = next_volume(&mut self.volume) => Wake::Volume(level),
                _ = wait_for(deadline) => Wake::Timer,
            };

            match wake {
                Wake::Command(Some(Command::Start(reply))) => {
                    let result = self.start().await;
                    let _ = reply.send(result);
                }
                Wake::Command(Some(Command::End(reply))) => {
                    let accepted = self.end();
                    let _ = reply.send(accepted);
                }
                Wake::Command(Some(Command::DismissError)) => {
                    self.snapshot.last_error = None;
                }
                Wake::Command(Some(Command::Shutdown(reply))) => {
                    self.reset_to_waiting().await;
                    self.publish();
                    let _ = reply.send(());
                    break;
                }
                Wake::Command(None) => {
                    // Every handle is gone
                    self.reset_to_waiting().await;
                    break;
                }
                Wake::Event(Some(event)) => self.handle_event(event).await,
                Wake::Event(None) => self.events = None,
                Wake::Chunk(Some(chunk)) => {
                    if self.snapshot.phase.is_active() && self.setup_done {
                        self.client.send_realtime_input(vec![chunk]);
                    }
                }
                Wake::Chunk(None) => {
                    debug!("Capture stream ended");
                    self.chunks = None;
                }
                Wake::Volume(Some(level)) => self.handle_volume(level),
                Wake::Volume(None) => self.volume = None,
                Wake::Timer => {
                    for kind in self.timers.take_due(Instant::now()) {
                        self.handle_timer(kind).await;
                    }
                }
            }

            self.publish();
        }

        info!("Phase controller stopped");
    }

    fn publish(&mut self) {
        self.snapshot.connection = self.client.status();
        self.snapshot.assistant_speaking = self.activity.assistant;
        self.snapshot.user_speaking = self.activity.user;

        let snapshot = self.snapshot.clone();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn log(&self, level: LogLevel, kind: &str, message: impl Into<String>) {
        self.client.log(level, kind, message);
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.snapshot.phase != phase {
            debug!("Session phase {} -> {}", self.snapshot.phase, phase);
            self.snapshot.phase = phase;
        }
    }

    async fn start(&mut self) -> VoiceResult<()> {
        if self.snapshot.phase != SessionPhase::Waiting {
            return Err(VoiceError::InvalidState(format!(
                "cannot start while {}",
                self.snapshot.phase
            )));
        }

        self.set_phase(SessionPhase::Preparing);
        self.publish();

        let delay = self.config.prepare_delay + self.config.retry.delay(self.consecutive_failures);
        sleep(delay).await;

        match self.open_session().await {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.timers.clear_all();
                self.activity.reset();
                self.setup_done = false;
                self.start_sent = false;
                self.awaiting_end_turn = false;

                self.snapshot.retry_count = 0;
                self.snapshot.last_error = None;
                self.snapshot.time_up = false;
                self.snapshot.show_end_button = false;
                self.snapshot.seconds_left = self.config.countdown.as_secs();
                self.snapshot.session_id = Some(Uuid::new_v4());
                self.snapshot.started_at = Some(Utc::now());
                self.snapshot.turns_completed = 0;

                self.timers.arm_in(TimerKind::Countdown, self.config.countdown);
                self.timers.arm_in(TimerKind::CountdownTick, std::time::Duration::from_secs(1));
                self.set_phase(SessionPhase::Chatting);

                self.log(LogLevel::Success, "session.start", "session started");
                Ok(())
            }
            Err(e) => {
                warn!("Session start failed: {}", e);
                self.release_resources().await;

                self.consecutive_failures += 1;
                self.snapshot.retry_count = self.consecutive_failures;
                self.snapshot.last_error = Some(e.to_string());
                self.set_phase(SessionPhase::Waiting);

                self.log(
                    LogLevel::Error,
                    "session.start",
                    format!("attempt {} failed: {}", self.consecutive_failures, e),
                );
                Err(e)
            }
        }
    }

    async fn open_session(&mut self) -> VoiceResult<()> {
        // Drop any stale channel before subscribing to the new one
        self.client.disconnect();
        self.events = Some(self.client.subscribe());

        let connected = self
            .client
            .connect(&self.model, &self.session_config)
            .await?;

        if !connected {
            return Err(VoiceError::InvalidState(
                "client is already connecting".to_string(),
            ));
        }

        // The microphone only opens once the channel is up
        let streams = self.capture.start().await?;
        self.chunks = Some(streams.chunks);
        self.volume = Some(streams.volume);

        Ok(())
    }

    fn end(&mut self) -> bool {
        if self.snapshot.phase != SessionPhase::Chatting {
            return false;
        }

        self.timers.clear_all();
        self.activity.user = false;
        self.set_phase(SessionPhase::Ending);

        if self.client.is_connected() {
            self.client.send_text(&self.config.prompts.end);
            self.awaiting_end_turn = true;
            self.timers.arm_in(TimerKind::EndWait, self.config.end_wait);
            self.log(LogLevel::Info, "session.end", "closing message sent");
        } else {
            self.timers.arm_in(TimerKind::ReturnGrace, self.config.return_grace);
            self.log(LogLevel::Info, "session.end", "channel already closed");
        }

        true
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Open => {
                debug!("Channel open");
            }
            ServerEvent::SetupComplete => {
                if self.snapshot.phase.is_active() {
                    self.setup_done = true;
                }
                if self.snapshot.phase == SessionPhase::Chatting && !self.start_sent {
                    self.timers.arm_in(TimerKind::SetupGrace, self.config.setup_grace);
                }
            }
            ServerEvent::AudioChunk(pcm) => {
                if !self.snapshot.phase.is_active() {
                    return;
                }
                if let Err(e) = self.playback.enqueue(&pcm) {
                    warn!("Failed to schedule playback: {:#}", e);
                }
                self.activity.assistant = true;
            }
            ServerEvent::TurnComplete => {
                self.activity.assistant = false;
                self.snapshot.turns_completed += 1;

                if self.snapshot.phase == SessionPhase::Ending && self.awaiting_end_turn {
                    self.awaiting_end_turn = false;
                    self.timers.clear(TimerKind::EndWait);
                    self.log(LogLevel::Success, "session.end", "closing turn complete");

                    // Disconnect now, return to waiting once playback drains
                    self.release_resources().await;
                    self.timers.arm_in(TimerKind::ReturnGrace, self.config.return_grace);
                }
            }
            ServerEvent::Interrupted => {
                self.playback.stop();
                self.activity.assistant = false;
            }
            ServerEvent::ToolCall(call) => {
                let names: Vec<&str> = call.function_calls.iter().map(|c| c.name.as_str()).collect();
                info!("Tool call ignored: {}", names.join(", "));
            }
            ServerEvent::ToolCallCancellation(ids) => {
                debug!("Tool calls cancelled: {:?}", ids);
            }
            ServerEvent::ContentChunk(parts) => {
                for text in parts.iter().filter_map(|p| p.text.as_deref()) {
                    debug!("Model text: {}", text);
                }
            }
            ServerEvent::Error(message) => {
                self.snapshot.last_error = Some(message);
            }
            ServerEvent::Close(info) => {
                if !self.snapshot.phase.is_active() {
                    return;
                }

                if !info.is_normal() {
                    let mut message = format!("Connection closed ({}): {}", info.code, info.reason);
                    if info.rate_limited {
                        message.push_str(" (rate limited)");
                    }
                    self.snapshot.last_error = Some(message);
                }

                warn!("Channel closed during {}: {} {}", self.snapshot.phase, info.code, info.reason);
                self.reset_to_waiting().await;
            }
        }
    }

    fn handle_volume(&mut self, level: f32) {
        if !self.snapshot.phase.is_active() {
            return;
        }

        if self.activity.observe_volume(level, self.config.speech_threshold) {
            self.timers
                .arm_in(TimerKind::SpeechDebounce, self.config.speech_debounce);
        }
    }

    async fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Countdown => {
                self.timers.clear(TimerKind::CountdownTick);
                self.snapshot.seconds_left = 0;
                self.snapshot.time_up = true;
                self.log(LogLevel::Info, "session.timeup", "countdown expired");
                self.check_silence();
            }
            TimerKind::CountdownTick => {
                if let Some(deadline) = self.timers.deadline(TimerKind::Countdown) {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.snapshot.seconds_left = remaining.as_millis().div_ceil(1000) as u64;
                    self.timers
                        .arm_in(TimerKind::CountdownTick, std::time::Duration::from_secs(1));
                }
            }
            TimerKind::SetupGrace => {
                if self.snapshot.phase == SessionPhase::Chatting && !self.start_sent {
                    self.client.send_text(&self.config.prompts.start);
                    self.start_sent = true;
                    self.log(LogLevel::Info, "session.start", "opening message sent");
                }
            }
            TimerKind::SilencePoll => self.check_silence(),
            TimerKind::SpeechDebounce => {
                self.activity.user = false;
            }
            TimerKind::EndWait => {
                let timeout = VoiceError::TimeoutExceeded("closing turn".to_string());
                warn!("{}, disconnecting anyway", timeout);
                self.log(LogLevel::Warn, "session.end", timeout.to_string());
                self.reset_to_waiting().await;
            }
            TimerKind::ReturnGrace => {
                self.reset_to_waiting().await;
            }
        }
    }

    /// Send the time-up message once both sides are quiet, else poll again
    fn check_silence(&mut self) {
        if self.snapshot.phase != SessionPhase::Chatting || self.snapshot.show_end_button {
            return;
        }

        if self.activity.is_silent() {
            self.client.send_text(&self.config.prompts.time_up);
            self.snapshot.show_end_button = true;
            self.timers.clear(TimerKind::SilencePoll);
            self.log(LogLevel::Info, "session.timeup", "time-up message sent");
        } else {
            self.timers
                .arm_in(TimerKind::SilencePoll, self.config.silence_poll);
        }
    }

    /// Disconnect and stop capture
    async fn release_resources(&mut self) {
        self.client.disconnect();
        self.events = None;

        if let Err(e) = self.capture.stop().await {
            warn!("Failed to stop capture: {:#}", e);
        }
        self.chunks = None;
        self.volume = None;
    }

    async fn reset_to_waiting(&mut self) {
        self.timers.clear_all();
        self.setup_done = false;
        self.awaiting_end_turn = false;
        self.release_resources().await;
        self.playback.stop();
        self.activity.reset();

        self.snapshot.seconds_left = self.config.countdown.as_secs();
        self.snapshot.time_up = false;
        self.snapshot.show_end_button = false;
        self.set_phase(SessionPhase::Waiting);
    }
}
