use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use voice_session::audio::DEFAULT_SINK_ID;
use voice_session::{
    create_router, AppState, AudioBackendFactory, CapturePipeline, Config, ControllerDeps,
    LiveClient, LogSink, MemoryLogSink, PhaseController, PlaybackPipeline, SessionPhase,
    SinkRegistry, WebSocketConnector,
};

#[derive(Parser)]
#[command(name = "voice-session", version, about = "Realtime voice session client")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/voice-session")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Run one session in the terminal (Ctrl-C ends it)
    Talk,
}

fn build_controller(
    cfg: &Config,
    sinks: &SinkRegistry,
    logs: Arc<dyn LogSink>,
) -> Result<PhaseController> {
    let api_key = cfg.live.api_key()?;
    let connector = WebSocketConnector::new(cfg.live.endpoint.clone(), api_key)
        .with_connect_timeout(Duration::from_secs(cfg.live.connect_timeout_secs));
    let client = LiveClient::new(Arc::new(connector), logs);

    // Create capture pipeline
    let backend = AudioBackendFactory::microphone(cfg.audio.source())
        .context("Failed to create microphone backend")?;
    let capture = CapturePipeline::new(backend, cfg.audio.backend_config());

    // Playback opens the shared output sink when model audio first arrives
    let output = cfg.audio.output.clone();
    let rate = cfg.audio.output_sample_rate;
    let playback = PlaybackPipeline::on_sink(sinks.clone(), DEFAULT_SINK_ID, rate, move || {
        AudioBackendFactory::output(&output, rate).context("Failed to open audio output")
    })
    .with_initial_buffer_time(cfg.audio.initial_buffer_ms as f64 / 1000.0);

    Ok(PhaseController::spawn(
        ControllerDeps {
            client,
            capture,
            playback,
        },
        cfg.live.model.clone(),
        cfg.session_config(),
        cfg.controller_config(),
    ))
}

async fn serve(cfg: Config, sinks: SinkRegistry) -> Result<()> {
    let logs = Arc::new(MemoryLogSink::new());
    let controller = Arc::new(build_controller(&cfg, &sinks, logs.clone())?);

    let app = create_router(AppState::new(controller.clone(), logs));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server failed")?;

    info!("Shutting down");
    controller.shutdown().await;
    Ok(())
}

async fn talk(cfg: Config, sinks: SinkRegistry) -> Result<()> {
    let logs = Arc::new(MemoryLogSink::new());
    let controller = build_controller(&cfg, &sinks, logs)?;
    let mut snapshots = controller.watch();

    controller
        .start()
        .await
        .context("Failed to start voice session")?;
    info!("Session started, press Ctrl-C to end it");

    let mut ending = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !ending => {
                info!("Ending session");
                ending = controller.end().await;
                if !ending {
                    break;
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }

                let snapshot = snapshots.borrow_and_update().clone();
                info!(
                    "phase={} left={}s assistant={} user={}",
                    snapshot.phase,
                    snapshot.seconds_left,
                    snapshot.assistant_speaking,
                    snapshot.user_speaking
                );

                if let Some(err) = &snapshot.last_error {
                    warn!("Session error: {}", err);
                }
                if snapshot.phase == SessionPhase::Waiting {
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Voice Session v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Model: {}", cfg.live.model);

    // Output devices live for the whole process
    let sinks = SinkRegistry::new();

    match cli.command {
        Command::Serve => serve(cfg, sinks).await,
        Command::Talk => talk(cfg, sinks).await,
    }
}
