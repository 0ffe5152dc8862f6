use anyhow::{Context, Result};
use greeter_core::{ContentPools, InteractionStateMachine};
use greeter_io::{AudioOutput, CommandAudio, CommandDetector, SqliteStats};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod poller;
mod render;

use config::Config;
use dbus_interface::{GreeterService, BUS_NAME, OBJECT_PATH};
use engine::{Engine, EngineHandle};
use render::TraceRenderer;

async fn serve_dbus(engine: EngineHandle) -> zbus::Result<zbus::Connection> {
    zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, GreeterService::new(engine))?
        .build()
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "greeterd starting");

    let config = Config::from_env().context("loading configuration")?;

    // Detector and stats store are required; content and audio degrade.
    let detector = CommandDetector::spawn(&config.detector_cmd, config.detector_timeout())
        .context("starting detector sidecar")?;
    let stats = SqliteStats::open(&config.db_path).context("opening stats database")?;

    let pools = ContentPools::load_or_fallback(&config.content_path);
    let mut audio = CommandAudio::new(
        &config.player_cmd,
        config.tts_cmd.as_deref(),
        &config.assets_dir,
    )
    .context("configuring audio player")?;
    audio.load_clips(&pools);

    let feed = poller::spawn_poller(detector, config.detection_interval());
    let machine = InteractionStateMachine::new(config.machine.clone(), pools, Instant::now());
    let engine = Engine::new(
        machine,
        audio,
        stats,
        TraceRenderer::new(),
        feed,
        config.surface,
        config.content_path.clone(),
    )
    .spawn(config.tick_interval());

    tracing::info!(
        stable_frames = config.machine.stable_frames,
        talk_end = ?config.machine.talk_end,
        after_talk = ?config.machine.after_talk,
        tick_hz = config.tick_hz,
        "greeter running"
    );

    let _connection = match serve_dbus(engine.clone()).await {
        Ok(connection) => {
            tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");
            Some(connection)
        }
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable; admin interface disabled");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("greeterd shutting down");
    drop(engine);

    Ok(())
}
