mod actuator;
mod address;
mod config;
mod coordinator;
mod db;
mod error;
mod frame;
mod mqtt;
mod overrides;
mod radio;
mod state;
mod store;
mod thresholds;
mod web;

use anyhow::Result;
use std::env;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use coordinator::Coordinator;
use mqtt::MqttRadio;
use overrides::{ChannelOverrideSource, FileOverrideSource, OverrideFeed};
use state::SystemState;
use store::Storage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "coordinator.toml".to_string());
    let cfg = config::load(&config_path)?;

    let endpoints = cfg.endpoints()?;
    let thresholds = cfg.thresholds()?;
    let plants = cfg.plants()?;
    if thresholds.is_empty() {
        warn!("no nodes configured; every frame will be stored but not evaluated");
    }
    info!(
        config = %config_path,
        nodes = thresholds.len(),
        plants = plants.len(),
        irrigation = %endpoints.irrigation,
        light = %endpoints.light,
        frame_bytes = frame::schema_len(&frame::READING_SCHEMA),
        "config loaded"
    );

    // ── Storage ─────────────────────────────────────────────────────
    let storage = Storage::open(&cfg.storage).await?;
    info!(backend = ?cfg.storage.backend, "storage ready");

    // ── Shared state (status mirror for the web API) ────────────────
    let shared = SystemState::shared();
    shared
        .write()
        .await
        .record_system("coordinator started".to_string());

    // ── Web server ──────────────────────────────────────────────────
    let (override_tx, override_rx) = mpsc::channel(cfg.overrides.queue_capacity);
    let web_state = web::AppState {
        shared: shared.clone(),
        overrides: override_tx,
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state).await {
            error!("status api stopped: {e:#}");
        }
    });

    // ── Radio ───────────────────────────────────────────────────────
    let radio = MqttRadio::connect(&cfg.mqtt, &cfg.radio, shared.clone());

    // ── Control loop ────────────────────────────────────────────────
    let mut coordinator = Coordinator::new(radio, storage, thresholds, plants, endpoints, shared)
        .with_receive_timeout(cfg.receive_timeout());

    if cfg.overrides.file_enabled {
        info!(path = %cfg.overrides.file.display(), "watching override file");
        coordinator = coordinator.with_override_source(OverrideFeed::File(
            FileOverrideSource::new(&cfg.overrides.file),
        ));
    }
    coordinator =
        coordinator.with_override_source(OverrideFeed::Channel(ChannelOverrideSource::new(override_rx)));

    // Nothing reports the real actuator state at boot.
    warn!("assuming every pump and light is OFF at startup; physical state may differ");

    coordinator.run().await;
    Ok(())
}
