//! R-Hat Live
//!
//! Connects microphone, speaker and submitted camera frames to the agent
//! bridge and serves the local control API.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rhat_live::{
    audio::device::list_devices,
    config::AppConfig,
    events::SessionEvent,
    tools::DisabledVision,
    ui::WebServer,
    SessionController,
};

#[derive(Parser, Debug)]
#[command(name = "rhat-live", version, about = "Live agent session with local object tracking")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Agent bridge WebSocket endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Key sent with START_SESSION
    #[arg(long, env = "RHAT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Control API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Run without microphone and speaker
    #[arg(long)]
    no_audio: bool,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Start the session immediately instead of waiting for the API
    #[arg(long)]
    autostart: bool,
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path),
        None => AppConfig::load_default(),
    }
    .context("Failed to load configuration")?;

    if let Some(endpoint) = &cli.endpoint {
        config.session.endpoint = endpoint.clone();
    }
    if let Some(api_key) = &cli.api_key {
        config.session.api_key = api_key.clone();
    }
    if let Some(port) = cli.http_port {
        config.ui.http_port = port;
    }
    if cli.no_audio {
        config.audio.enabled = false;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        print_devices();
        return Ok(());
    }

    let config = load_config(&cli)?;
    tracing::info!("Starting R-Hat Live");
    if config.session.api_key.is_empty() {
        tracing::warn!("No API key configured; the bridge may reject the session");
    }

    // Detection and identification are provided by embedding applications
    let controller = Arc::new(SessionController::new(
        config.clone(),
        Arc::new(DisabledVision),
        Arc::new(DisabledVision),
    ));

    // Mirror session events into the log
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Transcript(utterance) => {
                    tracing::info!("[{}] {}", utterance.speaker, utterance.text);
                }
                SessionEvent::AiState { state } => tracing::info!("AI: {}", state),
                SessionEvent::ObjectHighlighted { tracker_id, label, .. } => {
                    tracing::info!("Tracking '{}' as {}", label, tracker_id);
                }
                _ => {}
            }
        }
    });

    let web_handle = if config.ui.enabled {
        let server = WebServer::new(config.ui.clone(), controller.clone());
        tracing::info!(
            "Control API at http://{}:{}",
            config.ui.bind_address,
            config.ui.http_port
        );
        Some(server.start_background())
    } else {
        None
    };

    if cli.autostart {
        controller.start().await.context("Failed to start session")?;
    } else {
        tracing::info!("Waiting for POST /api/session/start");
    }

    tracing::info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("Shutting down");
    controller.stop().await;
    if let Some(handle) = web_handle {
        handle.abort();
    }

    Ok(())
}
