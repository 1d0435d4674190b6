//! MIDI Cue Hub
//!
//! Bridges a MIDI controller with any number of WebSocket clients and drives
//! a shared scene/cue display.

use midi_cue_hub::adapters::{self, SharedOutput, SilentOutput};
use midi_cue_hub::{api, config, coordinator::Coordinator, hub, scenes::SceneEngine};

use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "midi_cue_hub=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting MIDI Cue Hub v{} ({})",
        env!("MCH_VERSION"),
        env!("MCH_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, port: {}, broadcaster: {}",
        config.port,
        config.broadcaster
    );

    let scenes = Arc::new(
        SceneEngine::load(&config.scenes_path)
            .with_context(|| format!("loading scenes from {}", config.scenes_path.display()))?,
    );

    // Open MIDI hardware
    let (output, input): (SharedOutput, _) = match adapters::midi::setup(&config.midi) {
        Ok(bridge) => {
            let (output, input) = bridge.into_parts();
            let output: SharedOutput = output;
            (output, Some(input))
        }
        Err(e) if config.midi.required => {
            bail!("MIDI setup failed: {} (set midi.required = false to run network-only)", e)
        }
        Err(e) => {
            tracing::warn!("MIDI setup failed, running network-only: {}", e);
            (Arc::new(SilentOutput), None)
        }
    };
    output.flush_all_notes();

    let shutdown = CancellationToken::new();
    let broadcaster = config.broadcaster.build(config.buffered_grace());
    let hub = hub::Hub::new(
        hub::HubConfig::from(&config),
        scenes,
        broadcaster,
        output.clone(),
        shutdown.clone(),
    );
    let handle = hub.handle();

    let mut coordinator = Coordinator::new(shutdown.clone(), output);
    coordinator.spawn_hub(hub);
    coordinator.spawn_scene_ticker(handle.dispatcher(), config.scene_interval());
    if let Some(input) = input {
        coordinator.spawn_midi_listener(input, handle.dispatcher());
    }

    let app = api::router(api::AppState::new(handle), &config.static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => signal_token.cancel(),
            _ = signal_token.cancelled() => {}
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    // Cleanup: stop tasks, silence the hardware
    tracing::info!("Shutting down...");
    coordinator.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
