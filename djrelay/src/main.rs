//! djrelay - Main entry point
//!
//! Wires the frame pump, listener manager, broadcast endpoint and player
//! together and serves the control API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use djrelay::api::{self, AppContext};
use djrelay::audio::{FramePump, PumpSettings};
use djrelay::broadcast::{self, BroadcastServer};
use djrelay::config::RelayConfig;
use djrelay::content::{MemoryContentProvider, PassthroughResolver};
use djrelay::listeners::{ListenerManager, ListenerSettings};
use djrelay::notify::LogNotifier;
use djrelay::playback::{MetadataSink, Player, PlayerDeps, PlayerSettings};
use djrelay::process::CommandLauncher;
use djrelay::SharedState;

/// Command-line arguments for djrelay
#[derive(Parser, Debug)]
#[command(name = "djrelay")]
#[command(about = "Voice channel DJ relay with an HTTP broadcast endpoint")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "DJRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Control API bind address, overrides [api].bind
    #[arg(short, long, env = "DJRELAY_BIND")]
    bind: Option<String>,

    /// Broadcast endpoint bind address, overrides [broadcast].bind
    #[arg(short, long, env = "DJRELAY_STREAM_BIND")]
    stream_bind: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "djrelay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // CLI argument wins over the environment; clap already folded DJRELAY_CONFIG in
    let config_path = djrelay_common::config::resolve_config_path(args.config.as_deref(), "DJRELAY_CONFIG")
        .context("Failed to resolve configuration file")?;
    match &config_path {
        Some(path) => info!("Using configuration {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }
    let mut config = RelayConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.api.bind = bind;
    }
    if let Some(bind) = args.stream_bind {
        config.broadcast.bind = bind;
    }
    let config = Arc::new(config);

    info!("Starting djrelay v{} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));

    let state = Arc::new(SharedState::new());

    // Real-time pump thread
    let (pump_events_tx, pump_events_rx) = tokio::sync::mpsc::unbounded_channel();
    let pump = FramePump::start(
        PumpSettings::from_config(&config.pump, config.player.volume_percent),
        pump_events_tx,
    )
    .context("Failed to start frame pump")?;
    let pump_handle = pump.handle();

    let notifier = Arc::new(LogNotifier);
    let listeners = Arc::new(ListenerManager::new(
        ListenerSettings::from(&config.listeners),
        notifier.clone(),
    ));
    let timeout_task = listeners.spawn_timeout_task();

    let broadcast_server = if config.broadcast.enabled {
        let server = BroadcastServer::new(
            config.broadcast.clone(),
            config.pump.sink_queue_frames,
            Arc::clone(&listeners),
            Arc::clone(&state),
            Arc::new(CommandLauncher::new(config.broadcast.encoder_command.clone())),
            pump_handle.clone(),
        );
        Some(server)
    } else {
        info!("Broadcast endpoint disabled");
        None
    };
    let maintenance_task = broadcast_server.as_ref().map(BroadcastServer::spawn_maintenance);

    let provider = Arc::new(MemoryContentProvider::from_config(&config.library));
    let renewal_task = provider.spawn_credit_renewal();

    let metadata = broadcast_server
        .clone()
        .map(|server| Arc::new(server) as Arc<dyn MetadataSink>);
    let player = Player::start(
        PlayerDeps {
            state: Arc::clone(&state),
            listeners: Arc::clone(&listeners),
            provider,
            resolver: Arc::new(PassthroughResolver),
            decoder: Arc::new(CommandLauncher::new(config.player.decoder_command.clone())),
            notifier,
            metadata,
            pump: pump_handle,
        },
        PlayerSettings::from_config(&config),
        pump_events_rx,
    );

    let ctx = AppContext {
        state,
        player: player.clone(),
        listeners,
        broadcast: broadcast_server.clone(),
        config: Arc::clone(&config),
    };

    let api_listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("Failed to bind control API to {}", config.api.bind))?;
    info!("Control API listening on {}", config.api.bind);
    let api_server = axum::serve(api_listener, api::router(ctx)).with_graceful_shutdown(shutdown_signal());

    match &broadcast_server {
        Some(server) => {
            let stream_listener = tokio::net::TcpListener::bind(&config.broadcast.bind)
                .await
                .with_context(|| format!("Failed to bind broadcast endpoint to {}", config.broadcast.bind))?;
            info!(
                "Broadcast endpoint listening on {}{}",
                config.broadcast.bind, config.broadcast.path
            );
            let stream_server = axum::serve(stream_listener, broadcast::router(server.clone()))
                .with_graceful_shutdown(shutdown_signal());
            tokio::try_join!(
                async { api_server.await.context("Control API error") },
                async { stream_server.await.context("Broadcast endpoint error") },
            )?;
        }
        None => api_server.await.context("Control API error")?,
    }

    info!("Shutting down");
    player.shutdown().await;
    if let Some(server) = &broadcast_server {
        server.shutdown().await;
    }
    if let Some(task) = maintenance_task {
        task.abort();
    }
    timeout_task.abort();
    renewal_task.abort();
    pump.shutdown();

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
