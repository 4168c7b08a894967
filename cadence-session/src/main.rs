//! Cadence playback session service - main entry point
//!
//! Runs one playback session on the simulated transport and exposes it over
//! HTTP. The process exits on Ctrl+C / SIGTERM or once the lifecycle
//! supervisor tears the session down.

use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_common::config::{resolve_config_path, TomlConfig};
use cadence_session::api::{self, AppContext};
use cadence_session::playback::{Catalog, MemoryCatalog, SimulatedTransport, SimulatorConfig};
use cadence_session::{endpoint, LifecycleSupervisor, SessionBuilder, SessionController};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for cadence-session
#[derive(Parser, Debug)]
#[command(name = "cadence-session")]
#[command(about = "Playback session and queue engine")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP port, overrides the port of `[http] bind`
    #[arg(short, long, env = "CADENCE_PORT")]
    port: Option<u16>,

    /// Log level, overrides `[logging] level` (RUST_LOG still wins)
    #[arg(long, env = "CADENCE_LOG_LEVEL")]
    log_level: Option<String>,

    /// JSON file with an array of tracks for the in-memory catalog
    #[arg(long, env = "CADENCE_LIBRARY")]
    library: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config, args.log_level.as_deref())?;

    match resolve_config_path(args.config.as_deref()) {
        Some(path) if path.exists() => info!("Configuration: {}", path.display()),
        Some(path) => warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        ),
        None => info!("Configuration: built-in defaults"),
    }

    let catalog: Arc<dyn Catalog> = match &args.library {
        Some(path) => Arc::new(
            MemoryCatalog::from_json_file(path)
                .with_context(|| format!("Failed to load library {}", path.display()))?,
        ),
        None => Arc::new(MemoryCatalog::new()),
    };

    let transport = SimulatedTransport::new(SimulatorConfig::from(&config.simulator));
    let session = Arc::new(
        SessionBuilder::new(transport)
            .catalog(catalog)
            .settings(config.session.clone())
            .spawn(),
    );
    info!("Playback session {} ready", session.id());

    let (publisher, session_endpoint) = endpoint();
    let supervisor = LifecycleSupervisor::start(Arc::clone(&session), publisher);

    let mut controller = SessionController::new(session_endpoint);
    controller
        .connect(config.session.connect_timeout())
        .await
        .context("Failed to connect controller to session")?;
    let controller = Arc::new(controller);

    let stop = {
        let supervisor = Arc::clone(&supervisor);
        async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = supervisor.wait_for_teardown() => {
                    info!("Session torn down, exiting");
                }
            }
        }
    };

    if config.http.enabled {
        let bind = bind_address(&config.http.bind, args.port)?;
        let ctx = AppContext::new(controller, Arc::clone(&supervisor));
        api::run(&bind, ctx, stop)
            .await
            .context("HTTP server failed")?;
    } else {
        info!("HTTP remote control disabled");
        stop.await;
    }

    supervisor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Install the tracing subscriber
///
/// RUST_LOG wins, then `--log-level`, then `[logging] level`.
fn init_tracing(config: &TomlConfig, cli_level: Option<&str>) -> Result<()> {
    let level = cli_level.unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cadence_session={level},cadence_common={level},tower_http={level}"
        ))
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn bind_address(bind: &str, port: Option<u16>) -> Result<String> {
    let mut addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid [http] bind address {}", bind))?;
    if let Some(port) = port {
        addr.set_port(port);
    }
    Ok(addr.to_string())
}

/// Graceful shutdown signal handler
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
