use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ptz_gateway::camera::SimCameraFactory;
use ptz_gateway::config::{ConfigStore, GatewayConfig};
use ptz_gateway::state::AppState;
use ptz_gateway::web;

/// How long to wait for camera streams to drain on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// ptz-gateway command line arguments
#[derive(Parser, Debug)]
#[command(name = "ptz-gateway")]
#[command(version, about = "HTTP gateway for PTZ camera control and shared MJPEG streams", long_about = None)]
struct CliArgs {
    /// Listen address (overrides config file)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Path to a JSON config file (defaults are used if it does not exist)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting ptz-gateway v{}", env!("CARGO_PKG_VERSION"));

    let config_store = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            ConfigStore::load(path).await?
        }
        None => ConfigStore::in_memory(GatewayConfig::default())?,
    };
    let config = config_store.get();

    let bind_address = args.address.unwrap_or_else(|| config.web.bind_address.clone());
    let bind_port = args.port.unwrap_or(config.web.http_port);
    let ip: IpAddr = bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", bind_address))?;

    let cameras = Arc::new(SimCameraFactory::new(config.camera.clone()));
    let shutdown = CancellationToken::new();
    let state = AppState::new(config_store, cameras, shutdown.clone());

    let app = web::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(SocketAddr::new(ip, bind_port)).await?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    cleanup(&state).await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C after cancelling every viewer session
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Unable to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

/// Give idle streams a chance to release their cameras
async fn cleanup(state: &Arc<AppState>) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !state.streams.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let remaining = state.streams.len();
    if remaining > 0 {
        tracing::warn!("{} camera streams still open at shutdown", remaining);
    }
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "ptz_gateway=error,tower_http=error",
        LogLevel::Warn => "ptz_gateway=warn,tower_http=warn",
        LogLevel::Info => "ptz_gateway=info,tower_http=info",
        LogLevel::Verbose => "ptz_gateway=debug,tower_http=info",
        LogLevel::Debug => "ptz_gateway=debug,tower_http=debug",
        LogLevel::Trace => "ptz_gateway=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
