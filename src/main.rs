use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use request_observability::lifecycle::{self, Shutdown};
use request_observability::observability::logging::init_tracing;
use request_observability::{HttpServer, Telemetry};

#[derive(Parser)]
#[command(name = "request-observability")]
#[command(about = "HTTP service with request metrics, tracing and structured logs", long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = lifecycle::startup::resolve_config(args.config.as_deref())?;

    let _log_guard = init_tracing(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "request-observability starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        service = %config.observability.service_name,
        routes = config.routes.templates.len(),
        "Configuration loaded"
    );

    let telemetry = Telemetry::from_config(&config)?;
    lifecycle::announce_startup(&telemetry);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(lifecycle::wait_for_signal(shutdown));

    let server = HttpServer::new(config, telemetry);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
