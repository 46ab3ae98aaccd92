//! HTTP server entrypoint.
use anyhow::{Context, Result};
use clap::Parser;
use docchat::{api, config, logging};
use std::sync::Arc;
use tokio::net::TcpListener;

const PORT_RANGE: std::ops::RangeInclusive<u16> = 8000..=8099;

#[derive(Parser)]
#[command(name = "docchat", about = "Chat with uploaded documents over HTTP")]
struct Cli {
    /// Interface to bind (overrides SERVER_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Port to bind (overrides SERVER_PORT); the first free port in 8000-8099 when unset.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    logging::init_tracing();
    let config = config::init_config().context("invalid configuration")?;

    let state = api::AppState::from_config(config).context("failed to initialize providers")?;
    let app = api::create_router(Arc::new(state), api::cors_layer(&config.allowed_origins));

    let host = cli.host.unwrap_or_else(|| config.server_host.clone());
    let (listener, port) = bind_listener(&host, cli.port.or(config.server_port))
        .await
        .with_context(|| format!("failed to bind {host}"))?;
    tracing::info!("Listening on http://{}:{}", host, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;
    Ok(())
}

async fn bind_listener(
    host: &str,
    port: Option<u16>,
) -> Result<(TcpListener, u16), std::io::Error> {
    if let Some(port) = port {
        return TcpListener::bind((host, port))
            .await
            .map(|listener| (listener, port));
    }

    for port in PORT_RANGE {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8000-8099",
    ))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
