//! The pirate webhook dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use pirate_server::{routes, Server};

#[derive(Parser)]
#[command(name = "pirate")]
#[command(about = "Run pre-configured scripts when a signed webhook arrives", long_about = None)]
struct Cli {
    /// Path to the configuration file (falls back to $PIRATE_CONFIG_PATH,
    /// then ./ship.yml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (cfg, source) =
        pirate_config::load(cli.config.as_deref()).context("could not load configuration")?;

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let request_timeout = cfg.server.request_timeout;

    let server = Arc::new(Server::new(cfg).context("could not initialize server")?);

    let app = routes::router(server.clone())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    info!(addr = %addr, source = %source, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    server.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
