//! wstcp server
//!
//! Accepts WebSocket upgrades on the configured paths and relays each
//! session to the TCP destination bound to its path.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use wstcp::{
    config::{Config, RouteTable},
    server::Server,
    transport::tls,
};

/// wstcp server - relay WebSocket sessions to TCP destinations
#[derive(Parser, Debug)]
#[command(name = "wstcp-server")]
#[command(about = "Relay WebSocket sessions to TCP destinations")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Route table file (overrides config)
    #[arg(short, long)]
    routes: Option<PathBuf>,

    /// Log level (overrides config; trace, debug, info, warn, error)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    let server_config = config.server;

    // Initialize logging
    let log_level = args.log_level.unwrap_or(config.logging.level);
    tracing_subscriber::fmt().with_env_filter(&log_level).init();

    // Load routes
    let routes_path = args.routes.unwrap_or(server_config.routes);
    let routes = RouteTable::load(&routes_path)
        .with_context(|| format!("Failed to load routes from {}", routes_path.display()))?;
    if routes.is_empty() {
        warn!("No routes configured - every upgrade will be refused");
    }
    if !routes.skipped().is_empty() {
        warn!("Skipped {} malformed route line(s)", routes.skipped().len());
    }

    // Load TLS configuration if cert/key are provided
    let tls_acceptor = match (&server_config.tls_cert, &server_config.tls_key) {
        (Some(cert_path), Some(key_path)) => {
            let acceptor = tls::build_acceptor(cert_path, key_path)
                .context("Failed to set up TLS")?;
            info!("TLS enabled with cert: {}", cert_path.display());
            Some(acceptor)
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("TLS needs both tls_cert and tls_key - serving plain WebSocket");
            None
        }
        (None, None) => {
            info!("TLS disabled (no tls_cert/tls_key configured)");
            None
        }
    };

    // Determine listen address
    let listen_addr = args.listen.unwrap_or(server_config.listen);

    // Start server
    info!("wstcp server v{}", wstcp::VERSION);
    info!("Listening on {} with {} route(s)", listen_addr, routes.len());

    let listener = TcpListener::bind(&listen_addr)
        .await
        .context("Failed to bind to address")?;
    let server = Arc::new(Server::new(routes, tls_acceptor));

    tokio::select! {
        _ = server.serve(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
