//! wstcp client
//!
//! Connects standard input and standard output to a tunnel endpoint:
//! - bytes read from stdin are sent to the server's destination
//! - bytes the destination sends back are written to stdout
//!
//! The exit code is the number of errors seen during the session.

use anyhow::{Context, Result};
use clap::Parser;
use std::process;
use tracing::{debug, info};
use wstcp::{config::ClientConfig, transport::websocket, tunnel::ClientRelay};

/// wstcp client - tunnel stdin/stdout over a WebSocket
#[derive(Parser, Debug)]
#[command(name = "wstcp-client")]
#[command(about = "Tunnel standard input and output through a WebSocket endpoint")]
#[command(version)]
struct Args {
    /// Endpoint URL (ws://, wss://, http:// or https://)
    endpoint: String,

    /// Scramble the tunnelled bytes with a per-session key
    #[arg(long, overrides_with = "no_scramble")]
    scramble: bool,

    /// Send the tunnelled bytes as they are (default)
    #[arg(long, overrides_with = "scramble")]
    no_scramble: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "warn")]
    log_level: String,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    // stdout carries tunnel data, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .with_writer(std::io::stderr)
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let code = match start(args) {
        Ok(errors) => {
            debug!("Session finished with {} error(s)", errors);
            errors.min(255) as i32
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };

    // Exit without dropping the runtime: the stdin reader may still be
    // blocked and would hold up runtime shutdown.
    process::exit(code);
}

fn start(args: Args) -> Result<usize> {
    let config = ClientConfig::new(&args.endpoint, args.scramble)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let errors = runtime.block_on(run(config))?;

    std::mem::forget(runtime);
    Ok(errors)
}

async fn run(config: ClientConfig) -> Result<usize> {
    let key = config.session_key();
    let url = config.session_url(key);

    info!("wstcp client v{}", wstcp::VERSION);
    debug!("Connecting to {}", url);
    let (sink, source) = websocket::connect(&url)
        .await
        .with_context(|| format!("Failed to connect to {}", config.session_url(None)))?;
    info!(
        "Session open{}",
        if key.is_some() { " (scrambled)" } else { "" }
    );

    let relay = ClientRelay::new(key);
    Ok(relay
        .run(sink, source, tokio::io::stdin(), stdout_writer())
        .await)
}

/// Standard output as a writer that closes the descriptor when dropped, so
/// readers of our stdout see EOF once the peer's stream has ended.
#[cfg(unix)]
fn stdout_writer() -> tokio::fs::File {
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    let raw = std::io::stdout().as_raw_fd();
    // SAFETY: the descriptor is open for the life of the process and nothing
    // else in the client writes to it or closes it once the relay owns it.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    tokio::fs::File::from_std(std::fs::File::from(fd))
}

#[cfg(not(unix))]
fn stdout_writer() -> tokio::io::Stdout {
    tokio::io::stdout()
}
