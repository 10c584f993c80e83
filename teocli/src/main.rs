// Teonet L0 example client: login, peers and clients requests, echo round trip.

mod driver;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use teocli::{config, logging, Config, L0Client};
use teol0_core::{TransportKind, CLIENT_VERSION};
use tracing::{info, warn};

use crate::driver::Driver;

#[derive(Parser, Debug)]
#[command(name = "teocli", version, about = "Teonet L0 client example")]
struct Args {
    /// Name this client logs in with.
    client_name: Option<String>,
    /// L0 server address.
    server: Option<String>,
    /// L0 server port.
    port: Option<u16>,
    /// Peer that answers the requests.
    #[arg(default_value = "teostream")]
    peer_name: String,
    /// Echo message.
    #[arg(default_value = "Hello")]
    message: String,
    /// tcp or trudp.
    #[arg(long)]
    transport: Option<TransportKind>,
    /// Keep sending echoes until Ctrl+C.
    #[arg(long)]
    repeat: bool,
    /// Config file instead of the default search path.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log filter (error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(name) = args.client_name {
        cfg.client_name = name;
    }
    if let Some(server) = args.server {
        cfg.server = server;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(transport) = args.transport {
        cfg.transport = transport;
    }
    if let Some(level) = args.log_level {
        cfg.log_level = level;
    }
    logging::init(&cfg.log_level);
    info!(version = CLIENT_VERSION, "teocli starting");

    let rt = tokio::runtime::Runtime::new()?;
    let ok = rt.block_on(run(cfg, args.peer_name, args.message, args.repeat))?;
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run(cfg: Config, peer_name: String, message: String, repeat: bool) -> anyhow::Result<bool> {
    let driver = Driver::new(peer_name, message, repeat, cfg.echo_interval());
    let mut client = L0Client::connect(cfg.client_settings(), driver)
        .await
        .with_context(|| format!("can't connect to L0 server {}:{}", cfg.server, cfg.port))?;

    client
        .run_until(async {
            match shutdown_signal().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => warn!(error = %e, "can't listen for shutdown signals"),
            }
        })
        .await?;
    let driver = client.shutdown().await;
    Ok(driver.outcome() == Some(true))
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
