use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tunnel_proxy::config::Config;
use tunnel_proxy::{ConnectionKind, TunnelError, TunnelProxy};

#[derive(Parser, Debug)]
#[command(name = "tunnel-proxy", version, about = "Local TCP port bridged to a remote tunnel")]
struct Cli {
    /// YAML config file
    #[arg(long, env = "TUNNEL_CONFIG")]
    config: Option<PathBuf>,

    /// Local port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Tunnel to the remote SSH daemon
    #[arg(long)]
    ssh: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => {
            let path = path.clone();
            Config::from_lookup(move |key| match key {
                "TUNNEL_CONFIG" => Some(path.display().to_string()),
                _ => std::env::var(key).ok(),
            })?
        }
        None => Config::load()?,
    };
    if let Some(port) = cli.port {
        cfg.local_port = port;
    }
    if cli.ssh {
        cfg.kind = ConnectionKind::Ssh;
    }

    let proxy = TunnelProxy::with_options(
        cfg.local_port,
        cfg.endpoint()?,
        cfg.credential(),
        cfg.kind,
        cfg.proxy_options(),
    )
    .context("Failed to create tunnel proxy")?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    match proxy.run_until(shutdown).await {
        Ok(_) => Ok(()),
        Err(TunnelError::Cancelled(_)) => {
            tracing::info!("Start cancelled");
            Ok(())
        }
        Err(e) => Err(e).context("Failed to start tunnel proxy"),
    }
}
