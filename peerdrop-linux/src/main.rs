// PeerDrop Linux: link controller, transfer server and client behind a small CLI.

mod channel;
mod client;
mod config;
mod controller;
mod radio;
mod server;
mod stream;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use peerdrop_core::{DropError, Notification, TransferDescriptor, TransferResult};
use tokio::sync::mpsc;

use controller::LinkController;
use radio::StaticRadio;

/// PeerDrop: direct device-to-device file transfer
#[derive(Parser)]
#[command(name = "peerdrop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover peers and print them
    Peers {
        /// Seconds to scan before printing
        #[arg(long, default_value_t = 3)]
        wait: u64,
    },

    /// Connect to a peer and send one file
    Send {
        /// Peer link address
        #[arg(short, long)]
        peer: String,

        /// File to send
        file: PathBuf,

        /// Name the receiver stores the file under (defaults to the file's own name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Connect as group owner and receive files
    Receive {
        /// Peer link address (defaults to the first configured peer)
        #[arg(short, long)]
        peer: Option<String>,

        /// Output directory (defaults to download_dir from config)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Number of files to accept before exiting
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load(cli.config);
    let radio = Arc::new(StaticRadio::from_config(&cfg));
    let (link, notifications) = LinkController::new(radio, cfg.clone());
    tokio::spawn(print_notifications(notifications));
    if !link.is_supported() {
        bail!("peer link is not supported on this device");
    }
    link.initialize().await.map_err(reply)?;
    tracing::debug!(enabled = link.is_enabled(), "peer link ready");

    let outcome = tokio::select! {
        r = run(&link, &cfg, cli.command) => r,
        r = shutdown_signal() => {
            tracing::info!("interrupted");
            r
        }
    };
    link.shutdown().await;
    outcome
}

async fn run(link: &LinkController, cfg: &config::Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Peers { wait } => {
            link.start_discovery().await.map_err(reply)?;
            tokio::time::sleep(Duration::from_secs(wait)).await;
            for peer in link.peers().await {
                println!("{}", serde_json::to_string(&peer)?);
            }
            link.stop_discovery().await.map_err(reply)?;
        }
        Commands::Send { peer, file, name } => {
            let size = std::fs::metadata(&file)
                .with_context(|| format!("cannot read {}", file.display()))?
                .len();
            let name = match name {
                Some(n) => n,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow!("{} has no file name", file.display()))?,
            };
            let descriptor =
                TransferDescriptor::new(file, name, i64::try_from(size)?).map_err(reply)?;
            link_up(link, cfg, &peer).await?;
            let result = link.send_file(descriptor).await.map_err(reply);
            let _ = link.disconnect().await;
            print_result(&result?)?;
        }
        Commands::Receive { peer, dir, count } => {
            let peer = match peer.or_else(|| cfg.peers.first().map(|p| p.address.clone())) {
                Some(p) => p,
                None => bail!("no peer given and none configured"),
            };
            let dir = dir.unwrap_or_else(|| cfg.download_dir.clone());
            link_up(link, cfg, &peer).await?;
            if let Some(addr) = link.listening_addr().await {
                tracing::info!(%addr, dir = %dir.display(), "waiting for files");
            }
            for _ in 0..count {
                let handle = link.spawn_receive(dir.clone()).await.map_err(reply)?;
                tracing::debug!(transfer = %handle.id(), "waiting for sender");
                print_result(&handle.join().await)?;
            }
            let _ = link.disconnect().await;
        }
    }
    Ok(())
}

/// Discover, connect to `peer` and wait until the link reports connected.
async fn link_up(link: &LinkController, cfg: &config::Config, peer: &str) -> anyhow::Result<()> {
    link.start_discovery().await.map_err(reply)?;
    link.connect(peer).await.map_err(reply)?;
    let deadline = tokio::time::Instant::now() + cfg.connect_timeout();
    while !link.connection().await.connected {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for link to {} ({:?})", peer, link.state().await);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

async fn print_notifications(mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(n) = rx.recv().await {
        match serde_json::to_string(&n) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "unprintable notification"),
        }
    }
}

fn print_result(result: &TransferResult) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(result)?);
    if !result.success {
        bail!(
            "transfer {} failed: {}",
            result.id,
            result.detail.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn reply(e: DropError) -> anyhow::Error {
    let r = e.to_reply();
    anyhow!("{}: {}", r.code, r.message)
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
