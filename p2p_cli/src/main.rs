use anyhow::{Result, bail};
use clap::Parser;
use p2p_engine::transfer::constants::EVENT_CHANNEL_CAPACITY;
use p2p_engine::transfer::utils::format_speed_mbps;
use p2p_engine::{TransferCommand, TransferConfig, TransferEvent, net, run_engine};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod args;

use args::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (RUST_LOG, P2P_ENGINE_CONFIG_DIR)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = TransferConfig::load();
    if let Some(dir) = args.scratch_dir {
        config.scratch_dir = dir;
    }
    if let Some(level) = args.level {
        config.compression_level = level;
    }

    let (tx_cmd, rx_cmd) = mpsc::channel::<TransferCommand>(16);
    let (tx_event, mut rx_event) = mpsc::channel::<TransferEvent>(EVENT_CHANNEL_CAPACITY);

    let start = match args.command {
        Command::Send { to, files } => TransferCommand::StartSend {
            connection: net::connect(to).await?,
            files,
        },
        Command::Receive { bind, dir } => {
            let listener = net::bind(bind).await?;
            let (connection, _peer) = net::accept_one(listener).await?;
            TransferCommand::StartReceive {
                connection,
                download_dir: dir.unwrap_or_else(|| config.download_dir.clone()),
            }
        }
    };

    tokio::spawn(run_engine(config, rx_cmd, tx_event));
    tx_cmd.send(start).await?;

    // Ctrl-C cancels the running session
    let cancel_tx = tx_cmd.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfer...");
            let _ = cancel_tx.send(TransferCommand::Cancel).await;
        }
    });

    while let Some(event) = rx_event.recv().await {
        match event {
            TransferEvent::Progress(sample) => match sample.total_bytes {
                None => info!("[{}] {}: compressing...", sample.file_index, sample.file_name),
                Some(total) if sample.speed_mbps == 0.0 && sample.bytes_transferred == total => {
                    info!("[{}] {}: done ({} bytes)", sample.file_index, sample.file_name, total)
                }
                Some(total) => info!(
                    "[{}] {}: {}/{} bytes @ {}",
                    sample.file_index,
                    sample.file_name,
                    sample.bytes_transferred,
                    total,
                    format_speed_mbps(sample.speed_mbps)
                ),
            },
            TransferEvent::FileSkipped { file_name, reason } => {
                warn!("Skipped {}: {}", file_name, reason)
            }
            TransferEvent::FileReceived { path, .. } => info!("Saved {}", path.display()),
            TransferEvent::Paused => info!("Paused"),
            TransferEvent::Resumed => info!("Resumed"),
            TransferEvent::Complete { files } => {
                info!("✓ Transfer complete ({} files)", files);
                return Ok(());
            }
            TransferEvent::Cancelled => bail!("transfer cancelled"),
            TransferEvent::Error(report) => {
                error!("{}", report);
                bail!("transfer failed: {}", report.message);
            }
        }
    }

    bail!("engine stopped without reporting an outcome")
}
