use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

pub mod config;
pub mod error;
pub mod net;
pub mod transfer;

pub use config::TransferConfig;
pub use error::{ErrorKind, ErrorReport, TransferError};
pub use transfer::{SessionHandle, SessionOutcome, TransferEngine};

/// Which side of the connection a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Sender,
    Receiver,
}

/// Per-file accounting while bytes move.
///
/// `size_bytes` is the payload length on the wire (the compressed size).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub display_name: String,
    /// Local source path (sender only)
    pub original_path: Option<PathBuf>,
    pub size_bytes: u64,
    pub bytes_transferred: u64,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    pub file_index: usize,
    pub file_name: String,
    pub bytes_transferred: u64,
    /// `None` while the size is not known yet (compression pre-pass)
    pub total_bytes: Option<u64>,
    /// Zero on the final sample of a file
    pub speed_mbps: f64,
}

//Struct command from the application to the engine
#[derive(Debug)]
pub enum TransferCommand {
    StartSend {
        connection: TcpStream,
        files: Vec<PathBuf>,
    },
    StartReceive {
        connection: TcpStream,
        download_dir: PathBuf,
    },
    Pause,
    Resume,
    Cancel,
}

//Struct report from the engine to the application
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress(ProgressSample),

    /// Sender: a source file vanished or is not a regular file
    FileSkipped {
        file_name: String,
        reason: String,
    },

    /// Receiver: file decompressed into the destination directory
    FileReceived {
        file_name: String,
        path: PathBuf,
    },

    /// Local flow control only, the peer is never told
    Paused,
    Resumed,

    /// Terminal events, exactly one per session
    Complete {
        files: usize,
    },
    Error(ErrorReport),
    Cancelled,
}

/// Drive a [`TransferEngine`] from a command channel until it closes
pub async fn run_engine(
    config: TransferConfig,
    mut cmd_rx: mpsc::Receiver<TransferCommand>,
    event_tx: mpsc::Sender<TransferEvent>,
) {
    let engine = TransferEngine::new(config, event_tx.clone());

    while let Some(cmd) = cmd_rx.recv().await {
        let started = match cmd {
            TransferCommand::StartSend { connection, files } => {
                tracing::info!("Initiating transfer of {} files", files.len());
                let _ = connection.set_nodelay(true);
                Some(engine.start_send(connection, files))
            }
            TransferCommand::StartReceive {
                connection,
                download_dir,
            } => {
                tracing::info!("Receiving into {}", download_dir.display());
                Some(engine.start_receive(connection, download_dir))
            }
            TransferCommand::Pause => {
                if !engine.pause() {
                    tracing::debug!("Pause ignored: no active session");
                }
                None
            }
            TransferCommand::Resume => {
                if !engine.resume() {
                    tracing::debug!("Resume ignored: no active session");
                }
                None
            }
            TransferCommand::Cancel => {
                if !engine.cancel() {
                    tracing::debug!("Cancel ignored: no active session");
                }
                None
            }
        };

        // The worker reports its own outcome through events
        if let Some(Err(e)) = started {
            tracing::warn!("Rejected start command: {}", e);
            let _ = event_tx.send(TransferEvent::Error(e.report())).await;
        }
    }
}
