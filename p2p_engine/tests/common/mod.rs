#![allow(dead_code)]

use p2p_engine::transfer::compress::Compressor;
use p2p_engine::transfer::constants::EVENT_CHANNEL_CAPACITY;
use p2p_engine::{SessionOutcome, TransferConfig, TransferEngine, TransferEvent};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init()
        .ok();
}

/// Per-side sandbox: its own scratch and download directories
pub struct Sandbox {
    pub root: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.path().join("scratch")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.root.path().join("downloads")
    }

    pub fn config(&self) -> TransferConfig {
        TransferConfig {
            download_dir: self.download_dir(),
            scratch_dir: self.scratch_dir(),
            progress_interval_ms: 10,
            pause_poll_ms: 10,
            ..TransferConfig::default()
        }
    }

    pub fn write_file(&self, name: &str, data: &[u8]) -> PathBuf {
        let dir = self.root.path().join("outbox");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }
}

/// Files left in `dir`, empty if it does not exist
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Deterministic bytes that zstd cannot shrink much
pub fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    Compressor::default()
        .compress(&mut &data[..], &mut out)
        .unwrap();
    out
}

pub fn decompress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    Compressor::default()
        .decompress(&mut &data[..], &mut out)
        .unwrap();
    out
}

pub fn metadata_frame(name: &str) -> Vec<u8> {
    let json = format!(r#"{{"fileName":"{}"}}"#, name);
    let mut frame = (json.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(json.as_bytes());
    frame
}

/// Raw metadata + data frame for hand-built wire traces
pub fn file_frames(name: &str, payload: &[u8]) -> Vec<u8> {
    let mut wire = metadata_frame(name);
    wire.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    wire.extend_from_slice(payload);
    wire
}

pub const TERMINATION: [u8; 4] = [0, 0, 0, 0];

pub fn is_terminal(event: &TransferEvent) -> bool {
    matches!(
        event,
        TransferEvent::Complete { .. } | TransferEvent::Error(_) | TransferEvent::Cancelled
    )
}

/// Collect events up to and including the terminal one
pub async fn collect_until_terminal(rx: &mut mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for terminal event")
            .expect("event channel closed");
        let done = is_terminal(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Everything currently queued, without waiting
pub fn drain(rx: &mut mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Consume events in the background so workers never block on a full channel
pub fn spawn_collector(mut rx: mpsc::Receiver<TransferEvent>) -> JoinHandle<Vec<TransferEvent>> {
    tokio::spawn(async move { collect_until_terminal(&mut rx).await })
}

pub fn progress_of(events: &[TransferEvent], file_name: &str) -> Vec<(u64, Option<u64>, f64)> {
    events
        .iter()
        .filter_map(|event| match event {
            TransferEvent::Progress(s) if s.file_name == file_name => {
                Some((s.bytes_transferred, s.total_bytes, s.speed_mbps))
            }
            _ => None,
        })
        .collect()
}

pub struct PairRun {
    pub sender: SessionOutcome,
    pub receiver: SessionOutcome,
    pub sender_events: Vec<TransferEvent>,
    pub receiver_events: Vec<TransferEvent>,
}

/// Run one sender engine against one receiver engine over an in-memory pipe
pub async fn run_pair(sender_box: &Sandbox, receiver_box: &Sandbox, files: Vec<PathBuf>) -> PairRun {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (sender_tx, sender_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (receiver_tx, receiver_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let sender_events = spawn_collector(sender_rx);
    let receiver_events = spawn_collector(receiver_rx);

    let sender = TransferEngine::new(sender_box.config(), sender_tx);
    let receiver = TransferEngine::new(receiver_box.config(), receiver_tx);

    let receiving = receiver
        .start_receive(server, receiver_box.download_dir())
        .unwrap();
    let sending = sender.start_send(client, files).unwrap();
    let (sender_outcome, receiver_outcome) = tokio::join!(sending.wait(), receiving.wait());

    PairRun {
        sender: sender_outcome,
        receiver: receiver_outcome,
        sender_events: sender_events.await.unwrap(),
        receiver_events: receiver_events.await.unwrap(),
    }
}
