//! Progress and speed telemetry for the active file.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::control::TransferControl;
use super::utils::format_transfer_speed;
use crate::{FileRecord, ProgressSample, TransferEvent};

/// Event channel plus sampling cadence for one session
#[derive(Debug, Clone)]
pub struct Telemetry {
    event_tx: mpsc::Sender<TransferEvent>,
    interval: Duration,
    control: Arc<TransferControl>,
}

impl Telemetry {
    pub fn new(event_tx: mpsc::Sender<TransferEvent>, interval: Duration, control: Arc<TransferControl>) -> Self {
        Self {
            event_tx,
            interval,
            control,
        }
    }

    /// Deliver an event, waiting for channel capacity.
    ///
    /// Once the session is cancelled the event is dropped instead, so a
    /// slow consumer never holds a cancelled worker. A caller that hung up
    /// is not an error for the worker.
    pub async fn emit(&self, event: TransferEvent) {
        tokio::select! {
            biased;
            _ = self.control.cancelled() => trace!("session cancelled, event dropped"),
            res = self.event_tx.send(event) => {
                if res.is_err() {
                    trace!("event receiver dropped");
                }
            }
        }
    }

    /// Deliver the session's terminal event. It is never dropped: after
    /// cancellation a full channel gets it from a detached task.
    pub async fn finish(&self, event: TransferEvent) {
        tokio::select! {
            biased;
            permit = self.event_tx.reserve() => match permit {
                Ok(permit) => permit.send(event),
                Err(_) => trace!("event receiver dropped"),
            },
            _ = self.control.cancelled() => {
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let _ = event_tx.send(event).await;
                });
            }
        }
    }

    pub async fn progress(&self, sample: ProgressSample) {
        self.emit(TransferEvent::Progress(sample)).await;
    }

    /// Sample reported while a file is being compressed and its wire size is unknown
    pub async fn indeterminate(&self, file_index: usize, file_name: &str) {
        self.progress(ProgressSample {
            file_index,
            file_name: file_name.to_string(),
            bytes_transferred: 0,
            total_bytes: None,
            speed_mbps: 0.0,
        })
        .await;
    }

    pub fn track(&self, record: FileRecord) -> FileProgress {
        FileProgress::new(record, self.interval)
    }
}

/// Byte accounting for the file currently on the wire
#[derive(Debug)]
pub struct FileProgress {
    record: FileRecord,
    interval: Duration,
    started_at: Instant,
    last_sample_at: Instant,
    last_sample_bytes: u64,
}

impl FileProgress {
    pub fn new(record: FileRecord, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            last_sample_bytes: record.bytes_transferred,
            record,
            interval,
            started_at: now,
            last_sample_at: now,
        }
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Account for `n` more bytes. Returns a sample once per interval.
    pub fn advance(&mut self, n: u64) -> Option<ProgressSample> {
        self.advance_at(n, Instant::now())
    }

    fn advance_at(&mut self, n: u64, now: Instant) -> Option<ProgressSample> {
        self.record.bytes_transferred += n;
        debug_assert!(self.record.bytes_transferred <= self.record.size_bytes);

        let elapsed = now.saturating_duration_since(self.last_sample_at);
        if elapsed < self.interval {
            return None;
        }

        let moved = self.record.bytes_transferred - self.last_sample_bytes;
        let speed_mbps = moved as f64 / 1_000_000.0 / elapsed.as_secs_f64();
        self.last_sample_at = now;
        self.last_sample_bytes = self.record.bytes_transferred;
        trace!(file = %self.record.display_name, bytes = self.record.bytes_transferred, speed_mbps, "progress");
        Some(self.sample(speed_mbps))
    }

    /// Final sample for the file. Speed 0 marks it as final.
    pub fn finish(&mut self) -> ProgressSample {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        debug!(
            file = %self.record.display_name,
            bytes = self.record.bytes_transferred,
            speed = %format_transfer_speed(self.record.bytes_transferred, elapsed),
            "file finished"
        );
        self.sample(0.0)
    }

    fn sample(&self, speed_mbps: f64) -> ProgressSample {
        ProgressSample {
            file_index: self.record.index,
            file_name: self.record.display_name.clone(),
            bytes_transferred: self.record.bytes_transferred,
            total_bytes: Some(self.record.size_bytes),
            speed_mbps,
        }
    }
}
