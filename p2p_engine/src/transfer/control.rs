//! Pause/resume/cancel flags shared between the caller and the worker.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TransferError};

use super::constants::PAUSE_POLL_INTERVAL;

/// Shared control state for one session.
///
/// `paused` toggles freely. `cancelled` only ever goes from false to true.
#[derive(Debug)]
pub struct TransferControl {
    paused: AtomicBool,
    cancel_token: CancellationToken,
    poll_interval: Duration,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        Self::with_poll_interval(PAUSE_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
            poll_interval,
        }
    }

    /// Returns true if the flag actually changed
    pub fn pause(&self) -> bool {
        !self.paused.swap(true, Ordering::SeqCst)
    }

    /// Returns true if the flag actually changed
    pub fn resume(&self) -> bool {
        self.paused.swap(false, Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Per-chunk gate: blocks while paused, fails once cancelled.
    pub async fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        if self.is_paused() {
            debug!("worker paused");
            while self.is_paused() {
                tokio::select! {
                    _ = self.cancel_token.cancelled() => return Err(TransferError::Cancelled),
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
            debug!("worker resumed");
        }

        if self.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        Ok(())
    }

    /// Resolves once the session is cancelled.
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await
    }

    /// Drives `fut` to completion unless the session is cancelled first.
    pub async fn interruptible<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(TransferError::Cancelled),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_pause_resume_report_changes() {
        let control = TransferControl::new();
        assert!(control.pause());
        assert!(!control.pause());
        assert!(control.is_paused());
        assert!(control.resume());
        assert!(!control.resume());
        assert!(!control.is_paused());
    }

    #[test]
    fn test_cancel_is_sticky() {
        let control = TransferControl::new();
        control.cancel();
        control.resume();
        assert!(control.is_cancelled());
    }

    #[tokio::test]
    async fn test_checkpoint_blocks_until_resume() {
        let control = Arc::new(TransferControl::with_poll_interval(Duration::from_millis(10)));
        control.pause();

        let worker = control.clone();
        let start = Instant::now();
        let handle = tokio::spawn(async move { worker.checkpoint().await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!handle.is_finished(), "checkpoint should block while paused");

        control.resume();
        handle.await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_cancel_wakes_paused_checkpoint() {
        let control = Arc::new(TransferControl::new());
        control.pause();

        let worker = control.clone();
        let handle = tokio::spawn(async move { worker.checkpoint().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        control.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled)));
    }

    #[tokio::test]
    async fn test_interruptible_aborts_pending_future() {
        let control = Arc::new(TransferControl::new());
        let worker = control.clone();

        let handle = tokio::spawn(async move {
            worker
                .interruptible(async {
                    std::future::pending::<()>().await;
                    Ok(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        control.cancel();
        assert!(matches!(handle.await.unwrap(), Err(TransferError::Cancelled)));
    }
}
