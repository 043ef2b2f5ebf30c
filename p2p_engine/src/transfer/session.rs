//! Session lifecycle: one worker per engine, driven by pause/resume/cancel.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span};

use super::compress::Compressor;
use super::control::TransferControl;
use super::progress::Telemetry;
use super::{receiver, sender};
use crate::config::TransferConfig;
use crate::error::{ErrorReport, Result, TransferError};
use crate::{Role, TransferEvent};

/// Everything a worker needs besides the connection
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub control: Arc<TransferControl>,
    pub telemetry: Telemetry,
    pub compressor: Compressor,
    pub scratch_dir: PathBuf,
    pub chunk_size: usize,
}

impl SessionContext {
    pub fn new(config: &TransferConfig, control: Arc<TransferControl>, event_tx: mpsc::Sender<TransferEvent>) -> Self {
        Self {
            telemetry: Telemetry::new(event_tx, config.progress_interval(), control.clone()),
            control,
            compressor: Compressor::new(config.compression_level, config.chunk_size),
            scratch_dir: config.scratch_dir.clone(),
            chunk_size: config.chunk_size,
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed { files: usize },
    Cancelled,
    Failed(ErrorReport),
}

/// Caller-side handle to a running session
#[derive(Debug)]
pub struct SessionHandle {
    role: Role,
    control: Arc<TransferControl>,
    worker: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker to exit
    pub async fn wait(self) -> SessionOutcome {
        match self.worker.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{:?} worker panicked or was aborted: {}", self.role, e);
                SessionOutcome::Failed(
                    TransferError::io("transfer worker stopped", std::io::Error::other(e)).report(),
                )
            }
        }
    }
}

type ActiveSlot = Arc<Mutex<Option<Arc<TransferControl>>>>;

/// Releases the engine's active slot when the worker exits, on every path
struct ActiveSessionGuard {
    slot: ActiveSlot,
    control: Arc<TransferControl>,
}

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, &self.control))
        {
            *slot = None;
        }
    }
}

/// Runs at most one send or receive session at a time
#[derive(Debug)]
pub struct TransferEngine {
    config: TransferConfig,
    event_tx: mpsc::Sender<TransferEvent>,
    active: ActiveSlot,
}

impl TransferEngine {
    pub fn new(config: TransferConfig, event_tx: mpsc::Sender<TransferEvent>) -> Self {
        Self {
            config: config.normalized(),
            event_tx,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// Start sending `files` over `connection`
    pub fn start_send<W>(&self, connection: W, files: Vec<PathBuf>) -> Result<SessionHandle>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (ctx, guard) = self.claim()?;
        let control = ctx.control.clone();
        let span = info_span!("send_session", files = files.len());

        let worker = tokio::spawn(
            async move {
                let mut connection = connection;
                let result = sender::send_files(&mut connection, &files, &ctx).await;
                drop(connection);
                finish_session(result, guard, &ctx).await
            }
            .instrument(span),
        );

        Ok(SessionHandle {
            role: Role::Sender,
            control,
            worker,
        })
    }

    /// Start receiving files from `connection` into `download_dir`
    pub fn start_receive<R>(&self, connection: R, download_dir: PathBuf) -> Result<SessionHandle>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (ctx, guard) = self.claim()?;
        let control = ctx.control.clone();
        let span = info_span!("receive_session", dir = %download_dir.display());

        let worker = tokio::spawn(
            async move {
                let mut connection = connection;
                let result = receiver::receive_files(&mut connection, &download_dir, &ctx)
                    .await
                    .map(|paths| paths.len());
                drop(connection);
                finish_session(result, guard, &ctx).await
            }
            .instrument(span),
        );

        Ok(SessionHandle {
            role: Role::Receiver,
            control,
            worker,
        })
    }

    /// Returns false when no session is running
    pub fn pause(&self) -> bool {
        match self.current() {
            Some(control) => {
                if control.pause() {
                    self.notify(TransferEvent::Paused);
                }
                true
            }
            None => false,
        }
    }

    /// Returns false when no session is running
    pub fn resume(&self) -> bool {
        match self.current() {
            Some(control) => {
                if control.resume() {
                    self.notify(TransferEvent::Resumed);
                }
                true
            }
            None => false,
        }
    }

    /// Returns false when no session is running
    pub fn cancel(&self) -> bool {
        match self.current() {
            Some(control) => {
                info!("Cancel requested");
                control.cancel();
                true
            }
            None => false,
        }
    }

    fn current(&self) -> Option<Arc<TransferControl>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn claim(&self) -> Result<(SessionContext, ActiveSessionGuard)> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(TransferError::SessionActive);
        }

        let control = Arc::new(TransferControl::with_poll_interval(
            self.config.pause_poll_interval(),
        ));
        *slot = Some(control.clone());

        let guard = ActiveSessionGuard {
            slot: self.active.clone(),
            control: control.clone(),
        };
        let ctx = SessionContext::new(&self.config, control, self.event_tx.clone());
        Ok((ctx, guard))
    }

    // Called from sync caller threads, so never wait on a full channel
    fn notify(&self, event: TransferEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            debug!("Dropped control notification: {}", e);
        }
    }
}

/// Release the engine slot, then emit exactly one terminal event
async fn finish_session(result: Result<usize>, guard: ActiveSessionGuard, ctx: &SessionContext) -> SessionOutcome {
    drop(guard);

    match result {
        Ok(files) => {
            info!("Transfer session complete ({} files)", files);
            ctx.telemetry
                .finish(TransferEvent::Complete { files })
                .await;
            SessionOutcome::Completed { files }
        }
        Err(TransferError::Cancelled) => {
            info!("Transfer session cancelled");
            ctx.telemetry.finish(TransferEvent::Cancelled).await;
            SessionOutcome::Cancelled
        }
        Err(e) => {
            error!("Transfer session failed: {:?}", e);
            let report = e.report();
            ctx.telemetry
                .finish(TransferEvent::Error(report.clone()))
                .await;
            SessionOutcome::Failed(report)
        }
    }
}
