//! Error types for the transfer engine.
//!
//! `TransferError` is what the engine propagates internally. Before it leaves
//! the worker it is flattened into an [`ErrorReport`], which is what callers
//! render. Debug-level detail stays in the tracing output.

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Main error type for transfer sessions.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Malformed or out-of-range frame.
    #[error("protocol violation: {message}")]
    Protocol { message: String },

    /// Connection reset or failed mid-frame.
    #[error("transport failure: {source}")]
    Transport {
        #[source]
        source: io::Error,
    },

    /// Peer closed the connection where a frame was required.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Local filesystem failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Stream ended before the declared payload length arrived.
    #[error("transfer was incomplete: expected {expected}, got {received}")]
    Incomplete { expected: u64, received: u64 },

    /// Codec failure while compressing or decompressing.
    #[error("compression failed: {source}")]
    Compression {
        #[source]
        source: io::Error,
    },

    /// Metadata frame body was not the expected JSON.
    #[error("invalid metadata: {source}")]
    Metadata {
        #[source]
        source: serde_json::Error,
    },

    /// Session was cancelled by the caller.
    #[error("transfer cancelled")]
    Cancelled,

    /// Another session is still running on this engine.
    #[error("a transfer session is already active")]
    SessionActive,
}

impl TransferError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol { .. } | Self::Metadata { .. } => ErrorKind::Protocol,
            Self::Transport { .. } | Self::ConnectionClosed => ErrorKind::Transport,
            Self::Io { .. } => ErrorKind::LocalIo,
            Self::Incomplete { .. } => ErrorKind::Incomplete,
            Self::Compression { .. } => ErrorKind::Compression,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::SessionActive => ErrorKind::SessionActive,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error(self)
    }
}

/// Coarse classification carried in every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Protocol,
    Transport,
    LocalIo,
    Incomplete,
    Compression,
    Cancelled,
    SessionActive,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Protocol => "protocol",
            Self::Transport => "transport",
            Self::LocalIo => "local I/O",
            Self::Incomplete => "incomplete transfer",
            Self::Compression => "compression",
            Self::Cancelled => "cancelled",
            Self::SessionActive => "session active",
        };
        f.write_str(s)
    }
}

/// Human-readable diagnostic delivered with the `Error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Messages of the underlying causes, outermost first.
    pub causes: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(err: &TransferError) -> Self {
        let mut causes = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind: err.kind(),
            message: err.to_string(),
            causes,
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        // thiserror already folds the first source into most messages
        for cause in self.causes.iter().filter(|c| !self.message.contains(c.as_str())) {
            write!(f, "\n  caused by: {}", cause)?;
        }
        Ok(())
    }
}

impl From<TransferError> for ErrorReport {
    fn from(err: TransferError) -> Self {
        Self::from_error(&err)
    }
}
