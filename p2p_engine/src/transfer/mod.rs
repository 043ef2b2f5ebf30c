//! Framed, compressed file transfer over a single byte-stream connection.
//!
//! This module provides:
//! - Length-prefixed framing (metadata frame, data frame, termination)
//! - Per-file zstd compression through private scratch files
//! - Sender and receiver engines with pause/resume/cancel
//! - Progress telemetry sampled once per second

pub mod compress;
pub mod constants;
pub mod control;
pub mod progress;
pub mod protocol;
pub mod receiver;
pub mod scratch;
pub mod sender;
pub mod session;
pub mod utils;

// Re-export public API
pub use constants::TRANSFER_PORT;
pub use control::TransferControl;
pub use receiver::receive_files;
pub use sender::send_files;
pub use session::{SessionContext, SessionHandle, SessionOutcome, TransferEngine};
