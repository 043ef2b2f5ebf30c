use std::time::Duration;

/// Default TCP port for file transfer
pub const TRANSFER_PORT: u16 = 9000;

/// Chunk size for wire and codec copies (8KB)
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Smallest chunk size accepted from configuration
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Upper bound (inclusive) for a metadata frame body
pub const MAX_METADATA_LEN: u32 = 10_000;

/// Maximum file name length in bytes after sanitization
pub const MAX_FILENAME_LENGTH: usize = 255;

/// zstd level used when nothing else is configured
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// How often a progress sample is emitted for an active file
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// How often a paused worker re-checks the pause flag
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the event channel created by the CLI and tests
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;
