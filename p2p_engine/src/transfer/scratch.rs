//! Private staging files for compressed payloads.

use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use super::utils::ensure_private_dir;
use crate::error::{Result, TransferError};

/// A scratch file that is deleted when the guard goes away, on every exit path.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Reserve a fresh path inside the private scratch directory `dir`,
    /// creating it owner-only if needed.
    /// The file itself is created by whoever writes to it.
    pub async fn reserve(dir: &Path, suffix: &str) -> Result<Self> {
        ensure_private_dir(dir).await.map_err(|e| {
            TransferError::io(
                format!("cannot prepare scratch directory {}", dir.display()),
                e,
            )
        })?;

        Ok(Self::beside(dir, suffix))
    }

    /// Hidden temporary path in an existing directory, for files that end
    /// up renamed next to their final name.
    pub fn beside(dir: &Path, suffix: &str) -> Self {
        // Leading dot hides staging files
        let path = dir.join(format!(".{}.{}", Uuid::new_v4(), suffix));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to delete scratch file {}: {}", self.path.display(), e),
        }
    }
}
