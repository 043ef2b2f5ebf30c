use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::protocol::{FileMetadata, transport, write_metadata, write_payload_len, write_termination};
use super::scratch::ScratchFile;
use super::session::SessionContext;
use super::utils::display_name;
use crate::error::{Result, TransferError};
use crate::{FileRecord, TransferEvent};

/// Send `files` in order over `connection`, then the termination frame.
///
/// Missing sources are skipped. Any other failure aborts the whole session.
/// Returns the number of files actually sent.
pub async fn send_files<W>(connection: &mut W, files: &[PathBuf], ctx: &SessionContext) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    info!("Starting file transfer. Total files: {}", files.len());
    let mut sent = 0usize;

    for (index, file_path) in files.iter().enumerate() {
        ctx.control.checkpoint().await?;

        if let Some(reason) = skip_reason(file_path).await? {
            report_skip(file_path, reason, ctx).await;
            continue;
        }

        if send_single_file(connection, index, file_path, ctx).await? {
            sent += 1;
        } else {
            report_skip(file_path, VANISHED.to_string(), ctx).await;
        }
    }

    // A cancelled sender must not claim the session finished
    ctx.control.checkpoint().await?;
    ctx.control.interruptible(write_termination(connection)).await?;
    connection.shutdown().await.map_err(transport)?;

    info!("All files sent ({} of {}), termination signal sent", sent, files.len());
    Ok(sent)
}

const VANISHED: &str = "source no longer exists";

async fn skip_reason(file_path: &Path) -> Result<Option<String>> {
    match tokio::fs::metadata(file_path).await {
        Ok(metadata) if metadata.is_file() => Ok(None),
        Ok(_) => Ok(Some("not a regular file".to_string())),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Some(VANISHED.to_string())),
        Err(e) => Err(TransferError::io(
            format!("cannot inspect {}", file_path.display()),
            e,
        )),
    }
}

async fn report_skip(file_path: &Path, reason: String, ctx: &SessionContext) {
    warn!("Skipping {}: {}", file_path.display(), reason);
    ctx.telemetry
        .emit(TransferEvent::FileSkipped {
            file_name: display_name(file_path),
            reason,
        })
        .await;
}

/// Compress one file to scratch, then push its metadata and data frames.
///
/// Returns false, with nothing written to the connection, when the source
/// disappeared before compression could open it.
async fn send_single_file<W>(
    connection: &mut W,
    index: usize,
    file_path: &Path,
    ctx: &SessionContext,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let file_name = display_name(file_path);
    debug!("Compressing {} to scratch", file_path.display());
    ctx.telemetry.indeterminate(index, &file_name).await;

    // Deleted when this function returns, success or not
    let scratch = ScratchFile::reserve(&ctx.scratch_dir, "zst").await?;
    let compressed = ctx
        .compressor
        .compress_file(
            file_path.to_path_buf(),
            scratch.path().to_path_buf(),
            ctx.control.clone(),
        )
        .await;
    if let Err(TransferError::Io { source, .. }) = &compressed {
        if source.kind() == IoErrorKind::NotFound && !source_exists(file_path).await {
            return Ok(false);
        }
    }
    let stats = compressed?;
    let payload_len = stats.bytes_out;

    info!(
        "Sending: {} ({} bytes, {} compressed)",
        file_name, stats.bytes_in, payload_len
    );

    ctx.control.checkpoint().await?;
    let metadata = FileMetadata {
        file_name: file_name.clone(),
    };
    ctx.control
        .interruptible(async {
            write_metadata(connection, &metadata).await?;
            write_payload_len(connection, payload_len).await
        })
        .await?;

    let mut file = File::open(scratch.path())
        .await
        .map_err(|e| TransferError::io("cannot open compressed scratch file", e))?;
    let mut progress = ctx.telemetry.track(FileRecord {
        display_name: file_name.clone(),
        original_path: Some(file_path.to_path_buf()),
        size_bytes: payload_len,
        bytes_transferred: 0,
        index,
    });
    let mut buffer = vec![0u8; ctx.chunk_size];

    while progress.record().bytes_transferred < payload_len {
        ctx.control.checkpoint().await?;

        let remaining = payload_len - progress.record().bytes_transferred;
        let to_read = remaining.min(buffer.len() as u64) as usize;
        let n = file
            .read(&mut buffer[..to_read])
            .await
            .map_err(|e| TransferError::io("cannot read compressed scratch file", e))?;
        if n == 0 {
            return Err(TransferError::io(
                "compressed scratch file shrank while sending",
                std::io::Error::from(IoErrorKind::UnexpectedEof),
            ));
        }

        ctx.control
            .interruptible(async { connection.write_all(&buffer[..n]).await.map_err(transport) })
            .await?;

        if let Some(sample) = progress.advance(n as u64) {
            ctx.telemetry.progress(sample).await;
        }
    }

    ctx.control
        .interruptible(async { connection.flush().await.map_err(transport) })
        .await?;

    let sample = progress.finish();
    ctx.telemetry.progress(sample).await;
    debug!("File sent: {}", file_name);
    Ok(true)
}

async fn source_exists(file_path: &Path) -> bool {
    tokio::fs::try_exists(file_path).await.unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::transfer::control::TransferControl;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn context(scratch_dir: &Path) -> (SessionContext, mpsc::Receiver<TransferEvent>) {
        let config = TransferConfig {
            scratch_dir: scratch_dir.to_path_buf(),
            ..TransferConfig::default()
        };
        let (tx, rx) = mpsc::channel(16);
        (SessionContext::new(&config, Arc::new(TransferControl::new()), tx), rx)
    }

    #[tokio::test]
    async fn test_source_gone_before_compression_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let scratch_dir = dir.path().join("scratch");
        let (ctx, _rx) = context(&scratch_dir);

        // Passed the existence check, then removed before the codec opened it
        let gone = dir.path().join("gone.txt");
        let mut wire: Vec<u8> = Vec::new();
        let sent = send_single_file(&mut wire, 0, &gone, &ctx).await.unwrap();

        assert!(!sent);
        assert!(wire.is_empty());
        assert_eq!(std::fs::read_dir(&scratch_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_scratch_failure_still_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("present.txt");
        std::fs::write(&source, b"data").unwrap();
        // Scratch path is a regular file, so no scratch file can be created in it
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let (ctx, _rx) = context(&blocker);

        let mut wire: Vec<u8> = Vec::new();
        assert!(send_single_file(&mut wire, 0, &source, &ctx).await.is_err());
        assert!(wire.is_empty());
    }
}
