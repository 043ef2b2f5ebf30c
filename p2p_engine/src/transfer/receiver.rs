use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use super::protocol::{MetadataFrame, read_metadata, read_payload_len, transport};
use super::scratch::ScratchFile;
use super::session::SessionContext;
use super::utils::{open_secure_file, sanitize_file_name};
use crate::error::{Result, TransferError};
use crate::{FileRecord, TransferEvent};

/// A fully received payload waiting for the termination signal
#[derive(Debug)]
struct PendingFile {
    scratch: ScratchFile,
    display_name: String,
}

/// Read frames from `connection` until the termination signal, then
/// materialize every received file into `download_dir`.
///
/// Nothing is written to `download_dir` before the termination signal
/// arrives. On error or cancellation every scratch file is deleted.
pub async fn receive_files<R>(connection: &mut R, download_dir: &Path, ctx: &SessionContext) -> Result<Vec<PathBuf>>
where
    R: AsyncRead + Unpin,
{
    let mut pending: Vec<PendingFile> = Vec::new();

    loop {
        ctx.control.checkpoint().await?;

        let metadata = match ctx.control.interruptible(read_metadata(connection)).await? {
            MetadataFrame::Termination => {
                info!("Termination signal received after {} files", pending.len());
                break;
            }
            MetadataFrame::File(metadata) => metadata,
        };
        let payload_len = ctx
            .control
            .interruptible(read_payload_len(connection))
            .await?;

        let display_name = sanitize_file_name(&metadata.file_name);
        if display_name != metadata.file_name {
            warn!(
                "Sanitized incoming file name {:?} to {:?}",
                metadata.file_name, display_name
            );
        }
        info!("Receiving: {} ({} bytes compressed)", display_name, payload_len);

        let scratch = ScratchFile::reserve(&ctx.scratch_dir, "part").await?;
        let record = FileRecord {
            display_name: display_name.clone(),
            original_path: None,
            size_bytes: payload_len,
            bytes_transferred: 0,
            index: pending.len(),
        };
        receive_payload(connection, scratch.path(), record, ctx).await?;

        pending.push(PendingFile {
            scratch,
            display_name,
        });
    }

    finalize(pending, download_dir, ctx).await
}

/// Stream exactly `record.size_bytes` bytes from the connection into `scratch_path`
async fn receive_payload<R>(
    connection: &mut R,
    scratch_path: &Path,
    record: FileRecord,
    ctx: &SessionContext,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let total = record.size_bytes;
    let mut file = open_secure_file(scratch_path)
        .await
        .map_err(|e| TransferError::io("cannot create scratch file", e))?;
    let mut progress = ctx.telemetry.track(record);
    let mut buffer = vec![0u8; ctx.chunk_size];

    while progress.record().bytes_transferred < total {
        ctx.control.checkpoint().await?;

        let received = progress.record().bytes_transferred;
        let to_read = (total - received).min(buffer.len() as u64) as usize;
        let n = ctx
            .control
            .interruptible(async { connection.read(&mut buffer[..to_read]).await.map_err(transport) })
            .await?;
        if n == 0 {
            error!("Stream closed early: received {}/{} bytes", received, total);
            return Err(TransferError::Incomplete {
                expected: total,
                received,
            });
        }

        file.write_all(&buffer[..n])
            .await
            .map_err(|e| TransferError::io("cannot write scratch file", e))?;

        if let Some(sample) = progress.advance(n as u64) {
            ctx.telemetry.progress(sample).await;
        }
    }

    file.flush()
        .await
        .map_err(|e| TransferError::io("cannot flush scratch file", e))?;

    let sample = progress.finish();
    ctx.telemetry.progress(sample).await;
    Ok(())
}

/// A delivered file plus whatever it replaced, kept until the session settles
#[derive(Debug)]
struct Materialized {
    path: PathBuf,
    displaced: Option<ScratchFile>,
}

/// Decompress every pending file into place, in arrival order
async fn finalize(pending: Vec<PendingFile>, download_dir: &Path, ctx: &SessionContext) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(download_dir).await.map_err(|e| {
        TransferError::io(
            format!("cannot create destination {}", download_dir.display()),
            e,
        )
    })?;

    let mut materialized: Vec<Materialized> = Vec::with_capacity(pending.len());

    for file in pending {
        match materialize(&file, download_dir, ctx).await {
            Ok(done) => {
                info!("File received successfully: {}", done.path.display());
                ctx.telemetry
                    .emit(TransferEvent::FileReceived {
                        file_name: file.display_name.clone(),
                        path: done.path.clone(),
                    })
                    .await;
                materialized.push(done);
            }
            Err(e) => {
                // Leave no half-finished session visible
                rollback(materialized).await;
                return Err(e);
            }
        }
    }

    // Dropping the guards deletes the replaced originals
    Ok(materialized.into_iter().map(|done| done.path).collect())
}

/// Undo delivered files newest first, so a name delivered twice ends up
/// with whatever it held before the session
async fn rollback(materialized: Vec<Materialized>) {
    for done in materialized.into_iter().rev() {
        if let Err(e) = tokio::fs::remove_file(&done.path).await {
            warn!("Rollback could not remove {}: {}", done.path.display(), e);
        }
        if let Some(original) = done.displaced {
            restore(&original, &done.path).await;
        }
    }
}

async fn restore(original: &ScratchFile, target: &Path) {
    match tokio::fs::rename(original.path(), target).await {
        Ok(()) => debug!("Restored previous {}", target.display()),
        Err(e) => error!(
            "Could not restore previous {} from {}: {}",
            target.display(),
            original.path().display(),
            e
        ),
    }
}

async fn materialize(file: &PendingFile, download_dir: &Path, ctx: &SessionContext) -> Result<Materialized> {
    ctx.control.checkpoint().await?;

    let target = download_dir.join(&file.display_name);
    // Decompress next to the target so the final rename stays on one filesystem
    let staging = ScratchFile::beside(download_dir, "incoming");
    ctx.compressor
        .decompress_file(
            file.scratch.path().to_path_buf(),
            staging.path().to_path_buf(),
            ctx.control.clone(),
        )
        .await?;

    let displaced = displace_existing(&target, download_dir).await?;
    if let Err(e) = tokio::fs::rename(staging.path(), &target).await {
        if let Some(original) = &displaced {
            restore(original, &target).await;
        }
        return Err(TransferError::io(
            format!("cannot move file into {}", target.display()),
            e,
        ));
    }

    Ok(Materialized {
        path: target,
        displaced,
    })
}

/// Move an existing file at `target` aside so a failed session can put it back
async fn displace_existing(target: &Path, download_dir: &Path) -> Result<Option<ScratchFile>> {
    let aside = ScratchFile::beside(download_dir, "replaced");
    match tokio::fs::rename(target, aside.path()).await {
        Ok(()) => {
            debug!("Replacing existing {}", target.display());
            Ok(Some(aside))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TransferError::io(
            format!("cannot replace {}", target.display()),
            e,
        )),
    }
}
