//! Streaming zstd compression applied to every file before it hits the wire.
//!
//! Only the compressed byte sequence crosses the connection, so the codec and
//! its chunk size are private to this module.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::constants::{CHUNK_SIZE, DEFAULT_COMPRESSION_LEVEL};
use super::control::TransferControl;
use super::utils::create_secure_file_sync;
use crate::error::{Result, TransferError};

/// Byte counts for one codec pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: i32,
    chunk_size: usize,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL, CHUNK_SIZE)
    }
}

impl Compressor {
    pub fn new(level: i32, chunk_size: usize) -> Self {
        Self {
            level,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Compress all of `source` into `sink`. The frame is finalized only
    /// after the source is exhausted.
    pub fn compress<R: Read, W: Write>(&self, source: &mut R, sink: &mut W) -> io::Result<CodecStats> {
        self.compress_until(source, sink, || false)
    }

    /// Decompress all of `source` into `sink`.
    pub fn decompress<R: Read, W: Write>(&self, source: &mut R, sink: &mut W) -> io::Result<CodecStats> {
        self.decompress_until(source, sink, || false)
    }

    fn compress_until<R, W, F>(&self, source: &mut R, sink: &mut W, should_abort: F) -> io::Result<CodecStats>
    where
        R: Read,
        W: Write,
        F: Fn() -> bool,
    {
        let mut counter = CountingWriter::new(sink);
        let mut encoder = zstd::stream::write::Encoder::new(&mut counter, self.level)?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut bytes_in = 0u64;

        loop {
            if should_abort() {
                // Dropping the encoder without finish() leaves no valid frame
                return Err(aborted());
            }
            let n = source.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            encoder.write_all(&buffer[..n])?;
            bytes_in += n as u64;
        }

        encoder.finish()?.flush()?;
        Ok(CodecStats {
            bytes_in,
            bytes_out: counter.written,
        })
    }

    fn decompress_until<R, W, F>(&self, source: &mut R, sink: &mut W, should_abort: F) -> io::Result<CodecStats>
    where
        R: Read,
        W: Write,
        F: Fn() -> bool,
    {
        let mut counted = CountingReader::new(source);
        let mut decoder = zstd::stream::read::Decoder::new(&mut counted)?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut bytes_out = 0u64;

        loop {
            if should_abort() {
                return Err(aborted());
            }
            let n = decoder.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            sink.write_all(&buffer[..n])?;
            bytes_out += n as u64;
        }
        sink.flush()?;
        drop(decoder);

        Ok(CodecStats {
            bytes_in: counted.read,
            bytes_out,
        })
    }

    /// Compress `src` into a new file at `dst` on the blocking pool.
    pub async fn compress_file(
        &self,
        src: PathBuf,
        dst: PathBuf,
        control: Arc<TransferControl>,
    ) -> Result<CodecStats> {
        let codec = *self;
        run_blocking(control.clone(), move || {
            let mut reader = BufReader::new(open_for_read(&src)?);
            let mut writer = BufWriter::new(create_for_write(&dst)?);
            let stats = codec
                .compress_until(&mut reader, &mut writer, || control.is_cancelled())
                .map_err(|e| codec_error(&control, e))?;
            debug!(src = %src.display(), bytes_in = stats.bytes_in, bytes_out = stats.bytes_out, "compressed");
            Ok(stats)
        })
        .await
    }

    /// Decompress `src` into a new file at `dst` on the blocking pool.
    pub async fn decompress_file(
        &self,
        src: PathBuf,
        dst: PathBuf,
        control: Arc<TransferControl>,
    ) -> Result<CodecStats> {
        let codec = *self;
        run_blocking(control.clone(), move || {
            let mut reader = BufReader::new(open_for_read(&src)?);
            let mut writer = BufWriter::new(create_for_write(&dst)?);
            let stats = codec
                .decompress_until(&mut reader, &mut writer, || control.is_cancelled())
                .map_err(|e| codec_error(&control, e))?;
            writer
                .into_inner()
                .map_err(|e| TransferError::io("cannot flush output", e.into_error()))?
                .sync_all()
                .map_err(|e| TransferError::io(format!("cannot sync {}", dst.display()), e))?;
            debug!(dst = %dst.display(), bytes_in = stats.bytes_in, bytes_out = stats.bytes_out, "decompressed");
            Ok(stats)
        })
        .await
    }
}

async fn run_blocking<T, F>(control: Arc<TransferControl>, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(res) => res,
        Err(_) if control.is_cancelled() => Err(TransferError::Cancelled),
        Err(e) => Err(TransferError::io("codec worker failed", io::Error::other(e))),
    }
}

fn open_for_read(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| TransferError::io(format!("cannot open {}", path.display()), e))
}

fn create_for_write(path: &Path) -> Result<File> {
    create_secure_file_sync(path).map_err(|e| TransferError::io(format!("cannot create {}", path.display()), e))
}

fn codec_error(control: &TransferControl, source: io::Error) -> TransferError {
    if control.is_cancelled() {
        TransferError::Cancelled
    } else {
        TransferError::Compression { source }
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "codec aborted")
}

struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct CountingReader<R> {
    inner: R,
    read: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, read: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        Ok(n)
    }
}
