//! Wire framing shared by the sender and receiver.
//!
//! A session is a sequence of `(metadata, data)` frame pairs followed by a
//! single zero-length metadata frame:
//!
//! ```text
//! u32 BE metadata_len | metadata_len bytes of JSON {"fileName": "..."}
//! u64 BE payload_len  | payload_len bytes of zstd-compressed file content
//! ...
//! u32 BE 0            (termination)
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::constants::MAX_METADATA_LEN;
use crate::error::{Result, TransferError};

/// Body of a metadata frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// What a metadata frame announced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFrame {
    File(FileMetadata),
    Termination,
}

/// Send a metadata frame announcing the next file
pub async fn write_metadata<W>(writer: &mut W, metadata: &FileMetadata) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(metadata).map_err(|source| TransferError::Metadata { source })?;
    if json.is_empty() || json.len() > MAX_METADATA_LEN as usize {
        return Err(TransferError::protocol(format!(
            "metadata for {} is {} bytes (max {})",
            metadata.file_name,
            json.len(),
            MAX_METADATA_LEN
        )));
    }

    let len = (json.len() as u32).to_be_bytes();
    writer.write_all(&len).await.map_err(transport)?;
    writer.write_all(&json).await.map_err(transport)?;
    Ok(())
}

/// Send the zero-length metadata frame that ends a session
pub async fn write_termination<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&0u32.to_be_bytes()).await.map_err(transport)?;
    writer.flush().await.map_err(transport)?;
    Ok(())
}

/// Send the length prefix of a data frame. The payload itself is streamed by the caller.
pub async fn write_payload_len<W>(writer: &mut W, payload_len: u64) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    validate_payload_len(payload_len)?;
    writer
        .write_all(&payload_len.to_be_bytes())
        .await
        .map_err(transport)?;
    Ok(())
}

/// Receive a metadata frame
pub async fn read_metadata<R>(reader: &mut R) -> Result<MetadataFrame>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let n = read_full(reader, &mut len_buf).await.map_err(transport)?;
    if n == 0 {
        return Err(TransferError::ConnectionClosed);
    }
    if n < len_buf.len() {
        return Err(truncated("metadata length", n, len_buf.len()));
    }

    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Ok(MetadataFrame::Termination);
    }
    if len > MAX_METADATA_LEN {
        return Err(TransferError::protocol(format!(
            "metadata length {} outside (0, {}]",
            len, MAX_METADATA_LEN
        )));
    }

    let mut buf = vec![0u8; len as usize];
    let n = read_full(reader, &mut buf).await.map_err(transport)?;
    if n < buf.len() {
        return Err(truncated("metadata", n, buf.len()));
    }

    let metadata: FileMetadata =
        serde_json::from_slice(&buf).map_err(|source| TransferError::Metadata { source })?;
    Ok(MetadataFrame::File(metadata))
}

/// Receive the length prefix of a data frame
pub async fn read_payload_len<R>(reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 8];
    let n = read_full(reader, &mut len_buf).await.map_err(transport)?;
    if n == 0 {
        return Err(TransferError::ConnectionClosed);
    }
    if n < len_buf.len() {
        return Err(truncated("payload length", n, len_buf.len()));
    }

    let payload_len = u64::from_be_bytes(len_buf);
    validate_payload_len(payload_len)?;
    Ok(payload_len)
}

/// Fill `buf` across as many reads as needed. Returns fewer bytes only at end-of-stream.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// Peers built on signed 64-bit lengths cannot express anything above i64::MAX
fn validate_payload_len(payload_len: u64) -> Result<()> {
    if payload_len > i64::MAX as u64 {
        return Err(TransferError::protocol(format!(
            "payload length {} is not representable",
            payload_len
        )));
    }
    Ok(())
}

pub(crate) fn transport(source: io::Error) -> TransferError {
    TransferError::Transport { source }
}

fn truncated(what: &str, got: usize, expected: usize) -> TransferError {
    transport(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "connection closed after {} of {} {} bytes",
            got, expected, what
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn meta(name: &str) -> FileMetadata {
        FileMetadata {
            file_name: name.to_string(),
        }
    }

    #[test]
    fn test_metadata_json_shape() {
        let json = serde_json::to_string(&meta("photo.jpg")).unwrap();
        assert_eq!(json, r#"{"fileName":"photo.jpg"}"#);
    }

    #[tokio::test]
    async fn test_metadata_frame_layout() {
        let mut wire = Vec::new();
        write_metadata(&mut wire, &meta("a.txt")).await.unwrap();

        let body = br#"{"fileName":"a.txt"}"#;
        assert_eq!(&wire[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&wire[4..], body);

        let frame = read_metadata(&mut wire.as_slice()).await.unwrap();
        assert_eq!(frame, MetadataFrame::File(meta("a.txt")));
    }

    #[tokio::test]
    async fn test_termination_is_zero_length() {
        let mut wire = Vec::new();
        write_termination(&mut wire).await.unwrap();
        assert_eq!(wire, vec![0, 0, 0, 0]);

        let frame = read_metadata(&mut wire.as_slice()).await.unwrap();
        assert_eq!(frame, MetadataFrame::Termination);
    }

    #[tokio::test]
    async fn test_oversized_metadata_length_rejected() {
        let wire = (MAX_METADATA_LEN + 1).to_be_bytes();
        let err = read_metadata(&mut wire.as_slice()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_max_metadata_length_accepted() {
        let name = "n".repeat(MAX_METADATA_LEN as usize - r#"{"fileName":""}"#.len());
        let mut wire = Vec::new();
        write_metadata(&mut wire, &meta(&name)).await.unwrap();
        assert_eq!(wire.len(), 4 + MAX_METADATA_LEN as usize);

        let frame = read_metadata(&mut wire.as_slice()).await.unwrap();
        assert_eq!(frame, MetadataFrame::File(meta(&name)));
    }

    #[tokio::test]
    async fn test_write_rejects_oversized_metadata() {
        let mut wire = Vec::new();
        let err = write_metadata(&mut wire, &meta(&"x".repeat(20_000)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(wire.is_empty(), "nothing should reach the wire");
    }

    #[tokio::test]
    async fn test_unrepresentable_payload_length_rejected() {
        let wire = u64::MAX.to_be_bytes();
        let err = read_payload_len(&mut wire.as_slice()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let mut out = Vec::new();
        assert!(write_payload_len(&mut out, u64::MAX).await.is_err());
    }

    #[tokio::test]
    async fn test_payload_len_big_endian() {
        let mut wire = Vec::new();
        write_payload_len(&mut wire, 10_000).await.unwrap();
        assert_eq!(wire, 10_000u64.to_be_bytes());
        assert_eq!(read_payload_len(&mut wire.as_slice()).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_clean_close_before_metadata() {
        let empty: &[u8] = &[];
        let err = read_metadata(&mut &*empty).await.unwrap_err();
        assert!(matches!(err, TransferError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_truncated_length_prefix_is_transport_error() {
        let wire = [0u8, 0];
        let err = read_metadata(&mut wire.as_slice()).await.unwrap_err();
        assert!(matches!(err, TransferError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_truncated_metadata_body() {
        let mut wire = 20u32.to_be_bytes().to_vec();
        wire.extend_from_slice(br#"{"fileN"#);
        let err = read_metadata(&mut wire.as_slice()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_non_json_metadata() {
        let mut wire = 3u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"abc");
        let err = read_metadata(&mut wire.as_slice()).await.unwrap_err();
        assert!(matches!(err, TransferError::Metadata { .. }));
    }

    #[tokio::test]
    async fn test_read_full_accumulates_small_reads() {
        let (mut client, mut server) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            client.write_all(b"0123456789").await.unwrap();
        });

        let mut buf = [0u8; 10];
        let n = read_full(&mut server, &mut buf).await.unwrap();
        writer.await.unwrap();
        assert_eq!(n, 10);
        assert_eq!(&buf, b"0123456789");
    }
}
