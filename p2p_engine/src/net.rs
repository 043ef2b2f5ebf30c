//! Thin TCP helpers that hand a ready connection to the engine.
//!
//! Peer discovery is not handled here: callers already know the address.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// Connect to a receiving peer
pub async fn connect(addr: SocketAddr) -> Result<TcpStream> {
    info!("Connecting to {}...", addr);
    let start = std::time::Instant::now();

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;

    info!("✓ Connected to {} in {:?}", addr, start.elapsed());
    Ok(stream)
}

/// Bind a listener for exactly one inbound transfer
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening for a transfer at {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept one connection and stop listening
pub async fn accept_one(listener: TcpListener) -> Result<(TcpStream, SocketAddr)> {
    let (stream, peer) = listener
        .accept()
        .await
        .context("Failed to accept connection")?;
    drop(listener);

    stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;
    info!("Connection accepted from {}", peer);
    Ok((stream, peer))
}
