//! Point-to-point path for restore replies.
//!
//! One serialized message per TCP connection: the writer sends the bytes
//! and closes, the reader reads to EOF.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Bind the direct listener and spawn its accept loop.
pub async fn listen(addr: SocketAddr, tx: mpsc::Sender<Bytes>, max_len: usize) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind direct listener on {addr}"))?;
    tracing::info!(%addr, "direct listener started");
    tokio::spawn(accept_loop(listener, tx, max_len));
    Ok(())
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Bytes>, max_len: usize) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "direct accept failed");
                continue;
            }
        };
        if tx.is_closed() {
            return;
        }
        let tx = tx.clone();
        tokio::spawn(async move {
            match read_message(stream, max_len).await {
                Ok(bytes) => {
                    let _ = tx.send(bytes).await;
                }
                Err(e) => tracing::debug!(%peer, error = %e, "direct read failed"),
            }
        });
    }
}

async fn read_message(stream: TcpStream, max_len: usize) -> io::Result<Bytes> {
    let mut buf = Vec::new();
    stream.take(max_len as u64).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Connect, write the datagram, close.
pub async fn send(addr: SocketAddr, datagram: &[u8]) -> io::Result<()> {
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "direct connect timed out"))??;
    stream.write_all(datagram).await?;
    stream.shutdown().await
}
