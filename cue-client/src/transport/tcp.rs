//! Stream channel over TCP.

use super::{Transport, TransportError};
use async_trait::async_trait;
use cue_types::FrameDecoder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Port a parent listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 7420;

const READ_CHUNK: usize = 8 * 1024;

struct ReadSide {
    half: OwnedReadHalf,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

/// A TCP connection carrying delimited frames.
///
/// Built either by dialing ([`Transport::connect`]) or from a stream a
/// parent accepted ([`TcpTransport::from_stream`]). Reads and writes use
/// separate halves so a pending `recv()` never blocks a `send()`.
pub struct TcpTransport {
    reader: Mutex<Option<ReadSide>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    peer: std::sync::Mutex<Option<SocketAddr>>,
}

impl TcpTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            peer: std::sync::Mutex::new(None),
        }
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        let (read, write, peer) = split(stream);
        Self {
            reader: Mutex::new(Some(read)),
            writer: Mutex::new(Some(write)),
            connected: AtomicBool::new(true),
            peer: std::sync::Mutex::new(peer),
        }
    }

    /// Remote address, once connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self
            .peer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn split(stream: TcpStream) -> (ReadSide, OwnedWriteHalf, Option<SocketAddr>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle: {}", e);
    }
    let peer = stream.peer_addr().ok();
    let (read, write) = stream.into_split();
    let read = ReadSide {
        half: read,
        decoder: FrameDecoder::new(),
        chunk: vec![0u8; READ_CHUNK],
    };
    (read, write, peer)
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer_addr())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (read, write, peer) = split(stream);
        *self.reader.lock().await = Some(read);
        *self.writer.lock().await = Some(write);
        *self
            .peer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = peer;
        self.connected.store(true, Ordering::Release);
        debug!("Connected to {}", address);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let half = writer.as_mut().ok_or(TransportError::NotConnected)?;
        if let Err(e) = half.write_all(frame).await {
            self.connected.store(false, Ordering::Release);
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut reader = self.reader.lock().await;
        let side = reader.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            if let Some(frame) = side.decoder.next_frame() {
                return Ok(frame);
            }

            let n = match side.half.read(&mut side.chunk).await {
                Ok(n) => n,
                Err(e) => {
                    self.connected.store(false, Ordering::Release);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            };
            if n == 0 {
                self.connected.store(false, Ordering::Release);
                return Err(TransportError::ConnectionClosed);
            }
            if let Err(e) = side.decoder.push(&side.chunk[..n]) {
                warn!("Dropping frame: {}", e);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        if let Some(mut half) = self.writer.lock().await.take() {
            // The peer sees EOF; our pending recv() then ends too.
            let _ = half.shutdown().await;
        }
        Ok(())
    }
}
