//! Transport abstraction for cuesync.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (TCP, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection
//! - `send()` transmits one already-delimited frame
//! - `recv()` yields the next complete frame, without its delimiter
//! - `close()` gracefully terminates
//!
//! `recv()` must be cancel-safe: sessions poll it inside `select!`, and a
//! dropped `recv()` future must not lose buffered bytes.
//!
//! The companion display is not a stream peer. It is reached through a
//! [`CompanionChannel`], which has live and durable delivery instead.
//!
//! # Example
//!
//! ```ignore
//! let transport = TcpTransport::new();
//! transport.connect("192.168.1.20:7420").await?;
//! transport.send(&Request::Snapshot.to_frame()?).await?;
//! let frame = transport.recv().await?;
//! ```

mod companion;
mod mock;
mod tcp;

pub use companion::{CompanionChannel, CompanionError, CompanionReceiver, MemoryCompanion};
pub use mock::MockTransport;
pub use tcp::{TcpTransport, DEFAULT_PORT};

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for sending and receiving frames.
///
/// Implementations handle the underlying connection mechanism
/// (TCP, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a parent at `address` (`host:port`).
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one frame, delimiter included.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receive the next frame, delimiter stripped.
    ///
    /// Waits until a complete frame is available or the connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
