//! Error types for cuesync-host.

use cue_client::TransportError;
use cue_types::WireError;

/// Main error type for parent operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O error (binding the listener).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Sending to a peer failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No such peer.
    #[error("unknown peer {0}")]
    UnknownPeer(u64),

    /// The host task is no longer running.
    #[error("host has stopped")]
    Stopped,
}

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
