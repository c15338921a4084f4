//! Error types for the cuesync wire format.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON encoding or decoding failed (stream channel).
    #[error("json codec failed: {0}")]
    Json(#[source] serde_json::Error),

    /// MessagePack serialization failed (companion channel).
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed (companion channel).
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// A frame grew past the size limit without a delimiter.
    #[error("frame too large: {size} bytes (limit: {limit} bytes)")]
    FrameTooLarge {
        /// Bytes buffered when the limit was hit.
        size: usize,
        /// Maximum allowed frame size.
        limit: usize,
    },
}
