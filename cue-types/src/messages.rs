//! Upstream messages from a child to the parent.
//!
//! Children send very little: a request for a fresh snapshot when their
//! view goes stale, and user commands forwarded to the parent's timer.

use serde::{Deserialize, Serialize};

use crate::{WireError, FRAME_DELIMITER};

/// A message sent by a child over the stream channel.
///
/// Tagged by `kind`. Kinds unknown to this build decode to
/// [`Request::Unknown`] instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    /// Send me a snapshot now.
    Snapshot,
    /// Start the timer.
    Start {
        /// Countdown length in seconds (0 starts counting up at once).
        duration: f64,
    },
    /// Pause the timer.
    Pause,
    /// Resume a paused timer.
    Resume,
    /// Reset the timer to Idle.
    Reset,
    /// Fire a manual flash.
    Flash,
    /// A kind this build doesn't know about.
    #[serde(other)]
    Unknown,
}

impl Request {
    /// Serialize to a compact JSON document.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Json)
    }

    /// Encode as one delimited frame for the stream channel.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireError> {
        let mut bytes = self.to_json()?;
        bytes.push(FRAME_DELIMITER);
        Ok(bytes)
    }

    /// Deserialize from a JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Json)
    }

    /// Whether this request changes the parent's timer.
    pub fn is_command(&self) -> bool {
        !matches!(self, Request::Snapshot | Request::Unknown)
    }
}
