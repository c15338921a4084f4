//! Identity types for cuesync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one lifetime of a parent timer.
///
/// UUID v4, generated when the parent's state machine is created. Sequence
/// counters (`sequence`, `flash_seq`) are only comparable within a session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Create a new random SessionId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create a SessionId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", &self.to_string()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn session_id_from_bytes() {
        let id = SessionId::new();
        let restored = SessionId::from_bytes(id.as_uuid().as_bytes()).unwrap();
        assert_eq!(id, restored);
        assert!(SessionId::from_bytes(&[1, 2, 3]).is_none());
    }

    #[test]
    fn session_id_serializes_as_plain_string() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn debug_is_abbreviated() {
        let id = SessionId::new();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("SessionId("));
        assert_eq!(debug.len(), "SessionId()".len() + 8);
    }
}
