//! Connected children.
//!
//! Each accepted connection is tracked independently. Losing every child
//! doesn't affect the listener; the parent just reports
//! [`ParentStatus::NoChildren`] until someone dials in again.

use cue_client::Transport;
use cue_core::ParentStatus;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier for one accepted connection, unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

struct PeerEntry {
    transport: Arc<dyn Transport>,
    label: String,
}

/// Registry of connected children.
pub struct PeerRegistry {
    peers: DashMap<PeerId, PeerEntry>,
    next_id: AtomicU64,
}

impl fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Track a new connection. `label` is for logs (usually the remote address).
    pub fn register(&self, transport: Arc<dyn Transport>, label: impl Into<String>) -> PeerId {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let label = label.into();
        tracing::info!("Child connected: {} ({})", id, label);
        self.peers.insert(id, PeerEntry { transport, label });
        tracing::debug!("Connected children: {}", self.peers.len());
        id
    }

    /// Forget a connection. Returns whether it was still registered.
    pub fn remove(&self, id: PeerId) -> bool {
        match self.peers.remove(&id) {
            Some((_, entry)) => {
                tracing::info!(
                    "Child disconnected: {} ({}), {} remaining",
                    id,
                    entry.label,
                    self.peers.len()
                );
                true
            }
            None => false,
        }
    }

    /// Transport for one peer.
    pub fn get(&self, id: PeerId) -> Option<Arc<dyn Transport>> {
        self.peers.get(&id).map(|entry| Arc::clone(&entry.transport))
    }

    /// Log label for one peer.
    pub fn label(&self, id: PeerId) -> Option<String> {
        self.peers.get(&id).map(|entry| entry.label.clone())
    }

    /// Snapshot of every peer, sorted by id.
    ///
    /// Collected up front so no map shard is held across an await.
    pub fn peers(&self) -> Vec<(PeerId, Arc<dyn Transport>)> {
        let mut peers: Vec<_> = self
            .peers
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().transport)))
            .collect();
        peers.sort_by_key(|(id, _)| *id);
        peers
    }

    /// Number of connected children.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no child is connected.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Current parent status.
    pub fn status(&self) -> ParentStatus {
        ParentStatus::from_count(self.peers.len())
    }

    /// Remove peers whose sends failed and close their transports.
    pub async fn drop_failed(&self, failed: &[PeerId]) {
        for id in failed {
            if let Some((_, entry)) = self.peers.remove(id) {
                tracing::warn!("Dropping child {} ({}) after failed send", id, entry.label);
                if let Err(e) = entry.transport.close().await {
                    tracing::debug!("Closing {} failed: {}", id, e);
                }
            }
        }
    }

    /// Close and forget every peer.
    pub async fn close_all(&self) {
        let ids: Vec<PeerId> = self.peers.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.peers.remove(&id) {
                let _ = entry.transport.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cue_client::MockTransport;

    // ==========================================================================
    // Registration
    // ==========================================================================

    #[test]
    fn status_tracks_connected_children() {
        let registry = PeerRegistry::new();
        assert_eq!(registry.status(), ParentStatus::NoChildren);

        let a = registry.register(Arc::new(MockTransport::connected()), "a");
        let b = registry.register(Arc::new(MockTransport::connected()), "b");
        assert_ne!(a, b);
        assert_eq!(registry.status(), ParentStatus::Children(2));

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(registry.status(), ParentStatus::Children(1));

        assert!(registry.remove(b));
        assert_eq!(registry.status(), ParentStatus::NoChildren);
        assert!(registry.is_empty());
    }

    #[test]
    fn peers_are_listed_in_registration_order() {
        let registry = PeerRegistry::new();
        let ids: Vec<PeerId> = (0..4)
            .map(|i| registry.register(Arc::new(MockTransport::connected()), format!("p{}", i)))
            .collect();

        let listed: Vec<PeerId> = registry.peers().into_iter().map(|(id, _)| id).collect();
        assert_eq!(listed, ids);
        assert_eq!(registry.label(ids[2]).as_deref(), Some("p2"));
    }

    // ==========================================================================
    // Failure handling
    // ==========================================================================

    #[tokio::test]
    async fn drop_failed_closes_only_the_failed_peers() {
        let registry = PeerRegistry::new();
        let healthy = MockTransport::connected();
        let broken = MockTransport::connected();
        let keep = registry.register(Arc::new(healthy.clone()), "healthy");
        let gone = registry.register(Arc::new(broken.clone()), "broken");

        registry.drop_failed(&[gone]).await;

        assert!(registry.get(keep).is_some());
        assert!(registry.get(gone).is_none());
        assert!(healthy.is_connected());
        assert!(!broken.is_connected());
    }

    #[tokio::test]
    async fn close_all_empties_the_registry() {
        let registry = PeerRegistry::new();
        let peer = MockTransport::connected();
        registry.register(Arc::new(peer.clone()), "only");

        registry.close_all().await;

        assert_eq!(registry.len(), 0);
        assert!(!peer.is_connected());
    }
}
