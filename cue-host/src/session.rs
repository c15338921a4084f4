//! Per-child receive loop.
//!
//! Each accepted connection gets a [`PeerSession`] task. It decodes the
//! child's requests and turns them into commands for the host task; it
//! never touches the timer itself. Undecodable frames are dropped and the
//! connection stays up. A receive error ends the session and removes the
//! child from the registry.

use crate::broadcaster::HostMetrics;
use crate::registry::{PeerId, PeerRegistry};
use crate::server::{CommandSource, HostCommand};
use cue_client::Transport;
use cue_core::UserAction;
use cue_types::Request;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// One connected child.
pub struct PeerSession {
    id: PeerId,
    transport: Arc<dyn Transport>,
    registry: Arc<PeerRegistry>,
    commands: mpsc::Sender<HostCommand>,
    metrics: Arc<HostMetrics>,
    shutdown: watch::Receiver<bool>,
}

impl PeerSession {
    /// Create a session for an already registered child.
    pub fn new(
        id: PeerId,
        transport: Arc<dyn Transport>,
        registry: Arc<PeerRegistry>,
        commands: mpsc::Sender<HostCommand>,
        metrics: Arc<HostMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            transport,
            registry,
            commands,
            metrics,
            shutdown,
        }
    }

    /// Receive until the child goes away, the host stops, or shutdown.
    pub async fn run(mut self) {
        let transport = Arc::clone(&self.transport);

        loop {
            tokio::select! {
                frame = transport.recv() => match frame {
                    Ok(bytes) => {
                        if !self.handle_frame(&bytes).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Receive from {} ended: {}", self.id, e);
                        break;
                    }
                },
                _ = wait_for_shutdown(&mut self.shutdown) => break,
            }
        }

        self.registry.remove(self.id);
    }

    /// Returns false once the host task is gone.
    async fn handle_frame(&mut self, bytes: &[u8]) -> bool {
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

        let request = match Request::from_json(bytes) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Dropping undecodable frame from {}: {}", self.id, e);
                return true;
            }
        };

        let command = match request {
            Request::Snapshot => HostCommand::SnapshotFor { peer: self.id },
            Request::Unknown => {
                tracing::debug!("Ignoring unknown request from {}", self.id);
                return true;
            }
            other => match UserAction::from_request(&other) {
                Ok(Some(action)) => HostCommand::Apply {
                    action,
                    source: CommandSource::Peer(self.id),
                    reply: None,
                },
                Ok(None) => return true,
                Err(e) => {
                    tracing::warn!("Invalid command from {}: {}", self.id, e);
                    return true;
                }
            },
        };

        self.commands.send(command).await.is_ok()
    }
}

/// Resolve once `shutdown` is true or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
