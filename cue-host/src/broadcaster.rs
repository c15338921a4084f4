//! Fan-out of timer snapshots.
//!
//! One envelope is encoded once and written to every connected child, then
//! pushed to the companion channel (live and durable). A child that fails
//! to take the frame is reported back; it does not stop the fan-out.

use crate::error::{HostError, Result};
use crate::registry::{PeerId, PeerRegistry};
use cue_client::{CompanionChannel, CompanionError, TransportError};
use cue_types::{encode_frame, Envelope};
use futures_util::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long one child may take to accept one frame.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Operational metrics for the parent.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct HostMetrics {
    /// Envelopes broadcast.
    pub broadcasts_total: AtomicU64,
    /// Frames written to children.
    pub frames_sent: AtomicU64,
    /// Frames a child failed to take.
    pub send_failures: AtomicU64,
    /// Connections accepted.
    pub peers_connected_total: AtomicU64,
    /// Live companion pushes that found the companion away.
    pub companion_live_misses: AtomicU64,
    /// Requests received from children.
    pub requests_total: AtomicU64,
    /// User actions applied.
    pub commands_applied: AtomicU64,
    /// User actions rejected by the timer.
    pub commands_rejected: AtomicU64,
}

/// Plain copy of [`HostMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Envelopes broadcast.
    pub broadcasts_total: u64,
    /// Frames written to children.
    pub frames_sent: u64,
    /// Frames a child failed to take.
    pub send_failures: u64,
    /// Connections accepted.
    pub peers_connected_total: u64,
    /// Live companion pushes that found the companion away.
    pub companion_live_misses: u64,
    /// Requests received from children.
    pub requests_total: u64,
    /// User actions applied.
    pub commands_applied: u64,
    /// User actions rejected by the timer.
    pub commands_rejected: u64,
}

impl HostMetrics {
    /// Read every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            broadcasts_total: self.broadcasts_total.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            peers_connected_total: self.peers_connected_total.load(Ordering::Relaxed),
            companion_live_misses: self.companion_live_misses.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Children that took the frame.
    pub delivered: usize,
    /// Children whose send failed or timed out.
    pub failed: Vec<PeerId>,
}

/// Writes envelopes to every child and the companion.
pub struct Broadcaster {
    registry: Arc<PeerRegistry>,
    companion: Option<Arc<dyn CompanionChannel>>,
    metrics: Arc<HostMetrics>,
    send_timeout: Duration,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("registry", &self.registry)
            .field("companion", &self.companion.is_some())
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(
        registry: Arc<PeerRegistry>,
        companion: Option<Arc<dyn CompanionChannel>>,
        metrics: Arc<HostMetrics>,
    ) -> Self {
        Self {
            registry,
            companion,
            metrics,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Override the per-child send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Send `envelope` to every child and the companion.
    pub async fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let frame = match encode_frame(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode envelope {}: {}", envelope.sequence, e);
                return report;
            }
        };
        self.metrics.broadcasts_total.fetch_add(1, Ordering::Relaxed);

        // All children at once; a stalled child costs at most one timeout.
        let sends = self.registry.peers().into_iter().map(|(id, transport)| {
            let frame = &frame;
            async move {
                let result = tokio::time::timeout(self.send_timeout, transport.send(frame)).await;
                (id, result)
            }
        });

        for (id, result) in join_all(sends).await {
            match result {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    self.metrics.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Send to {} failed: {}", id, e);
                    self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                    report.failed.push(id);
                }
                Err(_) => {
                    tracing::warn!("Send to {} timed out after {:?}", id, self.send_timeout);
                    self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                    report.failed.push(id);
                }
            }
        }

        self.push_companion(envelope);
        report
    }

    /// Send `envelope` to one child.
    pub async fn send_to(&self, peer: PeerId, envelope: &Envelope) -> Result<()> {
        let transport = self
            .registry
            .get(peer)
            .ok_or(HostError::UnknownPeer(peer.get()))?;
        let frame = encode_frame(envelope)?;

        match tokio::time::timeout(self.send_timeout, transport.send(&frame)).await {
            Ok(Ok(())) => {
                self.metrics.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
            Err(_) => {
                self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Timeout.into())
            }
        }
    }

    fn push_companion(&self, envelope: &Envelope) {
        let Some(companion) = &self.companion else {
            return;
        };

        match companion.push_live(envelope) {
            Ok(()) => {}
            Err(CompanionError::Unreachable) => {
                self.metrics
                    .companion_live_misses
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("Companion live push failed: {}", e),
        }
        if let Err(e) = companion.push_durable(envelope) {
            tracing::error!("Companion durable push failed: {}", e);
        }
    }
}
