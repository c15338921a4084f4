//! Sticky channel to a companion display.
//!
//! A companion (a watch, a tally light) is often asleep. Every envelope is
//! pushed twice:
//! - **live**: delivered right away when the companion is awake, rejected
//!   with [`CompanionError::Unreachable`] otherwise;
//! - **durable**: stored as the latest context, last write wins. The
//!   companion reads it when it wakes.
//!
//! Payloads are named-field MessagePack, smaller than the stream channel's
//! JSON.

use cue_types::{Envelope, LinkKind, WireError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Companion channel errors.
#[derive(Debug, Error)]
pub enum CompanionError {
    /// The companion is not listening for live pushes.
    #[error("companion unreachable")]
    Unreachable,

    /// The envelope could not be encoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Sending side of a companion link.
pub trait CompanionChannel: Send + Sync {
    /// Whether live pushes would currently be delivered.
    fn is_reachable(&self) -> bool;

    /// Deliver now, best effort.
    fn push_live(&self, envelope: &Envelope) -> Result<(), CompanionError>;

    /// Store as the latest context.
    fn push_durable(&self, envelope: &Envelope) -> Result<(), CompanionError>;
}

/// In-process companion link over tokio channels.
#[derive(Debug, Clone)]
pub struct MemoryCompanion {
    live: mpsc::Sender<Vec<u8>>,
    durable: Arc<watch::Sender<Option<Vec<u8>>>>,
    awake: Arc<AtomicBool>,
}

/// Companion end of a [`MemoryCompanion`].
#[derive(Debug)]
pub struct CompanionReceiver {
    live: mpsc::Receiver<Vec<u8>>,
    durable: watch::Receiver<Option<Vec<u8>>>,
    awake: Arc<AtomicBool>,
}

impl MemoryCompanion {
    /// Create a linked pair. `capacity` bounds undelivered live pushes; when
    /// it is full, live pushes are dropped and the durable copy covers them.
    pub fn pair(capacity: usize) -> (Self, CompanionReceiver) {
        let (live_tx, live_rx) = mpsc::channel(capacity.max(1));
        let (durable_tx, durable_rx) = watch::channel(None);
        let awake = Arc::new(AtomicBool::new(false));
        (
            Self {
                live: live_tx,
                durable: Arc::new(durable_tx),
                awake: Arc::clone(&awake),
            },
            CompanionReceiver {
                live: live_rx,
                durable: durable_rx,
                awake,
            },
        )
    }
}

fn encode(envelope: &Envelope) -> Result<Vec<u8>, WireError> {
    envelope.for_link(LinkKind::Companion).to_companion_bytes()
}

impl CompanionChannel for MemoryCompanion {
    fn is_reachable(&self) -> bool {
        self.awake.load(Ordering::Acquire) && !self.live.is_closed()
    }

    fn push_live(&self, envelope: &Envelope) -> Result<(), CompanionError> {
        if !self.is_reachable() {
            return Err(CompanionError::Unreachable);
        }
        match self.live.try_send(encode(envelope)?) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Companion backlog full, live push dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CompanionError::Unreachable),
        }
    }

    fn push_durable(&self, envelope: &Envelope) -> Result<(), CompanionError> {
        self.durable.send_replace(Some(encode(envelope)?));
        Ok(())
    }
}

impl CompanionReceiver {
    /// Wake up: start accepting live pushes and return the latest durable
    /// context, if any was stored.
    pub fn activate(&mut self) -> Result<Option<Envelope>, WireError> {
        self.awake.store(true, Ordering::Release);
        let latest = self.durable.borrow_and_update().clone();
        latest
            .map(|bytes| Envelope::from_companion_bytes(&bytes))
            .transpose()
    }

    /// Go to sleep: live pushes are refused until the next activation.
    pub fn deactivate(&mut self) {
        self.awake.store(false, Ordering::Release);
        // Whatever is queued is older than the durable context.
        while self.live.try_recv().is_ok() {}
    }

    /// Whether live pushes are being accepted.
    pub fn is_active(&self) -> bool {
        self.awake.load(Ordering::Acquire)
    }

    /// Next live envelope. Returns `None` once the sender is gone.
    pub async fn recv_live(&mut self) -> Option<Result<Envelope, WireError>> {
        let bytes = self.live.recv().await?;
        Some(Envelope::from_companion_bytes(&bytes))
    }
}
