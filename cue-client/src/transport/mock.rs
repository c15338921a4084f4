//! Mock transport for testing.
//!
//! Frames pushed with [`MockTransport::push_frame`] are delivered by
//! `recv()`, which waits while the inbox is empty, like a real connection.
//! Sent frames are captured for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one clone to script the peer
/// while a session owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    inbox_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbox_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    closed: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connected_address: Option<String>,
    connect_attempts: u32,
    sent_frames: Vec<Vec<u8>>,
    fail_connects: u32,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a new, unconnected mock transport.
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            inbox_tx,
            inbox_rx: Arc::new(tokio::sync::Mutex::new(inbox_rx)),
            closed: Arc::new(closed),
        }
    }

    /// Create a mock that is already connected (an accepted peer).
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.lock().connected = true;
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a frame to the next `recv()`.
    pub fn push_frame(&self, frame: Vec<u8>) {
        // The receiver lives as long as self.
        let _ = self.inbox_tx.send(frame);
    }

    /// Simulate the remote side hanging up.
    pub fn hang_up(&self) {
        self.lock().connected = false;
        self.closed.send_replace(true);
    }

    /// All frames that were sent.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().sent_frames.clone()
    }

    /// The last frame that was sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.lock().sent_frames.last().cloned()
    }

    /// The address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// How many times `connect()` was called.
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Make the next `count` connects fail.
    pub fn fail_connects(&self, count: u32) {
        self.lock().fail_connects = count;
    }

    /// Cause the next `send()` to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next `recv()` to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.lock().fail_next_recv = Some(error.to_string());
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connect_attempts += 1;

        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(TransportError::ConnectionFailed("connection refused".into()));
        }

        state.connected = true;
        state.connected_address = Some(address.to_string());
        self.closed.send_replace(false);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();

        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = state.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        state.sent_frames.push(frame.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        {
            let mut state = self.lock();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if let Some(error) = state.fail_next_recv.take() {
                return Err(TransportError::ReceiveFailed(error));
            }
        }

        let closed = self.closed.subscribe();
        let mut inbox = self.inbox_rx.lock().await;
        tokio::select! {
            frame = inbox.recv() => frame.ok_or(TransportError::ConnectionClosed),
            _ = wait_closed(closed) => Err(TransportError::ConnectionClosed),
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.hang_up();
        Ok(())
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}
