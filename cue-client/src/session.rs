//! The child side: dialing the parent and following its timer.
//!
//! A [`ChildSession`] owns the [`Reconciler`] and the [`RenderCadence`]
//! and runs in its own task. Applications talk to it through a
//! [`ChildHandle`]:
//!
//! - `predictions()` yields immutable [`Prediction`] values for the render
//!   loop (a `watch` channel, latest value only);
//! - `subscribe()` yields every decoded [`Envelope`] (a `broadcast`
//!   channel);
//! - `send()` forwards a command to the parent, refused while stale;
//! - `refresh_interval()` is the redraw period the cadence asks for.
//!
//! When the connection drops the session redials; the reconciler keeps its
//! state and keeps being polled, so the display goes stale after the stale
//! threshold and recovers on the next snapshot.

use crate::transport::{Transport, TransportError};
use cue_core::lifecycle::{calculate_backoff, LinkAction, LinkEvent, LinkReport, LinkState};
use cue_core::{
    CadenceConfig, DialTarget, PowerState, Prediction, Reconciler, ReconcilerConfig,
    RenderCadence,
};
use cue_types::{Envelope, Request, WireError};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// How long a child keeps dialing before giving up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const COMMAND_QUEUE: usize = 32;
const ENVELOPE_QUEUE: usize = 64;

/// Child-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach the parent in time.
    #[error("gave up connecting to {address} after {timeout:?}")]
    ConnectTimeout {
        /// Where we were dialing.
        address: String,
        /// How long we tried.
        timeout: Duration,
    },

    /// The view is stale, so commands are not sent.
    #[error("parent view is stale; command not sent")]
    Stale,

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Wire encoding error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The session task has ended.
    #[error("session closed")]
    Closed,
}

/// Child configuration.
#[derive(Debug, Clone)]
pub struct FollowerConfig {
    /// Where the parent listens.
    pub address: DialTarget,
    /// How long to keep dialing.
    pub connect_timeout: Duration,
    /// Prediction tunables.
    pub reconciler: ReconcilerConfig,
    /// Refresh rates.
    pub cadence: CadenceConfig,
}

impl FollowerConfig {
    /// Configuration with defaults for everything but the address.
    pub fn new(address: DialTarget) -> Self {
        Self {
            address,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconciler: ReconcilerConfig::default(),
            cadence: CadenceConfig::default(),
        }
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Dial `address` until it answers or `timeout` passes.
///
/// Retries follow the lifecycle state machine: exponential backoff with
/// jitter between attempts. Returns the attempt that succeeded.
pub async fn connect_with_retry<T: Transport + ?Sized>(
    transport: &T,
    address: &str,
    timeout: Duration,
) -> Result<u32, ClientError> {
    let mut state = LinkState::new();

    let dialing = async {
        let mut events = VecDeque::from([LinkEvent::Dial]);
        while let Some(event) = events.pop_front() {
            let (next, actions) = std::mem::take(&mut state).on_event(event);
            state = next;

            for action in actions {
                match action {
                    LinkAction::Dial => match transport.connect(address).await {
                        Ok(()) => events.push_back(LinkEvent::Connected),
                        Err(e) => events.push_back(LinkEvent::ConnectFailed {
                            error: e.to_string(),
                        }),
                    },
                    LinkAction::ScheduleRetry { delay } => {
                        tokio::time::sleep(delay).await;
                        events.push_back(LinkEvent::RetryTimer);
                    }
                    LinkAction::Report(LinkReport::Established { attempt }) => {
                        return Some(attempt);
                    }
                    LinkAction::Report(LinkReport::DialFailed { attempt, error }) => {
                        debug!("Dial attempt {} to {} failed: {}", attempt, address, error);
                    }
                    _ => {}
                }
            }
        }
        None
    };

    match tokio::time::timeout(timeout, dialing).await {
        Ok(Some(attempt)) => {
            info!("Connected to parent at {} (attempt {})", address, attempt);
            Ok(attempt)
        }
        Ok(None) | Err(_) => {
            let (failed, _) = state.on_event(LinkEvent::TimedOut);
            if let LinkState::Failed { reason } = failed {
                warn!("Giving up on {}: {}", address, reason);
            }
            Err(ClientError::ConnectTimeout {
                address: address.to_string(),
                timeout,
            })
        }
    }
}

enum ChildCommand {
    Send {
        request: Request,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
}

/// Application-side handle to a running [`ChildSession`].
#[derive(Debug, Clone)]
pub struct ChildHandle {
    commands: mpsc::Sender<ChildCommand>,
    predictions: watch::Receiver<Option<Prediction>>,
    refresh: watch::Receiver<Duration>,
    envelopes: broadcast::Sender<Envelope>,
    power: Arc<watch::Sender<PowerState>>,
}

impl std::fmt::Debug for ChildCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildCommand::Send { request, .. } => f.debug_tuple("Send").field(request).finish(),
        }
    }
}

impl ChildHandle {
    /// Forward a request to the parent.
    ///
    /// Timer commands are refused with [`ClientError::Stale`] while the view
    /// is stale; snapshot requests always go out while connected.
    pub async fn send(&self, request: Request) -> Result<(), ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ChildCommand::Send { request, reply })
            .await
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)?
    }

    /// Latest prediction, if a snapshot has arrived.
    pub fn prediction(&self) -> Option<Prediction> {
        *self.predictions.borrow()
    }

    /// Watch predictions as they change.
    pub fn predictions(&self) -> watch::Receiver<Option<Prediction>> {
        self.predictions.clone()
    }

    /// How often the display should redraw right now.
    pub fn refresh_interval(&self) -> Duration {
        *self.refresh.borrow()
    }

    /// Receive every decoded envelope from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.envelopes.subscribe()
    }

    /// Tell the session about the display's power state.
    pub fn set_power(&self, power: PowerState) {
        self.power.send_replace(power);
    }
}

enum SessionExit {
    Shutdown,
    Lost(String),
}

/// A child following one parent.
pub struct ChildSession<T> {
    transport: Arc<T>,
    config: FollowerConfig,
    reconciler: Reconciler,
    cadence: RenderCadence,
    commands: mpsc::Receiver<ChildCommand>,
    predictions: watch::Sender<Option<Prediction>>,
    refresh: watch::Sender<Duration>,
    envelopes: broadcast::Sender<Envelope>,
    power: watch::Receiver<PowerState>,
    shutdown: watch::Receiver<bool>,
}

impl<T: Transport + 'static> ChildSession<T> {
    /// Create a session and its handle. Nothing happens until [`run`].
    ///
    /// [`run`]: ChildSession::run
    pub fn new(
        transport: Arc<T>,
        config: FollowerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, ChildHandle) {
        let cadence = RenderCadence::new(config.cadence);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (predictions_tx, predictions_rx) = watch::channel(None);
        let (refresh_tx, refresh_rx) =
            watch::channel(cadence.interval(now(), PowerState::Active));
        let (envelopes_tx, _) = broadcast::channel(ENVELOPE_QUEUE);
        let (power_tx, power_rx) = watch::channel(PowerState::Active);

        let handle = ChildHandle {
            commands: commands_tx,
            predictions: predictions_rx,
            refresh: refresh_rx,
            envelopes: envelopes_tx.clone(),
            power: Arc::new(power_tx),
        };
        let session = Self {
            transport,
            reconciler: Reconciler::new(config.reconciler),
            cadence,
            config,
            commands: commands_rx,
            predictions: predictions_tx,
            refresh: refresh_tx,
            envelopes: envelopes_tx,
            power: power_rx,
            shutdown,
        };
        (session, handle)
    }

    /// Connect and follow the parent until shutdown.
    ///
    /// Staleness keeps being tracked while (re)dialing. Returns an error only
    /// if the parent can't be reached within the connect timeout; the last
    /// prediction is marked stale first.
    pub async fn run(mut self) -> Result<(), ClientError> {
        let address = self.config.address.to_string();
        let connect_timeout = self.config.connect_timeout;
        let mut backoff = Duration::ZERO;

        loop {
            let transport = Arc::clone(&self.transport);
            let dial = async {
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                connect_with_retry(&*transport, &address, connect_timeout).await
            };

            match self.while_offline(dial).await {
                None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if self.reconciler.mark_stale() {
                        warn!("Parent view went stale");
                    }
                    self.predictions.send_replace(self.reconciler.prediction());
                    return Err(e);
                }
            }

            match self.serve().await {
                SessionExit::Shutdown => break,
                SessionExit::Lost(reason) => {
                    warn!("Lost connection to parent: {}", reason);
                    backoff = calculate_backoff(1);
                }
            }
        }

        info!("Child session shutting down");
        let _ = self.transport.close().await;
        Ok(())
    }

    /// Drive `dial` to completion while still polling staleness and
    /// answering commands. `None` on shutdown.
    async fn while_offline<F>(&mut self, dial: F) -> Option<Result<u32, ClientError>>
    where
        F: Future<Output = Result<u32, ClientError>>,
    {
        tokio::pin!(dial);
        let mut next_tick = self.next_tick();

        loop {
            tokio::select! {
                biased;

                result = &mut dial => return Some(result),
                _ = tokio::time::sleep_until(next_tick) => {
                    self.poll_staleness();
                    next_tick = self.next_tick();
                }
                Some(command) = self.commands.recv() => self.refuse_offline(command),
                _ = wait_for_shutdown(&mut self.shutdown) => return None,
            }
        }
    }

    async fn serve(&mut self) -> SessionExit {
        let transport = Arc::clone(&self.transport);

        // Ask right away instead of waiting for the next broadcast.
        if let Err(e) = self.send_request(&Request::Snapshot).await {
            return SessionExit::Lost(e.to_string());
        }

        // The deadline survives other wakeups, so steady traffic can't
        // starve the staleness check.
        let mut next_tick = self.next_tick();

        loop {
            tokio::select! {
                frame = transport.recv() => match frame {
                    Ok(bytes) => {
                        self.handle_frame(&bytes);
                        next_tick = next_tick.min(self.next_tick());
                    }
                    Err(e) => return SessionExit::Lost(e.to_string()),
                },
                _ = tokio::time::sleep_until(next_tick) => {
                    if let Err(e) = self.on_render_tick().await {
                        return SessionExit::Lost(e.to_string());
                    }
                    next_tick = self.next_tick();
                }
                Some(command) = self.commands.recv() => self.handle_command(command).await,
                Ok(()) = self.power.changed() => {
                    self.publish_refresh();
                    next_tick = next_tick.min(self.next_tick());
                }
                _ = wait_for_shutdown(&mut self.shutdown) => return SessionExit::Shutdown,
            }
        }
    }

    fn refresh_interval(&self) -> Duration {
        self.cadence.interval(now(), *self.power.borrow())
    }

    fn next_tick(&self) -> tokio::time::Instant {
        tokio::time::Instant::now() + self.refresh_interval()
    }

    fn publish_refresh(&self) {
        let interval = self.refresh_interval();
        self.refresh.send_if_modified(|current| {
            let changed = *current != interval;
            *current = interval;
            changed
        });
    }

    fn handle_frame(&mut self, bytes: &[u8]) {
        let envelope = match Envelope::from_json(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Dropping undecodable frame: {}", e);
                return;
            }
        };

        let at = now();
        let report = self.reconciler.ingest(&envelope, at);
        if self.cadence.observe(&report, at) {
            self.publish_refresh();
        }
        if report.recovered {
            info!("Parent view fresh (sequence {})", envelope.sequence);
        }
        if report.flash {
            debug!("Flash edge at sequence {}", envelope.sequence);
        }

        self.predictions.send_replace(self.reconciler.prediction());
        // No subscribers is fine.
        let _ = self.envelopes.send(envelope);
    }

    fn poll_staleness(&mut self) -> bool {
        let poll = self.reconciler.poll(now());
        if poll.stale_changed {
            if self.reconciler.is_stale() {
                warn!("Parent view went stale");
            }
            self.predictions.send_replace(self.reconciler.prediction());
        }
        self.publish_refresh();
        poll.request_snapshot
    }

    async fn on_render_tick(&mut self) -> Result<(), ClientError> {
        if self.poll_staleness() {
            debug!("Requesting snapshot");
            self.send_request(&Request::Snapshot).await?;
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: ChildCommand) {
        match command {
            ChildCommand::Send { request, reply } => {
                let result = if request.is_command() && self.reconciler.is_stale() {
                    Err(ClientError::Stale)
                } else {
                    self.send_request(&request).await
                };
                let _ = reply.send(result);
            }
        }
    }

    fn refuse_offline(&self, command: ChildCommand) {
        match command {
            ChildCommand::Send { request, reply } => {
                let error = if request.is_command() && self.reconciler.is_stale() {
                    ClientError::Stale
                } else {
                    ClientError::Transport(TransportError::NotConnected)
                };
                let _ = reply.send(Err(error));
            }
        }
    }

    async fn send_request(&self, request: &Request) -> Result<(), ClientError> {
        let frame = request.to_frame()?;
        self.transport.send(&frame).await?;
        Ok(())
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
