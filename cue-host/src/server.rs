//! The parent: one task that owns the timer.
//!
//! [`Host`] is an actor. Its task is the only writer of the
//! [`TimerMachine`]; it `select!`s over the tick interval, commands (from
//! the local [`HostHandle`] and from child sessions) and the listener, so
//! ticks and actions never interleave. Every tick publishes a snapshot to
//! every child; every applied action publishes one more.

use crate::broadcaster::{Broadcaster, HostMetrics, MetricsSnapshot};
use crate::config::Config;
use crate::error::{HostError, Result};
use crate::registry::{PeerId, PeerRegistry};
use crate::session::{wait_for_shutdown, PeerSession};
use cue_client::{CompanionChannel, TcpTransport, Transport};
use cue_core::{
    ActionOutcome, LinkAction, LinkEvent, LinkReport, LinkState, ParentStatus, TimerEvent,
    TimerMachine, UserAction,
};
use cue_types::Envelope;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

const COMMAND_QUEUE: usize = 64;

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    /// The local operator.
    Local,
    /// A connected child.
    Peer(PeerId),
}

/// Messages to the host task.
#[derive(Debug)]
pub enum HostCommand {
    /// Apply a user action to the timer.
    Apply {
        /// The action.
        action: UserAction,
        /// Who asked.
        source: CommandSource,
        /// Where to report the outcome, if anyone is waiting.
        reply: Option<oneshot::Sender<ActionOutcome>>,
    },
    /// Send the current state to one child.
    SnapshotFor {
        /// The child.
        peer: PeerId,
    },
    /// Return the current state.
    Snapshot {
        /// Where to send it.
        reply: oneshot::Sender<Envelope>,
    },
}

/// Handle to a running [`Host`].
#[derive(Debug, Clone)]
pub struct HostHandle {
    commands: mpsc::Sender<HostCommand>,
    registry: Arc<PeerRegistry>,
    metrics: Arc<HostMetrics>,
    local_addr: SocketAddr,
}

impl HostHandle {
    /// Apply a user action. An applied action is broadcast at once.
    pub async fn apply(&self, action: UserAction) -> Result<ActionOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(HostCommand::Apply {
                action,
                source: CommandSource::Local,
                reply: Some(reply),
            })
            .await
            .map_err(|_| HostError::Stopped)?;
        outcome.await.map_err(|_| HostError::Stopped)
    }

    /// Current timer state, without bumping the broadcast sequence.
    pub async fn snapshot(&self) -> Result<Envelope> {
        let (reply, envelope) = oneshot::channel();
        self.commands
            .send(HostCommand::Snapshot { reply })
            .await
            .map_err(|_| HostError::Stopped)?;
        envelope.await.map_err(|_| HostError::Stopped)
    }

    /// How many children are connected.
    pub fn status(&self) -> ParentStatus {
        self.registry.status()
    }

    /// Counter values.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// The parent timer and its listener.
pub struct Host {
    config: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
    timer: TimerMachine,
    state: LinkState,
    registry: Arc<PeerRegistry>,
    broadcaster: Broadcaster,
    metrics: Arc<HostMetrics>,
    commands_tx: mpsc::Sender<HostCommand>,
    commands: mpsc::Receiver<HostCommand>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state)
            .field("phase", &self.timer.phase())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Bind the listener and build the timer. Nothing runs until [`run`].
    ///
    /// `companion` is ignored when `companion.enabled` is false.
    ///
    /// [`run`]: Host::run
    pub async fn bind(
        config: Config,
        companion: Option<Arc<dyn CompanionChannel>>,
    ) -> Result<(Self, HostHandle)> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen_address()).await?;
        let local_addr = listener.local_addr()?;

        let timer = TimerMachine::new(config.timer.countdown_pause)
            .with_flash(config.flash_config())
            .with_show_hours(config.timer.show_hours);

        let companion = companion.filter(|_| config.companion.enabled);
        let registry = Arc::new(PeerRegistry::new());
        let metrics = Arc::new(HostMetrics::default());
        let broadcaster = Broadcaster::new(Arc::clone(&registry), companion, Arc::clone(&metrics))
            .with_send_timeout(config.send_timeout());
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);

        let handle = HostHandle {
            commands: commands_tx.clone(),
            registry: Arc::clone(&registry),
            metrics: Arc::clone(&metrics),
            local_addr,
        };
        let host = Self {
            config,
            listener,
            local_addr,
            timer,
            state: LinkState::new(),
            registry,
            broadcaster,
            metrics,
            commands_tx,
            commands,
        };
        Ok((host, handle))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Tick, broadcast and accept children until `shutdown` turns true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.transition(LinkEvent::Listen).await;

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick().await,
                Some(command) = self.commands.recv() => self.handle_command(command).await,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr, shutdown.clone()).await,
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        self.transition(LinkEvent::Close).await;
        Ok(())
    }

    async fn transition(&mut self, event: LinkEvent) {
        let (next, actions) = std::mem::take(&mut self.state).on_event(event);
        self.state = next;

        for action in actions {
            match action {
                LinkAction::CloseTransport => self.registry.close_all().await,
                LinkAction::Report(LinkReport::Listening) => {
                    tracing::info!(
                        "Listening on {} ({} Hz)",
                        self.local_addr,
                        self.config.timer.tick_hz
                    );
                }
                LinkAction::Report(LinkReport::Closed) => tracing::info!("Host stopped"),
                _ => {}
            }
        }
    }

    /// Settle the clock to now and log what fired.
    fn advance(&mut self) {
        for event in self.timer.tick(now()) {
            match event {
                TimerEvent::CountdownFinished => tracing::info!("Countdown finished"),
                TimerEvent::StopFired(stop) => tracing::info!(
                    "Stop at {:.2}s, holding {:.2}s",
                    stop.fire_offset,
                    stop.hold_duration
                ),
                TimerEvent::StopReleased => tracing::debug!("Stop hold released"),
            }
        }
    }

    async fn on_tick(&mut self) {
        self.advance();
        let envelope = self.timer.publish();
        self.broadcast(&envelope).await;
    }

    async fn broadcast(&mut self, envelope: &Envelope) {
        let report = self.broadcaster.broadcast(envelope).await;
        if !report.failed.is_empty() {
            self.registry.drop_failed(&report.failed).await;
            if self.registry.is_empty() {
                tracing::info!("No children connected");
            }
        }
    }

    async fn handle_command(&mut self, command: HostCommand) {
        match command {
            HostCommand::Apply {
                action,
                source,
                reply,
            } => {
                self.advance();
                let outcome = self.timer.apply(&action, now());
                if outcome.is_applied() {
                    self.metrics.commands_applied.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("Applied {:?} from {:?}", action, source);
                    let envelope = self.timer.publish();
                    self.broadcast(&envelope).await;
                } else {
                    self.metrics.commands_rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        "Rejected {:?} from {:?} in {:?}",
                        action,
                        source,
                        self.timer.phase()
                    );
                }
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            HostCommand::SnapshotFor { peer } => self.send_snapshot(peer).await,
            HostCommand::Snapshot { reply } => {
                self.advance();
                let _ = reply.send(self.timer.snapshot());
            }
        }
    }

    async fn send_snapshot(&mut self, peer: PeerId) {
        self.advance();
        let envelope = self.timer.snapshot();
        match self.broadcaster.send_to(peer, &envelope).await {
            Ok(()) => tracing::debug!("Sent snapshot to {}", peer),
            Err(HostError::UnknownPeer(_)) => {}
            Err(e) => {
                tracing::warn!("Snapshot to {} failed: {}", peer, e);
                self.registry.drop_failed(&[peer]).await;
            }
        }
    }

    async fn accept(
        &mut self,
        stream: TcpStream,
        addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) {
        self.metrics
            .peers_connected_total
            .fetch_add(1, Ordering::Relaxed);

        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::from_stream(stream));
        let id = self.registry.register(Arc::clone(&transport), addr.to_string());

        let session = PeerSession::new(
            id,
            transport,
            Arc::clone(&self.registry),
            self.commands_tx.clone(),
            Arc::clone(&self.metrics),
            shutdown,
        );
        tokio::spawn(session.run());

        // A late joiner shouldn't wait for the next tick.
        self.send_snapshot(id).await;
    }
}
