//! # cuesync-host
//!
//! Parent side of cuesync: owns the timer and broadcasts it.
//!
//! This crate implements the parent, which:
//! - Owns the only writable [`cue_core::TimerMachine`]
//! - Ticks it at a fixed rate and broadcasts a full snapshot every tick
//! - Accepts children over TCP and applies the commands they forward
//! - Keeps a companion display's durable context current
//!
//! ## Architecture
//!
//! ```text
//! Child A ──┐                      ┌── Child B
//!           │   delimited JSON     │
//!           ├─────────────────────►│
//!           │                      │
//!       ┌───┴──────────────────────┴───┐
//!       │         cuesync-host         │
//!       │  ┌────────────────────────┐  │
//!       │  │  TimerMachine (actor)  │──┼──► Companion (live + durable)
//!       │  └────────────────────────┘  │
//!       └──────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Parent to child: one [`cue_types::Envelope`] per frame, every tick and
//! after every applied action. Child to parent: [`cue_types::Request`]
//! frames (`snapshot`, `start`, `pause`, `resume`, `reset`, `flash`).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use broadcaster::{BroadcastReport, Broadcaster, HostMetrics, MetricsSnapshot};
pub use config::{Config, ConfigError};
pub use error::HostError;
pub use registry::{PeerId, PeerRegistry};
pub use server::{CommandSource, Host, HostCommand, HostHandle};
pub use session::PeerSession;
