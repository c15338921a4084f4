//! # cuesync-core
//!
//! Pure logic for cuesync (no I/O, instant tests).
//!
//! This crate implements the timer, the receiver-side prediction and the
//! connection lifecycle without any network or clock access. Every
//! function that depends on time takes the current [`std::time::Instant`]
//! as an argument.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async, no sleeping)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, timers) is performed by `cuesync-host` and
//! `cuesync-client`, which drive these machines and carry out the actions
//! they return.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cadence;
pub mod input;
pub mod lifecycle;
pub mod reconciler;
pub mod timer;

pub use cadence::{CadenceConfig, PowerState, RenderCadence};
pub use input::{parse_action, parse_port, parse_seconds, DialTarget, InputError, Seconds, UserAction};
pub use lifecycle::{LinkAction, LinkEvent, LinkReport, LinkState, ParentStatus};
pub use reconciler::{
    FlashDescriptor, IngestReport, PollReport, Prediction, Reconciler, ReconcilerConfig,
};
pub use timer::{ActionOutcome, CountdownPausePolicy, FlashConfig, TimerEvent, TimerMachine};
